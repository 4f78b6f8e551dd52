use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use cartogram_config::{AppConfig, CartogramConfig, CONFIG_ENV_VAR};
use cartogram_core::geometry::Bounds2D;
use cartogram_engine::boundary::parse_boundary;
use cartogram_engine::command::{CommandBus, CommandContext, CommandRequest};
use cartogram_engine::grid::{CellSize, GridObserver, generate_grid_with};
use cartogram_engine::nomenclature::{NomenclatureInfo, aggregate};
use cartogram_engine::serializer::{SerializeOptions, load_cartogram_with, save_with};
use cartogram_engine::session::CartogramSession;
use cartogram_engine::system::CoordinateSystem;
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "cartogram", version, about = "按图幅分幅为测区边界生成网格图")]
struct Cli {
    /// 配置文件路径，缺省时读取 CARTOGRAM_CONFIG 或 ./config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 读取边界，生成网格并写出 DXF
    Generate {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        grid: GridArgs,
    },
    /// 打印图幅编号汇总
    Summary {
        input: PathBuf,
        #[command(flatten)]
        grid: GridArgs,
        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
        /// 输入是已保存的网格图，而非边界
        #[arg(long)]
        saved: bool,
    },
    /// 检测边界所用坐标系
    Detect { input: PathBuf },
    /// 交互式命令行
    Shell,
}

#[derive(Debug, clap::Args)]
struct GridArgs {
    /// 网格边长，覆盖配置
    #[arg(long)]
    cell_size: Option<String>,
    /// 坐标系：sk63、msk 或 auto，覆盖配置
    #[arg(long)]
    system: Option<String>,
}

/// 网格参数的最终取值：命令行优先于配置文件。
struct GridSettings {
    cell_size: CellSize,
    system: Option<CoordinateSystem>,
    options: SerializeOptions,
}

impl GridSettings {
    fn resolve(config: &CartogramConfig, args: Option<&GridArgs>) -> Result<Self> {
        let cell_size = match args.and_then(|args| args.cell_size.as_deref()) {
            Some(raw) => CellSize::parse(raw)?,
            None => CellSize::new(config.cell_size).context("配置中的 cell_size 非法")?,
        };
        let system_name = args
            .and_then(|args| args.system.as_deref())
            .unwrap_or(config.coordinate_system.as_str());
        let system = parse_system(system_name)?;
        let options = SerializeOptions {
            label_height: config.label_height,
            grid_layer: config.grid_layer.clone(),
            label_layer: config.label_layer.clone(),
            boundary_layer: config.boundary_layer.clone(),
        };
        Ok(Self {
            cell_size,
            system,
            options,
        })
    }
}

fn parse_system(raw: &str) -> Result<Option<CoordinateSystem>> {
    if raw.trim().eq_ignore_ascii_case("auto") {
        Ok(None)
    } else {
        Ok(Some(raw.parse()?))
    }
}

/// 将逐行进度写入调试日志。
struct ProgressLog;

impl GridObserver for ProgressLog {
    fn on_row(&mut self, completed: usize, total: usize) {
        debug!(completed, total, "网格生成进度");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("错误: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);
    info!("启动网格图工具");

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "执行失败");
            eprintln!("错误: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Generate {
            input,
            output,
            grid,
        } => generate(&input, &output, GridSettings::resolve(&config.cartogram, Some(&grid))?),
        Command::Summary {
            input,
            grid,
            json,
            saved,
        } => {
            let settings = GridSettings::resolve(&config.cartogram, Some(&grid))?;
            summary(&input, &settings, saved, json)
        }
        Command::Detect { input } => detect(&input),
        Command::Shell => shell(GridSettings::resolve(&config.cartogram, None)?),
    }
}

fn generate(input: &Path, output: &Path, settings: GridSettings) -> Result<()> {
    let boundary = parse_boundary(input)?;
    let system = settings.system.unwrap_or_else(|| boundary.detect_system());
    let cells = generate_grid_with(&boundary, settings.cell_size.get(), system, &mut ProgressLog)?;
    if cells.is_empty() {
        warn!("边界小于一个网格单元");
        println!("边界小于网格边长 {}，未生成任何单元", settings.cell_size);
    }
    save_with(&cells, &boundary, output, &settings.options)?;

    println!("坐标系: {system}");
    println!("单元数: {}", cells.len());
    for info in aggregate(&cells) {
        println!("{}", info.full_nomenclature);
    }
    println!("已写出: {}", output.display());
    Ok(())
}

fn summary(input: &Path, settings: &GridSettings, saved: bool, json: bool) -> Result<()> {
    let nomenclature: Vec<NomenclatureInfo> = if saved {
        let cartogram = load_cartogram_with(input, &settings.options)?;
        if cartogram.cells.is_empty() {
            bail!("{} 中没有网格单元（图层 {}）", input.display(), settings.options.grid_layer);
        }
        aggregate(&cartogram.cells)
    } else {
        let boundary = parse_boundary(input)?;
        let system = settings.system.unwrap_or_else(|| boundary.detect_system());
        let cells =
            generate_grid_with(&boundary, settings.cell_size.get(), system, &mut ProgressLog)?;
        aggregate(&cells)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&nomenclature)?);
    } else {
        for info in &nomenclature {
            println!("{}", info.full_nomenclature);
        }
    }
    Ok(())
}

fn detect(input: &Path) -> Result<()> {
    let boundary = parse_boundary(input)?;
    println!("坐标系: {}", boundary.detect_system());
    println!("多边形数: {}", boundary.polygons().len());
    println!("范围: {}", format_bounds(&boundary.bounds()));
    Ok(())
}

fn format_bounds(bounds: &Bounds2D) -> String {
    let (min_x, min_y, max_x, max_y) = bounds.extents();
    format!("({min_x:.2}, {min_y:.2}) - ({max_x:.2}, {max_y:.2})")
}

fn shell(settings: GridSettings) -> Result<()> {
    let mut session = CartogramSession::with_settings(settings.cell_size, settings.options);
    session.set_system(settings.system);
    let bus = CommandBus::new();
    let mut observer = ProgressLog;
    let mut context = CommandContext {
        session: &mut session,
        observer: &mut observer,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("读取标准输入失败")?;
        let Some(request) = CommandRequest::parse(&line) else {
            continue;
        };
        match request.name.as_str() {
            "exit" | "quit" => break,
            "help" => {
                for usage in bus.usage() {
                    writeln!(stdout, "  {usage}")?;
                }
                continue;
            }
            _ => {}
        }
        let response = bus.dispatch(&request, &mut context);
        let message = response.message.unwrap_or_default();
        if response.success {
            writeln!(stdout, "{message}")?;
        } else {
            writeln!(stdout, "错误: {message}")?;
        }
        stdout.flush()?;
    }
    Ok(())
}

/// 显式指定或自动发现的配置文件无法读取时直接报错，不回退到内建默认值。
fn load_configuration(override_path: Option<&Path>) -> Result<AppConfig> {
    match override_path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("无法加载配置文件 {}", path.display())),
        None => AppConfig::discover().with_context(|| {
            format!("无法加载配置（{CONFIG_ENV_VAR} 或 ./config/default.toml）")
        }),
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
