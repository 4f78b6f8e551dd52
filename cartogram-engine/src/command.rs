use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::grid::{CellSize, GridObserver};
use crate::session::CartogramSession;
use crate::system::CoordinateSystem;

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
    /// 命令名之后的原始文本（去掉首尾空白），路径参数按原样取用。
    pub raw_args: String,
}

impl CommandRequest {
    /// 按空白拆分一行输入，空行返回 `None`。
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let name = line.split_whitespace().next()?;
        let rest = line[name.len()..].trim();
        Some(Self {
            name: name.to_string(),
            args: rest.split_whitespace().map(str::to_string).collect(),
            raw_args: rest.to_string(),
        })
    }

    fn path_arg(&self) -> Option<&str> {
        if self.raw_args.is_empty() {
            None
        } else {
            Some(self.raw_args.as_str())
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub session: &'a mut CartogramSession,
    pub observer: &'a mut dyn GridObserver,
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(LoadCommand);
        bus.register(SystemCommand);
        bus.register(SizeCommand);
        bus.register(GridCommand);
        bus.register(SummaryCommand);
        bus.register(InfoCommand);
        bus.register(SaveCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            debug!(command = %request.name, args = ?request.args, "执行命令");
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }

    /// 按命令名排序的用法说明。
    pub fn usage(&self) -> Vec<&'static str> {
        let mut names: Vec<&&'static str> = self.handlers.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.handlers.get(*name).map(|handler| handler.usage()))
            .collect()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

struct LoadCommand;

impl CommandHandler for LoadCommand {
    fn name(&self) -> &'static str {
        "load"
    }

    fn usage(&self) -> &'static str {
        "load <path>        读取边界 DXF"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(path) = request.path_arg() else {
            return CommandResponse::err("用法: load <path>");
        };
        match context.session.load(Path::new(path)) {
            Ok(boundary) => {
                let polygon_count = boundary.polygons().len();
                let detected = boundary.detect_system();
                CommandResponse::ok(format!(
                    "已读取 {polygon_count} 个边界多边形，检测到坐标系 {detected}"
                ))
            }
            Err(err) => CommandResponse::err(format!("读取边界失败: {err}")),
        }
    }
}

struct SystemCommand;

impl CommandHandler for SystemCommand {
    fn name(&self) -> &'static str {
        "system"
    }

    fn usage(&self) -> &'static str {
        "system <sk63|msk|auto>  设置坐标系"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(raw) = request.args.first() else {
            return match context.session.system() {
                Some(system) => CommandResponse::ok(format!("当前坐标系: {system}")),
                None => CommandResponse::ok("当前坐标系: 自动检测（尚未读取边界）"),
            };
        };
        if raw.eq_ignore_ascii_case("auto") {
            context.session.set_system(None);
            return CommandResponse::ok("坐标系恢复为自动检测");
        }
        match raw.parse::<CoordinateSystem>() {
            Ok(system) => {
                context.session.set_system(Some(system));
                CommandResponse::ok(format!("坐标系已设置为 {system}"))
            }
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct SizeCommand;

impl CommandHandler for SizeCommand {
    fn name(&self) -> &'static str {
        "size"
    }

    fn usage(&self) -> &'static str {
        "size <n>           设置网格边长"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(raw) = request.args.first() else {
            return CommandResponse::ok(format!("当前网格边长: {}", context.session.cell_size()));
        };
        match CellSize::parse(raw) {
            Ok(size) => {
                context.session.set_cell_size(size);
                CommandResponse::ok(format!("网格边长已设置为 {size}"))
            }
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

struct GridCommand;

impl CommandHandler for GridCommand {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn usage(&self) -> &'static str {
        "grid               生成网格"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let generated = context
            .session
            .generate(&mut *context.observer)
            .map(|cells| cells.len());
        match generated {
            Ok(0) => CommandResponse::ok("边界小于一个网格单元，未生成任何单元"),
            Ok(count) => CommandResponse::ok(format!(
                "已生成 {count} 个单元，{} 个图幅块",
                context.session.nomenclature_count()
            )),
            Err(err) => CommandResponse::err(format!("生成网格失败: {err}")),
        }
    }
}

struct SummaryCommand;

impl CommandHandler for SummaryCommand {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn usage(&self) -> &'static str {
        "summary            列出图幅编号"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let nomenclature = context.session.nomenclature();
        if nomenclature.is_empty() {
            return CommandResponse::err("尚无图幅编号，请先执行 grid");
        }
        let lines: Vec<&str> = nomenclature
            .iter()
            .map(|info| info.full_nomenclature.as_str())
            .collect();
        CommandResponse::ok(lines.join("\n"))
    }
}

struct InfoCommand;

impl CommandHandler for InfoCommand {
    fn name(&self) -> &'static str {
        "info"
    }

    fn usage(&self) -> &'static str {
        "info               显示会话状态"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let session = &*context.session;
        let mut lines = Vec::new();
        match (session.source(), session.bounds()) {
            (Some(path), Some(bounds)) => {
                let (min_x, min_y, max_x, max_y) = bounds.extents();
                lines.push(format!("边界: {}", path.display()));
                lines.push(format!(
                    "范围: ({min_x:.2}, {min_y:.2}) - ({max_x:.2}, {max_y:.2})"
                ));
            }
            (None, Some(_)) => lines.push("边界: 内存".to_string()),
            _ => lines.push("边界: 未读取".to_string()),
        }
        let system = session
            .system()
            .map(|system| system.to_string())
            .unwrap_or_else(|| "自动".to_string());
        lines.push(format!("坐标系: {system}"));
        lines.push(format!("网格边长: {}", session.cell_size()));
        lines.push(format!("单元数: {}", session.cell_count()));
        lines.push(format!("图幅块数: {}", session.nomenclature_count()));
        CommandResponse::ok(lines.join("\n"))
    }
}

struct SaveCommand;

impl CommandHandler for SaveCommand {
    fn name(&self) -> &'static str {
        "save"
    }

    fn usage(&self) -> &'static str {
        "save <path>        保存网格图 DXF"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(path) = request.path_arg() else {
            return CommandResponse::err("用法: save <path>");
        };
        match context.session.save(Path::new(path)) {
            Ok(()) => CommandResponse::ok(format!(
                "已保存 {} 个单元到 {path}",
                context.session.cell_count()
            )),
            Err(err) => CommandResponse::err(format!("保存失败: {err}")),
        }
    }
}
