use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

const FULL_BLOCK: &str = "00+00;01,02,03,04,05,06,07,08,09,10,11,12,13,14,15,16";

fn fixture(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/data");
    path.push(name);
    path
}

fn cartogram() -> Command {
    let mut cmd = Command::cargo_bin("cartogram").expect("找不到 cartogram 可执行文件");
    cmd.env_remove("CARTOGRAM_CONFIG");
    cmd
}

#[test]
fn generate_writes_cartogram_and_prints_summary() {
    let dir = tempfile::tempdir().expect("创建临时目录");
    let output = dir.path().join("grid.dxf");

    cartogram()
        .arg("generate")
        .arg(fixture("site_square.dxf"))
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("单元数: 16"))
        .stdout(predicate::str::contains(FULL_BLOCK))
        .stdout(predicate::str::contains("坐标系: МСК"));

    let written = fs::read_to_string(&output).expect("读取输出文件");
    assert!(written.contains("AC1015"));
    assert!(written.contains("NOMENCLATURE"));
    assert!(written.contains("00+00;07"));

    cartogram()
        .arg("summary")
        .arg("--saved")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{FULL_BLOCK}\n")));
}

#[test]
fn summary_json_for_national_boundary() {
    let output = cartogram()
        .arg("summary")
        .arg(fixture("site_national.dxf"))
        .arg("--json")
        .output()
        .expect("运行 cartogram");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("合法 JSON");
    let entries = value.as_array().expect("JSON 数组");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["base"], "45+34");
    assert_eq!(entries[0]["numbers"].as_array().map(Vec::len), Some(12));
    assert_eq!(
        entries[0]["full_nomenclature"],
        "45+34;05,06,07,08,09,10,11,12,13,14,15,16"
    );
}

#[test]
fn detect_reports_national_system() {
    cartogram()
        .arg("detect")
        .arg(fixture("site_national.dxf"))
        .assert()
        .success()
        .stdout(predicate::str::contains("坐标系: СК63"))
        .stdout(predicate::str::contains("多边形数: 1"));
}

#[test]
fn invalid_parameters_fail_without_output() {
    let dir = tempfile::tempdir().expect("创建临时目录");
    let output = dir.path().join("never.dxf");

    cartogram()
        .args(["generate", "--cell-size", "abc"])
        .arg(fixture("site_square.dxf"))
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("cell size"));
    assert!(!output.exists());

    cartogram()
        .args(["summary", "--system", "wgs84"])
        .arg(fixture("site_square.dxf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported coordinate system"));
}

#[test]
fn missing_input_is_reported() {
    cartogram()
        .arg("detect")
        .arg(fixture("does_not_exist.dxf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does_not_exist.dxf"));
}

#[test]
fn config_file_supplies_defaults_and_flags_override() {
    let dir = tempfile::tempdir().expect("创建临时目录");
    let config = dir.path().join("cartogram.toml");
    fs::write(&config, "[cartogram]\ncell_size = 500\n").expect("写入配置");

    cartogram()
        .arg("--config")
        .arg(&config)
        .arg("summary")
        .arg(fixture("site_square.dxf"))
        .assert()
        .success()
        .stdout(predicate::str::diff("00+00;02,04,10,12\n"));

    cartogram()
        .env("CARTOGRAM_CONFIG", &config)
        .args(["summary", "--cell-size", "250"])
        .arg(fixture("site_square.dxf"))
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{FULL_BLOCK}\n")));
}

#[test]
fn unreadable_config_file_is_an_error() {
    let dir = tempfile::tempdir().expect("创建临时目录");
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[cartogram]\ncell_size = \"500m\"\n").expect("写入配置");

    cartogram()
        .arg("--config")
        .arg(&config)
        .arg("summary")
        .arg(fixture("site_square.dxf"))
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("bad.toml"));

    cartogram()
        .env("CARTOGRAM_CONFIG", &config)
        .arg("detect")
        .arg(fixture("site_square.dxf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("CARTOGRAM_CONFIG"));

    cartogram()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("detect")
        .arg(fixture("site_square.dxf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn shell_runs_a_scripted_session() {
    let dir = tempfile::tempdir().expect("创建临时目录");
    let output = dir.path().join("shell.dxf");
    let script = format!(
        "load {}\nsize 250\ngrid\nsummary\nsave {}\ninfo\nexit\n",
        fixture("site_square.dxf").display(),
        output.display()
    );

    cartogram()
        .arg("shell")
        .write_stdin(script)
        .assert()
        .success()
        .stdout(predicate::str::contains("已生成 16 个单元"))
        .stdout(predicate::str::contains(FULL_BLOCK))
        .stdout(predicate::str::contains("单元数: 16"));
    assert!(output.exists());
}
