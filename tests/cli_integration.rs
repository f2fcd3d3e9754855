use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};

fn run(bin: &str, args: &[&str]) -> anyhow::Result<Output> {
    let out = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()?;
    Ok(out)
}

fn run_json(bin: &str, args: &[&str]) -> anyhow::Result<Value> {
    let out = run(bin, args)?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

fn write_config(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[test]
fn stats_then_clear_manages_the_store() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_patch-eval");
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("store").join("db.lmdb");
    let db_arg = db.to_string_lossy().to_string();
    let config = dir.path().join("config.toml");
    write_config(&config, "analysis_concurrency = 2\n")?;
    let config_arg = config.to_string_lossy().to_string();

    let stats = run_json(bin, &["--config", &config_arg, "--db", &db_arg, "stats"])?;
    assert_eq!(stats["construct_asts"], 0);
    assert_eq!(stats["ast_diffs"], 0);
    assert_eq!(stats["db_path"], db_arg.as_str());
    assert!(db.exists());

    let out = run(bin, &["--config", &config_arg, "--db", &db_arg, "clear"])?;
    assert!(out.status.success());
    assert!(!db.exists());
    Ok(())
}

#[test]
fn invalid_config_is_reported() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_patch-eval");
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("config.toml");
    write_config(&config, "analysis_concurrency = \"many\"\n")?;
    let config_arg = config.to_string_lossy().to_string();

    let out = run(bin, &["--config", &config_arg, "stats"])?;
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Invalid config file"));
    Ok(())
}

#[test]
fn run_requires_bug_ids() -> anyhow::Result<()> {
    let bin = env!("CARGO_BIN_EXE_patch-eval");
    let out = run(bin, &["run"])?;
    assert!(!out.status.success());
    Ok(())
}
