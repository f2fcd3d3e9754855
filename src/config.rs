use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::candidates::CandidateFilter;
use crate::cli::{Cli, RunArgs};
use crate::local::default_m2_repository;
use crate::model::ProgrammingLanguage;
use crate::pipeline::RunSettings;
use crate::publish::PublishMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Rest,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchEvalConfig {
    pub backend_url: String,
    pub registry_url: String,
    pub registry: RegistryKind,
    pub m2: Option<PathBuf>,
    pub folder: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub analysis_concurrency: usize,
    pub analysis_timeout_secs: Option<u64>,
    pub bytecode_concurrency: usize,
    pub bytecode_timeout_secs: Option<u64>,
    pub unavailable_backoff_secs: u64,
    pub http_timeout_secs: Option<u64>,
    pub lang: ProgrammingLanguage,
    pub packaging: Option<String>,
    pub filters: CandidateFilter,
}

impl Default for PatchEvalConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8033/backend".to_string(),
            registry_url: "http://localhost:8092/cia".to_string(),
            registry: RegistryKind::Rest,
            m2: None,
            folder: None,
            db: None,
            analysis_concurrency: 4,
            analysis_timeout_secs: None,
            bytecode_concurrency: 4,
            bytecode_timeout_secs: Some(7200),
            unavailable_backoff_secs: 10,
            http_timeout_secs: None,
            lang: ProgrammingLanguage::Java,
            packaging: None,
            filters: CandidateFilter::default(),
        }
    }
}

impl PatchEvalConfig {
    /// Reads `path`, or the default config file when it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = patch_eval_home()?.join("config.toml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies the global flags that override config values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.backend {
            self.backend_url = url.clone();
        }
        if let Some(url) = &cli.registry_url {
            self.registry_url = url.clone();
        }
        if let Some(kind) = cli.registry {
            self.registry = kind;
        }
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }

    pub fn run_settings(&self, cli: &Cli, args: &RunArgs) -> Result<RunSettings> {
        let lang = args.lang.map(ProgrammingLanguage::from).unwrap_or(self.lang);
        Ok(RunSettings {
            folder: resolve_folder(cli, self)?,
            filter: self.filters.clone(),
            lang,
            packaging: self
                .packaging
                .clone()
                .unwrap_or_else(|| lang.packaging().to_string()),
            analysis_concurrency: self.analysis_concurrency,
            analysis_timeout: self.analysis_timeout_secs.map(Duration::from_secs),
            bytecode_concurrency: self.bytecode_concurrency,
            bytecode_timeout: self.bytecode_timeout_secs.map(Duration::from_secs),
            unavailable_backoff: Duration::from_secs(self.unavailable_backoff_secs),
            mode: if args.override_results {
                PublishMode::Override
            } else {
                PublishMode::Incremental
            },
            to_file: args.to_file,
        })
    }
}

pub fn resolve_m2_repo(cli: &Cli, config: &PatchEvalConfig) -> Result<PathBuf> {
    if let Some(p) = cli.m2.clone().or_else(|| config.m2.clone()) {
        return Ok(p);
    }
    default_m2_repository()
}

pub fn resolve_db_path(cli: &Cli, config: &PatchEvalConfig) -> Result<PathBuf> {
    if let Some(p) = cli.db.clone().or_else(|| config.db.clone()) {
        return Ok(p);
    }
    Ok(patch_eval_home()?.join("db.lmdb"))
}

pub fn resolve_folder(cli: &Cli, config: &PatchEvalConfig) -> Result<PathBuf> {
    if let Some(p) = cli.folder.clone().or_else(|| config.folder.clone()) {
        return Ok(p);
    }
    Ok(patch_eval_home()?.join("results"))
}

pub fn clear_db(db_path: &Path) -> Result<()> {
    remove_file_if_exists(db_path, "db")?;
    remove_file_if_exists(&lmdb_lock_path(db_path), "db lock")?;
    Ok(())
}

pub fn patch_eval_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("patch-eval"))
}

fn lmdb_lock_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push("-lock");
    PathBuf::from(os)
}

fn remove_file_if_exists(path: &Path, kind: &str) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {kind} file: {}", path.display()))?;
    }
    Ok(())
}
