use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::RegistryKind;
use crate::model::ProgrammingLanguage;

#[derive(Debug, Clone, Parser)]
#[command(name = "patch-eval")]
#[command(about = "Classify library versions as vulnerable or fixed against the construct changes of a bug fix")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Ledger and result document directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub folder: Option<PathBuf>,

    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    #[arg(long, value_name = "PATH", global = true)]
    pub m2: Option<PathBuf>,

    #[arg(long, value_name = "URL", global = true)]
    pub backend: Option<String>,

    #[arg(long, value_name = "URL", global = true)]
    pub registry_url: Option<String>,

    #[arg(long, value_enum, global = true)]
    pub registry: Option<RegistryKind>,

    /// Used when RUST_LOG is not set.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Evaluate bugs once.
    Run {
        #[arg(required = true, value_name = "BUG")]
        bugs: Vec<String>,

        #[command(flatten)]
        args: RunArgs,
    },
    /// Evaluate bugs on a fixed schedule.
    Job {
        #[arg(required = true, value_name = "BUG")]
        bugs: Vec<String>,

        #[command(flatten)]
        args: RunArgs,

        #[arg(long, value_name = "HOURS", default_value_t = 0)]
        delay_hours: u64,

        #[arg(long, value_name = "HOURS", default_value_t = 24)]
        period_hours: u64,
    },
    Stats,
    Clear,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[arg(long, value_enum)]
    pub lang: Option<LangArg>,

    /// Write result documents to the folder instead of uploading them.
    #[arg(long)]
    pub to_file: bool,

    /// Replace stored results instead of adding new ones.
    #[arg(long)]
    pub override_results: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LangArg {
    Java,
    Py,
    Js,
}

impl From<LangArg> for ProgrammingLanguage {
    fn from(lang: LangArg) -> Self {
        match lang {
            LangArg::Java => Self::Java,
            LangArg::Py => Self::Py,
            LangArg::Js => Self::Js,
        }
    }
}
