use anyhow::Result;
use clap::Parser;
use patch_eval::backend::{ArtifactRegistry, AstService, Backend};
use patch_eval::cache::{AstStore, CachedAstService};
use patch_eval::cli::{Cli, Commands, RunArgs};
use patch_eval::client::RestClient;
use patch_eval::config::{
    PatchEvalConfig, RegistryKind, clear_db, resolve_db_path, resolve_m2_repo,
};
use patch_eval::local::LocalRepository;
use patch_eval::pipeline::{BugOutcome, JobSchedule, RunContext};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = PatchEvalConfig::load(cli.config.as_deref())?;
    config.apply_cli(&cli);

    match cli.command.clone() {
        Commands::Clear => {
            let db_path = resolve_db_path(&cli, &config)?;
            clear_db(&db_path)?;
        }
        Commands::Stats => {
            let db_path = resolve_db_path(&cli, &config)?;
            let store = AstStore::open(db_path)?;
            let stats = store.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Run { bugs, args } => {
            let ctx = build_context(&cli, &config, &args)?;
            let start = Instant::now();
            let outcomes = ctx.run_bugs(&bugs);
            let summary = RunSummary {
                duration_ms: start.elapsed().as_millis() as u64,
                bugs: outcomes
                    .into_iter()
                    .map(|(bug, outcome)| BugSummary { bug, outcome })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Job {
            bugs,
            args,
            delay_hours,
            period_hours,
        } => {
            let ctx = Arc::new(build_context(&cli, &config, &args)?);
            let schedule = JobSchedule {
                delay: hours(delay_hours),
                period: hours(period_hours.max(1)),
            };
            info!(bugs = bugs.len(), delay_hours, period_hours, "scheduled job started");
            if ctx.spawn_job(bugs, schedule).join().is_err() {
                anyhow::bail!("scheduled job thread panicked");
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.saturating_mul(3600))
}

fn build_context(cli: &Cli, config: &PatchEvalConfig, args: &RunArgs) -> Result<RunContext> {
    let settings = config.run_settings(cli, args)?;
    let client = Arc::new(RestClient::new(
        &config.backend_url,
        &config.registry_url,
        config.http_timeout(),
    )?);

    let registry: Arc<dyn ArtifactRegistry> = match config.registry {
        RegistryKind::Rest => client.clone(),
        RegistryKind::Local => Arc::new(LocalRepository::new(resolve_m2_repo(cli, config)?)),
    };
    let store = AstStore::open(resolve_db_path(cli, config)?)?;
    let ast: Arc<dyn AstService> = Arc::new(CachedAstService::new(client.clone(), store));
    let backend: Arc<dyn Backend> = client;

    info!(
        backend = %config.backend_url,
        registry = ?config.registry,
        folder = %settings.folder.display(),
        lang = %settings.lang,
        "run configured"
    );
    RunContext::new(backend, registry, ast, settings)
}

#[derive(Debug, Serialize)]
struct BugSummary {
    bug: String,
    #[serde(flatten)]
    outcome: BugOutcome,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    duration_ms: u64,
    bugs: Vec<BugSummary>,
}
