//! Per-bug orchestration: consolidation, candidate resolution, analysis,
//! bytecode fallback, classification and publication.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::analyzer::{AnalysisContext, analyze_all};
use crate::assessment::ArtifactResult;
use crate::backend::{ArtifactRegistry, AstService, Backend, ServiceError};
use crate::bytecode::{BytecodeContext, compare_bytecode};
use crate::candidates::{CandidateFilter, resolve_candidates};
use crate::classify::{classify, propagate_manual_only};
use crate::consolidate::consolidate;
use crate::ledger::{append_ledger, ledger_path, read_ledger, write_ledger};
use crate::model::{AffectedLibrary, AffectedVersionSource, LibraryId, ProgrammingLanguage};
use crate::pool::WorkerPool;
use crate::publish::{PublishMode, ResultSink, publish};

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Ledgers and, in file mode, result documents.
    pub folder: PathBuf,
    pub filter: CandidateFilter,
    pub lang: ProgrammingLanguage,
    pub packaging: String,
    pub analysis_concurrency: usize,
    pub analysis_timeout: Option<Duration>,
    pub bytecode_concurrency: usize,
    pub bytecode_timeout: Option<Duration>,
    pub unavailable_backoff: Duration,
    pub mode: PublishMode,
    pub to_file: bool,
}

impl RunSettings {
    pub fn new(folder: PathBuf) -> Self {
        let lang = ProgrammingLanguage::Java;
        Self {
            folder,
            filter: CandidateFilter::default(),
            lang,
            packaging: lang.packaging().to_string(),
            analysis_concurrency: 4,
            analysis_timeout: None,
            bytecode_concurrency: 4,
            bytecode_timeout: Some(Duration::from_secs(7200)),
            unavailable_backoff: Duration::from_secs(10),
            mode: PublishMode::Incremental,
            to_file: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BugOutcome {
    Published { verdicts: usize },
    NotFound,
    NoCandidates,
    Unavailable,
    Failed { error: String },
}

#[derive(Debug, Clone, Copy)]
pub struct JobSchedule {
    pub delay: Duration,
    pub period: Duration,
}

/// Everything a run shares across bugs.
pub struct RunContext {
    backend: Arc<dyn Backend>,
    registry: Arc<dyn ArtifactRegistry>,
    ast: Arc<dyn AstService>,
    settings: RunSettings,
    analysis_pool: WorkerPool,
    bytecode_pool: WorkerPool,
}

impl RunContext {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<dyn ArtifactRegistry>,
        ast: Arc<dyn AstService>,
        settings: RunSettings,
    ) -> Result<Self> {
        let analysis_pool = WorkerPool::new("analysis", settings.analysis_concurrency)?;
        let bytecode_pool = WorkerPool::new("bytecode", settings.bytecode_concurrency)?;
        debug!(
            analysis_threads = analysis_pool.threads(),
            bytecode_threads = bytecode_pool.threads(),
            "worker pools ready"
        );
        Ok(Self {
            backend,
            registry,
            ast,
            settings,
            analysis_pool,
            bytecode_pool,
        })
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Processes bugs one after the other. An outage is followed by the
    /// configured backoff before the next bug.
    pub fn run_bugs(&self, bug_ids: &[String]) -> Vec<(String, BugOutcome)> {
        let mut outcomes = Vec::with_capacity(bug_ids.len());
        for bug_id in bug_ids {
            let start = Instant::now();
            let outcome = match self.run_bug(bug_id) {
                Ok(outcome) => outcome,
                Err(e) if is_unavailable(&e) => {
                    error!(bug = %bug_id, error = %format!("{e:#}"), "service unavailable");
                    BugOutcome::Unavailable
                }
                Err(e) => {
                    error!(bug = %bug_id, error = %format!("{e:#}"), "bug evaluation failed");
                    BugOutcome::Failed {
                        error: format!("{e:#}"),
                    }
                }
            };
            info!(
                bug = %bug_id,
                outcome = ?outcome,
                duration_ms = start.elapsed().as_millis() as u64,
                "bug done"
            );
            if outcome == BugOutcome::Unavailable {
                std::thread::sleep(self.settings.unavailable_backoff);
            }
            outcomes.push((bug_id.clone(), outcome));
        }
        outcomes
    }

    pub fn run_bug(&self, bug_id: &str) -> Result<BugOutcome> {
        let bug = match self.backend.bug(bug_id) {
            Ok(bug) => bug,
            Err(e) if e.is_not_found() => {
                warn!(bug = bug_id, "bug not found, skipping");
                return Ok(BugOutcome::NotFound);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to fetch bug {bug_id}")),
        };

        let changes = consolidate(&bug.construct_changes);
        let manual = self.manual_verdicts(bug_id)?;
        if changes.is_empty() {
            info!(bug = bug_id, "no construct changes, propagating manual verdicts only");
            return self.propagate_manual(bug_id, &manual);
        }
        info!(
            bug = bug_id,
            modified = changes.modified.len(),
            added_or_deleted = changes.added_or_deleted.len(),
            "consolidated construct changes"
        );

        let candidates = resolve_candidates(
            bug_id,
            self.backend.as_ref(),
            self.registry.as_ref(),
            &self.settings.filter,
        )
        .with_context(|| format!("Failed to resolve candidates of {bug_id}"))?;
        if candidates.is_empty() {
            warn!(bug = bug_id, "no candidate versions");
            return Ok(BugOutcome::NoCandidates);
        }

        let ledger = ledger_path(&self.settings.folder, bug_id);
        let mut results: Vec<ArtifactResult> = if ledger.exists() {
            read_ledger(&ledger)?
        } else {
            Vec::new()
        };
        let wanted: HashSet<&LibraryId> = candidates.iter().map(|a| &a.lib_id).collect();
        results.retain(|r| wanted.contains(&r.lib));
        let known: HashSet<LibraryId> = results.iter().map(|r| r.lib.clone()).collect();
        let pending: Vec<_> = candidates
            .iter()
            .filter(|a| !known.contains(&a.lib_id))
            .cloned()
            .collect();
        info!(
            bug = bug_id,
            candidates = candidates.len(),
            from_ledger = results.len(),
            pending = pending.len(),
            "versions to analyze"
        );

        let changes = Arc::new(changes);
        if !pending.is_empty() {
            let ctx = Arc::new(AnalysisContext {
                registry: Arc::clone(&self.registry),
                ast: Arc::clone(&self.ast),
                changes: Arc::clone(&changes),
                lang: self.settings.lang,
                packaging: self.settings.packaging.clone(),
            });
            let report = analyze_all(
                &self.analysis_pool,
                ctx,
                pending,
                self.settings.analysis_timeout,
            );
            if report.unavailable {
                return Ok(BugOutcome::Unavailable);
            }
            append_ledger(&ledger, &report.results)?;
            results.extend(report.results);
        }
        results.sort();

        let ctx = Arc::new(BytecodeContext {
            ast: Arc::clone(&self.ast),
            changes: Arc::clone(&changes),
            lang: self.settings.lang,
        });
        let bytecode = compare_bytecode(
            &self.bytecode_pool,
            ctx,
            &mut results,
            self.settings.bytecode_timeout,
        );
        if bytecode.updated > 0 {
            write_ledger(&ledger, &results)?;
        }

        let verdicts = classify(&results, &changes, &manual);
        self.publish(bug_id, &verdicts, &AffectedVersionSource::COMPUTED)?;
        Ok(BugOutcome::Published {
            verdicts: verdicts.len(),
        })
    }

    fn manual_verdicts(&self, bug_id: &str) -> Result<Vec<AffectedLibrary>> {
        let mut manual = Vec::new();
        for source in [
            AffectedVersionSource::Manual,
            AffectedVersionSource::PropagateManual,
        ] {
            manual.extend(
                self.backend
                    .affected_libraries(bug_id, source)
                    .with_context(|| format!("Failed to fetch {source} verdicts of {bug_id}"))?,
            );
        }
        Ok(manual)
    }

    fn propagate_manual(&self, bug_id: &str, manual: &[AffectedLibrary]) -> Result<BugOutcome> {
        let gas: BTreeSet<(&str, &str)> = manual
            .iter()
            .filter(|m| m.source == AffectedVersionSource::Manual)
            .map(|m| (m.library_id.group.as_str(), m.library_id.artifact.as_str()))
            .collect();

        let mut versions = Vec::new();
        for (group, artifact) in gas {
            match self.registry.artifact_versions(group, artifact) {
                Ok(found) => versions.extend(
                    found
                        .into_iter()
                        .filter(|a| self.settings.filter.accepts(&a.lib_id)),
                ),
                Err(e) if e.is_unavailable() => {
                    return Err(e).with_context(|| format!("Failed to list {group}:{artifact}"));
                }
                Err(e) => warn!(bug = bug_id, %group, %artifact, error = %e, "cannot list versions"),
            }
        }

        let verdicts = propagate_manual_only(manual, &versions);
        self.publish(bug_id, &verdicts, &[AffectedVersionSource::PropagateManual])?;
        Ok(BugOutcome::Published {
            verdicts: verdicts.len(),
        })
    }

    fn publish(
        &self,
        bug_id: &str,
        verdicts: &[AffectedLibrary],
        sources: &[AffectedVersionSource],
    ) -> Result<()> {
        let sink = if self.settings.to_file {
            ResultSink::Folder(self.settings.folder.clone())
        } else {
            ResultSink::Backend(self.backend.as_ref())
        };
        publish(bug_id, verdicts, sources, &sink, self.settings.mode)?;
        Ok(())
    }

    /// Runs the bugs after `delay`, then again every `period`.
    pub fn spawn_job(self: Arc<Self>, bug_ids: Vec<String>, schedule: JobSchedule) -> JoinHandle<()> {
        std::thread::spawn(move || {
            std::thread::sleep(schedule.delay);
            loop {
                let outcomes = self.run_bugs(&bug_ids);
                let published = outcomes
                    .iter()
                    .filter(|(_, o)| matches!(o, BugOutcome::Published { .. }))
                    .count();
                info!(bugs = outcomes.len(), published, "scheduled run finished");
                std::thread::sleep(schedule.period);
            }
        })
    }
}

fn is_unavailable(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|c| c.downcast_ref::<ServiceError>().is_some_and(ServiceError::is_unavailable))
}
