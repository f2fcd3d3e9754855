//! Publication of verdicts, per source, to the backend or to JSON files.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::model::{AffectedLibrary, AffectedVersionSource, LibraryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Upload only verdicts whose library is not stored yet for the source.
    #[default]
    Incremental,
    /// Replace everything stored for the source.
    Override,
}

pub enum ResultSink<'a> {
    Backend(&'a dyn Backend),
    /// One `{bug}_{SOURCE}_.json` document per source.
    Folder(PathBuf),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub uploaded: BTreeMap<AffectedVersionSource, usize>,
    pub deleted: Vec<AffectedVersionSource>,
}

pub fn result_file(folder: &Path, bug_id: &str, source: AffectedVersionSource) -> PathBuf {
    folder.join(format!("{bug_id}_{source}_.json"))
}

/// Publishes `verdicts` for the given sources. Sources among the stale
/// cleanup set without any verdict lose their stored results.
pub fn publish(
    bug_id: &str,
    verdicts: &[AffectedLibrary],
    sources: &[AffectedVersionSource],
    sink: &ResultSink<'_>,
    mode: PublishMode,
) -> Result<PublishReport> {
    let mut by_source: BTreeMap<AffectedVersionSource, Vec<AffectedLibrary>> = BTreeMap::new();
    for v in verdicts {
        by_source.entry(v.source).or_default().push(v.clone());
    }

    let mut report = PublishReport::default();
    for &source in sources {
        let fresh = by_source.remove(&source).unwrap_or_default();
        let cleanup = AffectedVersionSource::STALE_CLEANUP.contains(&source);
        match sink {
            ResultSink::Backend(backend) => {
                publish_to_backend(*backend, bug_id, source, fresh, cleanup, mode, &mut report)?
            }
            ResultSink::Folder(folder) => {
                publish_to_folder(folder, bug_id, source, &fresh, cleanup, &mut report)?
            }
        }
    }

    info!(
        bug = bug_id,
        uploaded = report.uploaded.values().sum::<usize>(),
        deleted = report.deleted.len(),
        "published verdicts"
    );
    Ok(report)
}

fn publish_to_backend(
    backend: &dyn Backend,
    bug_id: &str,
    source: AffectedVersionSource,
    fresh: Vec<AffectedLibrary>,
    cleanup: bool,
    mode: PublishMode,
    report: &mut PublishReport,
) -> Result<()> {
    let stored = backend
        .affected_libraries(bug_id, source)
        .with_context(|| format!("Failed to fetch stored {source} verdicts of {bug_id}"))?;

    if fresh.is_empty() {
        if cleanup && !stored.is_empty() {
            backend
                .delete_affected_libraries(bug_id, source)
                .with_context(|| format!("Failed to delete stale {source} verdicts of {bug_id}"))?;
            info!(bug = bug_id, %source, stale = stored.len(), "deleted stale verdicts");
            report.deleted.push(source);
        }
        return Ok(());
    }

    let upload = match mode {
        PublishMode::Override => {
            if !stored.is_empty() {
                backend
                    .delete_affected_libraries(bug_id, source)
                    .with_context(|| format!("Failed to delete {source} verdicts of {bug_id}"))?;
                report.deleted.push(source);
            }
            fresh
        }
        PublishMode::Incremental => {
            let known: Vec<&LibraryId> = stored.iter().map(|s| &s.library_id).collect();
            fresh
                .into_iter()
                .filter(|v| !known.contains(&&v.library_id))
                .collect()
        }
    };

    info!(bug = bug_id, %source, stored = stored.len(), new = upload.len(), "verdicts to upload");
    if upload.is_empty() {
        return Ok(());
    }
    backend
        .upload_affected_libraries(bug_id, source, &upload)
        .with_context(|| format!("Failed to upload {source} verdicts of {bug_id}"))?;
    report.uploaded.insert(source, upload.len());
    Ok(())
}

fn publish_to_folder(
    folder: &Path,
    bug_id: &str,
    source: AffectedVersionSource,
    fresh: &[AffectedLibrary],
    cleanup: bool,
    report: &mut PublishReport,
) -> Result<()> {
    let path = result_file(folder, bug_id, source);
    if fresh.is_empty() {
        if cleanup && path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove result file: {}", path.display()))?;
            report.deleted.push(source);
        }
        return Ok(());
    }

    std::fs::create_dir_all(folder)
        .with_context(|| format!("Failed to create result directory: {}", folder.display()))?;
    let json = serde_json::to_string_pretty(fresh)?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write result file: {}", path.display()))?;
    debug!(path = %path.display(), verdicts = fresh.len(), "wrote result file");
    report.uploaded.insert(source, fresh.len());
    Ok(())
}
