//! Per-version comparison of a library against the consolidated fix.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::assessment::{ArtifactResult, ConstructPathAssessment, NOT_COMPUTED};
use crate::backend::{ArtifactRegistry, AstService, ServiceError};
use crate::consolidate::{ConsolidatedChanges, OverallConstructChange};
use crate::model::{Artifact, ConstructId, LibraryId, ProgrammingLanguage};
use crate::pool::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("no AST for {qname} in {lib} although its sources exist")]
    AstUnavailable { lib: LibraryId, qname: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl AnalysisError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Service(e) if e.is_unavailable())
    }
}

/// What every analysis task of one bug shares.
pub struct AnalysisContext {
    pub registry: Arc<dyn ArtifactRegistry>,
    pub ast: Arc<dyn AstService>,
    pub changes: Arc<ConsolidatedChanges>,
    pub lang: ProgrammingLanguage,
    pub packaging: String,
}

#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub results: Vec<ArtifactResult>,
    pub expected: usize,
    pub returned: usize,
    /// Artifacts without a binary in the registry.
    pub skipped: usize,
    pub failed: usize,
    pub unavailable: bool,
}

/// Compares one artifact. `Ok(None)` when the registry has no binary for it.
pub fn analyze_artifact(
    ctx: &AnalysisContext,
    artifact: &Artifact,
) -> Result<Option<ArtifactResult>, AnalysisError> {
    let lib = &artifact.lib_id;
    if !ctx.registry.artifact_exists(lib, false, &ctx.packaging)? {
        debug!(lib = %lib, "no binary, skipping");
        return Ok(None);
    }

    let timestamp = match artifact.timestamp {
        Some(ts) => Some(ts),
        None => match ctx.registry.artifact(lib) {
            Ok(found) => found.and_then(|a| a.timestamp),
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => {
                warn!(lib = %lib, error = %e, "cannot fetch publish timestamp");
                None
            }
        },
    };
    let sources = ctx.registry.artifact_exists(lib, true, &ctx.packaging)?;

    let mut result = ArtifactResult::new(lib.clone(), timestamp, sources);

    let in_jar = present_constructs(ctx, lib, &ctx.changes.modified)?;
    for change in &ctx.changes.modified {
        let present = in_jar.contains(&change.construct_id);
        let mut assessment = ConstructPathAssessment::new(
            &change.construct_id.qname,
            &change.short_path(),
            change.change_type,
            present,
        );
        if present && sources && change.has_bodies() {
            let (d_to_v, d_to_f) = distances(ctx, lib, change)?;
            assessment = assessment.with_distances(d_to_v, d_to_f);
        }
        result.assessments.push(assessment);
    }

    let in_jar = present_constructs(ctx, lib, &ctx.changes.added_or_deleted)?;
    for change in &ctx.changes.added_or_deleted {
        result.assessments.push(ConstructPathAssessment::new(
            &change.construct_id.qname,
            &change.short_path(),
            change.change_type,
            in_jar.contains(&change.construct_id),
        ));
    }

    Ok(Some(result))
}

fn present_constructs(
    ctx: &AnalysisContext,
    lib: &LibraryId,
    changes: &[OverallConstructChange],
) -> Result<HashSet<ConstructId>, AnalysisError> {
    if changes.is_empty() {
        return Ok(HashSet::new());
    }
    let ids: Vec<ConstructId> = changes.iter().map(|c| c.construct_id.clone()).collect();
    match ctx
        .registry
        .intersect_constructs(lib, &ids, &ctx.packaging, ctx.lang)?
    {
        Some(found) => Ok(found.into_iter().collect()),
        None => {
            warn!(lib = %lib, constructs = ids.len(), "intersection unavailable, treating constructs as absent");
            Ok(HashSet::new())
        }
    }
}

fn distances(
    ctx: &AnalysisContext,
    lib: &LibraryId,
    change: &OverallConstructChange,
) -> Result<(i32, i32), AnalysisError> {
    let id = &change.construct_id;
    let ast = ctx
        .ast
        .construct_ast(lib, id.construct_type, &id.qname, true, ctx.lang)?
        .ok_or_else(|| AnalysisError::AstUnavailable {
            lib: lib.clone(),
            qname: id.qname.clone(),
        })?;

    let d_to_v = match change.buggy_body.as_deref() {
        Some(buggy) => edit_distance(ctx.ast.diff_ast(buggy, &ast)?),
        None => NOT_COMPUTED,
    };
    let d_to_f = match change.fixed_body.as_deref() {
        Some(fixed) => edit_distance(ctx.ast.diff_ast(&ast, fixed)?),
        None => NOT_COMPUTED,
    };
    Ok((d_to_v, d_to_f))
}

fn edit_distance(edits: usize) -> i32 {
    i32::try_from(edits).unwrap_or(i32::MAX)
}

/// Analyzes every artifact on the pool and returns the successful rows.
pub fn analyze_all(
    pool: &WorkerPool,
    ctx: Arc<AnalysisContext>,
    artifacts: Vec<Artifact>,
    timeout: Option<Duration>,
) -> AnalysisReport {
    let outcome = pool.run(artifacts, timeout, move |artifact: Artifact| {
        let out = analyze_artifact(&ctx, &artifact);
        if let Err(e) = &out {
            error!(lib = %artifact.lib_id, error = %e, "analysis task failed");
        }
        out
    });

    let mut report = AnalysisReport {
        expected: outcome.expected,
        returned: outcome.returned(),
        failed: outcome.panicked,
        ..AnalysisReport::default()
    };
    for out in outcome.results {
        match out {
            Ok(Some(result)) => report.results.push(result),
            Ok(None) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                report.unavailable |= e.is_unavailable();
            }
        }
    }
    report.results.sort();

    info!(
        returned = report.returned,
        expected = report.expected,
        analyzed = report.results.len(),
        skipped = report.skipped,
        failed = report.failed,
        "version analysis finished"
    );
    report
}
