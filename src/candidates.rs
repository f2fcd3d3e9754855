//! Resolution of the library versions to analyze for a bug.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::backend::{ArtifactRegistry, Backend, ServiceError};
use crate::model::{Artifact, LibraryId};

/// Allow and deny lists at group, group:artifact and group:artifact:version level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateFilter {
    pub allow_gav: Vec<String>,
    pub allow_ga: Vec<String>,
    pub allow_group: Vec<String>,
    pub deny_gav: Vec<String>,
    pub deny_ga: Vec<String>,
    pub deny_group: Vec<String>,
}

impl CandidateFilter {
    fn has_allow_list(&self) -> bool {
        !(self.allow_gav.is_empty() && self.allow_ga.is_empty() && self.allow_group.is_empty())
    }

    pub fn is_denied(&self, lib: &LibraryId) -> bool {
        matches_any(lib, &self.deny_gav, &self.deny_ga, &self.deny_group)
    }

    pub fn is_allowed(&self, lib: &LibraryId) -> bool {
        !self.has_allow_list() || matches_any(lib, &self.allow_gav, &self.allow_ga, &self.allow_group)
    }

    pub fn accepts(&self, lib: &LibraryId) -> bool {
        !self.is_denied(lib) && self.is_allowed(lib)
    }
}

fn matches_any(lib: &LibraryId, gav: &[String], ga: &[String], group: &[String]) -> bool {
    let full = lib.to_string();
    let pair = lib.ga();
    gav.iter().any(|x| x.trim() == full)
        || ga.iter().any(|x| x.trim() == pair)
        || group.iter().any(|x| x.trim() == lib.group)
}

/// Candidate artifacts for a bug: every registry version of each group:artifact
/// known to contain vulnerable code, plus directly reported versions missing
/// from the registry.
pub fn resolve_candidates(
    bug_id: &str,
    backend: &dyn Backend,
    registry: &dyn ArtifactRegistry,
    filter: &CandidateFilter,
) -> Result<Vec<Artifact>, ServiceError> {
    let reported = backend.bug_libraries(bug_id)?;
    let mut by_ga: BTreeMap<(String, String), BTreeSet<LibraryId>> = BTreeMap::new();
    for lib in reported {
        by_ga
            .entry((lib.group.clone(), lib.artifact.clone()))
            .or_default()
            .insert(lib);
    }

    let mut candidates: BTreeMap<LibraryId, Artifact> = BTreeMap::new();
    for ((group, artifact), reported) in by_ga {
        match registry.artifact_versions(&group, &artifact) {
            Ok(versions) => {
                for a in versions {
                    candidates.entry(a.lib_id.clone()).or_insert(a);
                }
            }
            Err(e) if e.is_unavailable() => return Err(e),
            Err(e) => {
                warn!(bug = bug_id, %group, %artifact, error = %e, "registry lookup failed, using reported versions only");
            }
        }
        for lib in reported {
            candidates
                .entry(lib.clone())
                .or_insert_with(|| Artifact::new(lib, None));
        }
    }

    let total = candidates.len();
    let accepted: Vec<Artifact> = candidates
        .into_values()
        .filter(|a| filter.accepts(&a.lib_id))
        .collect();
    info!(
        bug = bug_id,
        candidates = accepted.len(),
        filtered = total - accepted.len(),
        "resolved candidate versions"
    );
    Ok(accepted)
}
