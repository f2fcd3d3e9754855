//! Collaborator contracts.
//!
//! The engine talks to three services: the backend storing bugs and verdicts,
//! the artifact registry enumerating published versions, and the AST service
//! computing construct ASTs and their differences. Each is a trait so runs can
//! mix the HTTP client, the local Maven repository, and in-memory fakes.

use crate::model::{
    AffectedLibrary, AffectedVersionSource, Artifact, BugChangeList, ConstructId, ConstructType,
    LibraryId, ProgrammingLanguage,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service unavailable: {url}")]
    Unavailable { url: String },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// True for outages worth a backoff before the next bug.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub trait Backend: Send + Sync {
    fn bug(&self, bug_id: &str) -> Result<BugChangeList, ServiceError>;

    /// Libraries known to contain vulnerable code of the bug.
    fn bug_libraries(&self, bug_id: &str) -> Result<Vec<LibraryId>, ServiceError>;

    fn affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<Vec<AffectedLibrary>, ServiceError>;

    fn upload_affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
        libraries: &[AffectedLibrary],
    ) -> Result<(), ServiceError>;

    fn delete_affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<(), ServiceError>;
}

pub trait ArtifactRegistry: Send + Sync {
    fn artifact_versions(&self, group: &str, artifact: &str)
    -> Result<Vec<Artifact>, ServiceError>;

    fn artifact(&self, lib: &LibraryId) -> Result<Option<Artifact>, ServiceError>;

    fn artifact_exists(
        &self,
        lib: &LibraryId,
        sources_only: bool,
        packaging: &str,
    ) -> Result<bool, ServiceError>;

    /// Subset of `constructs` contained in the artifact. `None` when the
    /// registry could not answer.
    fn intersect_constructs(
        &self,
        lib: &LibraryId,
        constructs: &[ConstructId],
        packaging: &str,
        lang: ProgrammingLanguage,
    ) -> Result<Option<Vec<ConstructId>>, ServiceError>;
}

pub trait AstService: Send + Sync {
    /// AST of a construct in a library, from sources or from bytecode.
    fn construct_ast(
        &self,
        lib: &LibraryId,
        construct_type: ConstructType,
        qname: &str,
        sources_only: bool,
        lang: ProgrammingLanguage,
    ) -> Result<Option<String>, ServiceError>;

    /// Number of edit operations turning `left` into `right`.
    fn diff_ast(&self, left: &str, right: &str) -> Result<usize, ServiceError>;
}
