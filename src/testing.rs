//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::backend::{ArtifactRegistry, AstService, Backend, ServiceError};
use crate::model::{
    AffectedLibrary, AffectedVersionSource, Artifact, BugChangeList, ConstructId, ConstructType,
    LibraryId, ProgrammingLanguage,
};

#[derive(Debug, Default)]
struct State {
    bugs: BTreeMap<String, BugChangeList>,
    bug_libs: BTreeMap<String, Vec<LibraryId>>,
    versions: BTreeMap<(String, String), Vec<Artifact>>,
    binaries: BTreeSet<LibraryId>,
    sources: BTreeSet<LibraryId>,
    contents: BTreeMap<LibraryId, BTreeSet<String>>,
    asts: BTreeMap<(LibraryId, String, bool), String>,
    verdicts: BTreeMap<(String, AffectedVersionSource), Vec<AffectedLibrary>>,
    failing: BTreeSet<(String, String)>,
    unavailable: bool,
    uploads: Vec<(String, AffectedVersionSource, usize)>,
    deletes: Vec<(String, AffectedVersionSource)>,
    ast_requests: usize,
}

/// Backend, registry and AST service in one value.
///
/// Registered versions have a binary; sources, jar contents and ASTs are
/// opt-in. A library without explicit contents contains every construct.
/// ASTs are plain strings and their edit count is the number of differing
/// positions.
#[derive(Debug, Default)]
pub struct FakeServices {
    state: Mutex<State>,
}

impl FakeServices {
    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn add_bug(&self, bug: BugChangeList) {
        self.with(|s| {
            s.bugs.insert(bug.bug_id.clone(), bug);
        });
    }

    pub fn add_bug_library(&self, bug_id: &str, lib: LibraryId) {
        self.with(|s| s.bug_libs.entry(bug_id.to_string()).or_default().push(lib));
    }

    pub fn add_version(&self, lib: LibraryId, timestamp: Option<i64>) {
        self.with(|s| {
            s.binaries.insert(lib.clone());
            s.versions
                .entry((lib.group.clone(), lib.artifact.clone()))
                .or_default()
                .push(Artifact::new(lib, timestamp));
        });
    }

    pub fn add_sources(&self, lib: &LibraryId) {
        self.with(|s| {
            s.sources.insert(lib.clone());
        });
    }

    pub fn set_contents(&self, lib: &LibraryId, qnames: &[&str]) {
        self.with(|s| {
            s.contents
                .insert(lib.clone(), qnames.iter().map(|q| q.to_string()).collect());
        });
    }

    pub fn put_ast(&self, lib: &LibraryId, qname: &str, sources_only: bool, ast: &str) {
        self.with(|s| {
            s.asts
                .insert((lib.clone(), qname.to_string(), sources_only), ast.to_string());
        });
    }

    pub fn add_verdicts(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
        verdicts: Vec<AffectedLibrary>,
    ) {
        self.with(|s| {
            s.verdicts
                .entry((bug_id.to_string(), source))
                .or_default()
                .extend(verdicts);
        });
    }

    pub fn stored(&self, bug_id: &str, source: AffectedVersionSource) -> Vec<AffectedLibrary> {
        self.with(|s| {
            s.verdicts
                .get(&(bug_id.to_string(), source))
                .cloned()
                .unwrap_or_default()
        })
    }

    pub fn fail_versions_for(&self, group: &str, artifact: &str) {
        self.with(|s| {
            s.failing.insert((group.to_string(), artifact.to_string()));
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.with(|s| s.unavailable = unavailable);
    }

    pub fn uploads(&self) -> Vec<(String, AffectedVersionSource, usize)> {
        self.with(|s| s.uploads.clone())
    }

    pub fn deletes(&self) -> Vec<(String, AffectedVersionSource)> {
        self.with(|s| s.deletes.clone())
    }

    pub fn ast_requests(&self) -> usize {
        self.with(|s| s.ast_requests)
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.with(|s| s.unavailable) {
            return Err(ServiceError::Unavailable {
                url: "fake://services".to_string(),
            });
        }
        Ok(())
    }
}

impl Backend for FakeServices {
    fn bug(&self, bug_id: &str) -> Result<BugChangeList, ServiceError> {
        self.check_available()?;
        self.with(|s| s.bugs.get(bug_id).cloned())
            .ok_or_else(|| ServiceError::NotFound {
                url: format!("fake://bugs/{bug_id}"),
            })
    }

    fn bug_libraries(&self, bug_id: &str) -> Result<Vec<LibraryId>, ServiceError> {
        self.check_available()?;
        Ok(self.with(|s| s.bug_libs.get(bug_id).cloned().unwrap_or_default()))
    }

    fn affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<Vec<AffectedLibrary>, ServiceError> {
        self.check_available()?;
        Ok(self.stored(bug_id, source))
    }

    fn upload_affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
        libraries: &[AffectedLibrary],
    ) -> Result<(), ServiceError> {
        self.check_available()?;
        self.with(|s| {
            s.uploads.push((bug_id.to_string(), source, libraries.len()));
            let stored = s.verdicts.entry((bug_id.to_string(), source)).or_default();
            for lib in libraries {
                stored.retain(|x| x.library_id != lib.library_id);
                stored.push(lib.clone());
            }
        });
        Ok(())
    }

    fn delete_affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<(), ServiceError> {
        self.check_available()?;
        self.with(|s| {
            s.deletes.push((bug_id.to_string(), source));
            s.verdicts.remove(&(bug_id.to_string(), source));
        });
        Ok(())
    }
}

impl ArtifactRegistry for FakeServices {
    fn artifact_versions(&self, group: &str, artifact: &str) -> Result<Vec<Artifact>, ServiceError> {
        self.check_available()?;
        let key = (group.to_string(), artifact.to_string());
        self.with(|s| {
            if s.failing.contains(&key) {
                return Err(ServiceError::Status {
                    status: 500,
                    url: format!("fake://artifacts/{group}/{artifact}"),
                });
            }
            Ok(s.versions.get(&key).cloned().unwrap_or_default())
        })
    }

    fn artifact(&self, lib: &LibraryId) -> Result<Option<Artifact>, ServiceError> {
        self.check_available()?;
        Ok(self.with(|s| {
            s.versions
                .get(&(lib.group.clone(), lib.artifact.clone()))
                .and_then(|all| all.iter().find(|a| &a.lib_id == lib).cloned())
        }))
    }

    fn artifact_exists(
        &self,
        lib: &LibraryId,
        sources_only: bool,
        _packaging: &str,
    ) -> Result<bool, ServiceError> {
        self.check_available()?;
        Ok(self.with(|s| {
            if sources_only {
                s.sources.contains(lib)
            } else {
                s.binaries.contains(lib)
            }
        }))
    }

    fn intersect_constructs(
        &self,
        lib: &LibraryId,
        constructs: &[ConstructId],
        _packaging: &str,
        _lang: ProgrammingLanguage,
    ) -> Result<Option<Vec<ConstructId>>, ServiceError> {
        self.check_available()?;
        Ok(self.with(|s| {
            if !s.binaries.contains(lib) {
                return None;
            }
            Some(match s.contents.get(lib) {
                Some(qnames) => constructs
                    .iter()
                    .filter(|c| qnames.contains(&c.qname))
                    .cloned()
                    .collect(),
                None => constructs.to_vec(),
            })
        }))
    }
}

impl AstService for FakeServices {
    fn construct_ast(
        &self,
        lib: &LibraryId,
        _construct_type: ConstructType,
        qname: &str,
        sources_only: bool,
        _lang: ProgrammingLanguage,
    ) -> Result<Option<String>, ServiceError> {
        self.check_available()?;
        Ok(self.with(|s| {
            s.ast_requests += 1;
            s.asts
                .get(&(lib.clone(), qname.to_string(), sources_only))
                .cloned()
        }))
    }

    fn diff_ast(&self, left: &str, right: &str) -> Result<usize, ServiceError> {
        self.check_available()?;
        let differing = left
            .chars()
            .zip(right.chars())
            .filter(|(a, b)| a != b)
            .count();
        Ok(differing + left.chars().count().abs_diff(right.chars().count()))
    }
}
