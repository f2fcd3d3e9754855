//! Bytecode fallback for versions published without sources.
//!
//! Versions whose source AST equals the vulnerable or the fixed body become
//! references for their construct. A version without any computed distance is
//! then compared at bytecode level against those references: byte-identical
//! to vulnerable references only gives `dToV = 0`, to fixed references only
//! gives `dToF = 0`.
//!
//! The reference registry is owned by one thread; workers talk to it through
//! a cloneable handle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::assessment::{ArtifactResult, ConstructPathAssessment, NOT_COMPUTED};
use crate::backend::AstService;
use crate::consolidate::ConsolidatedChanges;
use crate::model::{ConstructType, LibraryId, ProgrammingLanguage};
use crate::pool::WorkerPool;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstructKey {
    pub qname: String,
    pub path: String,
}

impl ConstructKey {
    pub fn of(assessment: &ConstructPathAssessment) -> Self {
        Self {
            qname: assessment.qname.clone(),
            path: assessment.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Vulnerable,
    Fixed,
}

/// Reference libraries of one construct and their bytecode ASTs fetched so far.
#[derive(Debug, Clone)]
pub struct References {
    pub construct_type: ConstructType,
    pub vulnerable: BTreeSet<LibraryId>,
    pub fixed: BTreeSet<LibraryId>,
    pub asts: BTreeMap<LibraryId, String>,
}

impl References {
    fn new(construct_type: ConstructType) -> Self {
        Self {
            construct_type,
            vulnerable: BTreeSet::new(),
            fixed: BTreeSet::new(),
            asts: BTreeMap::new(),
        }
    }

    pub fn cardinality(&self) -> usize {
        self.vulnerable.len() + self.fixed.len()
    }
}

enum Request {
    Register {
        key: ConstructKey,
        construct_type: ConstructType,
        lib: LibraryId,
        side: Side,
    },
    Snapshot {
        key: ConstructKey,
        reply: Sender<Option<References>>,
    },
    StoreAst {
        key: ConstructKey,
        lib: LibraryId,
        ast: String,
    },
}

#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: Sender<Request>,
}

impl RegistryHandle {
    pub fn register(&self, key: ConstructKey, construct_type: ConstructType, lib: LibraryId, side: Side) {
        let _ = self.tx.send(Request::Register {
            key,
            construct_type,
            lib,
            side,
        });
    }

    pub fn snapshot(&self, key: &ConstructKey) -> Option<References> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Request::Snapshot {
                key: key.clone(),
                reply,
            })
            .ok()?;
        rx.recv().ok().flatten()
    }

    pub fn store_ast(&self, key: &ConstructKey, lib: &LibraryId, ast: &str) {
        let _ = self.tx.send(Request::StoreAst {
            key: key.clone(),
            lib: lib.clone(),
            ast: ast.to_string(),
        });
    }
}

pub struct BytecodeRegistry {
    tx: Option<Sender<Request>>,
    handle: Option<JoinHandle<usize>>,
}

impl BytecodeRegistry {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<Request>();
        let handle = spawn_owner(rx);
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> Option<RegistryHandle> {
        self.tx.as_ref().map(|tx| RegistryHandle { tx: tx.clone() })
    }

    /// Stops the owner thread once every handle is gone. Returns the number
    /// of construct paths that had references.
    pub fn shutdown(&mut self) -> usize {
        self.tx.take();
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }

    /// Lets the owner thread finish on its own, for workers still holding handles.
    pub fn detach(&mut self) {
        self.tx.take();
        self.handle.take();
    }
}

fn spawn_owner(rx: Receiver<Request>) -> JoinHandle<usize> {
    std::thread::spawn(move || {
        let mut entries: BTreeMap<ConstructKey, References> = BTreeMap::new();
        for request in rx {
            match request {
                Request::Register {
                    key,
                    construct_type,
                    lib,
                    side,
                } => {
                    let refs = entries
                        .entry(key)
                        .or_insert_with(|| References::new(construct_type));
                    match side {
                        Side::Vulnerable => refs.vulnerable.insert(lib),
                        Side::Fixed => refs.fixed.insert(lib),
                    };
                }
                Request::Snapshot { key, reply } => {
                    let _ = reply.send(entries.get(&key).cloned());
                }
                Request::StoreAst { key, lib, ast } => {
                    if let Some(refs) = entries.get_mut(&key) {
                        refs.asts.insert(lib, ast);
                    }
                }
            }
        }
        entries.len()
    })
}

pub struct BytecodeContext {
    pub ast: Arc<dyn AstService>,
    pub changes: Arc<ConsolidatedChanges>,
    pub lang: ProgrammingLanguage,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BytecodeReport {
    pub construct_paths: usize,
    pub candidates: usize,
    pub compared: usize,
    /// Libraries whose recorded comparison count changed.
    pub updated: usize,
    pub resolved: usize,
    pub timed_out: bool,
}

/// What one library comparison changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LibraryOutcome {
    compared: bool,
    resolved: bool,
}

/// Reference side of an assessment computed from sources, if any.
fn reference_side(a: &ConstructPathAssessment) -> Option<Side> {
    if !a.is_mod() || a.is_conflict() {
        return None;
    }
    if a.d_to_v == 0 && a.d_to_f != NOT_COMPUTED {
        Some(Side::Vulnerable)
    } else if a.d_to_f == 0 && a.d_to_v != NOT_COMPUTED {
        Some(Side::Fixed)
    } else {
        None
    }
}

/// A library none of whose in-binary modified constructs has a distance.
pub fn is_candidate(result: &ArtifactResult) -> bool {
    let mut in_jar = result
        .assessments
        .iter()
        .filter(|a| a.is_mod() && a.qname_in_jar)
        .peekable();
    in_jar.peek().is_some() && in_jar.all(|a| !a.has_distances())
}

/// Resolves candidate libraries in place and returns what was done.
pub fn compare_bytecode(
    pool: &WorkerPool,
    ctx: Arc<BytecodeContext>,
    results: &mut [ArtifactResult],
    timeout: Option<Duration>,
) -> BytecodeReport {
    let mut registry = BytecodeRegistry::spawn();
    let Some(handle) = registry.handle() else {
        return BytecodeReport::default();
    };

    for result in results.iter() {
        for a in &result.assessments {
            let Some(side) = reference_side(a) else {
                continue;
            };
            let Some(change) = ctx.changes.find(&a.qname, &a.path) else {
                continue;
            };
            handle.register(
                ConstructKey::of(a),
                change.construct_id.construct_type,
                result.lib.clone(),
                side,
            );
        }
    }

    let tasks: Vec<(usize, ArtifactResult)> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| is_candidate(r))
        .map(|(i, r)| (i, r.clone()))
        .collect();
    let candidates = tasks.len();

    let task_handle = handle.clone();
    let outcome = pool.run(tasks, timeout, move |(index, mut result): (usize, ArtifactResult)| {
        let changed = compare_library(&ctx, &task_handle, &mut result);
        (index, result, changed)
    });
    drop(handle);

    let mut report = BytecodeReport {
        candidates,
        compared: outcome.returned(),
        timed_out: outcome.timed_out,
        ..BytecodeReport::default()
    };
    for (index, result, changed) in outcome.results {
        report.updated += usize::from(changed.compared);
        report.resolved += usize::from(changed.resolved);
        if let Some(slot) = results.get_mut(index) {
            *slot = result;
        }
    }
    if outcome.timed_out {
        registry.detach();
    } else {
        report.construct_paths = registry.shutdown();
    }

    info!(
        candidates = report.candidates,
        compared = report.compared,
        updated = report.updated,
        resolved = report.resolved,
        construct_paths = report.construct_paths,
        "bytecode comparison finished"
    );
    report
}

/// Compares every pending construct of one library against the references
/// registered since its last comparison.
fn compare_library(
    ctx: &BytecodeContext,
    registry: &RegistryHandle,
    result: &mut ArtifactResult,
) -> LibraryOutcome {
    let mut changed = LibraryOutcome::default();
    let lib = result.lib.clone();

    for a in result.assessments.iter_mut() {
        if !a.is_mod() || !a.qname_in_jar || a.qname.contains('$') {
            continue;
        }
        let key = ConstructKey::of(a);
        let Some(refs) = registry.snapshot(&key) else {
            continue;
        };
        let cardinality = refs.cardinality();
        if cardinality == 0 || a.done_comparisons == cardinality {
            continue;
        }

        let own = match ctx
            .ast
            .construct_ast(&lib, refs.construct_type, &a.qname, false, ctx.lang)
        {
            Ok(Some(ast)) => ast,
            Ok(None) => {
                debug!(lib = %lib, qname = %a.qname, "no bytecode AST");
                continue;
            }
            Err(e) => {
                warn!(lib = %lib, qname = %a.qname, error = %e, "bytecode AST request failed");
                continue;
            }
        };

        let same_v = identical_references(ctx, registry, &key, &refs, &refs.vulnerable, &own);
        let same_f = identical_references(ctx, registry, &key, &refs, &refs.fixed, &own);

        a.done_comparisons = cardinality;
        changed.compared = true;
        a.same_bytecode.extend(same_v.iter().cloned());
        a.same_bytecode.extend(same_f.iter().cloned());
        match (same_v.is_empty(), same_f.is_empty()) {
            (false, true) => {
                a.d_to_v = 0;
                changed.resolved = true;
            }
            (true, false) => {
                a.d_to_f = 0;
                changed.resolved = true;
            }
            (false, false) => {
                error!(
                    lib = %lib,
                    qname = %a.qname,
                    "bytecode identical to both vulnerable and fixed references"
                );
            }
            (true, true) => {}
        }
    }
    changed
}

fn identical_references(
    ctx: &BytecodeContext,
    registry: &RegistryHandle,
    key: &ConstructKey,
    refs: &References,
    libs: &BTreeSet<LibraryId>,
    own: &str,
) -> BTreeSet<LibraryId> {
    let mut same = BTreeSet::new();
    for reference in libs {
        let ast = match refs.asts.get(reference) {
            Some(ast) => ast.clone(),
            None => match ctx
                .ast
                .construct_ast(reference, refs.construct_type, &key.qname, false, ctx.lang)
            {
                Ok(Some(ast)) => {
                    registry.store_ast(key, reference, &ast);
                    ast
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(lib = %reference, qname = %key.qname, error = %e, "reference AST request failed");
                    continue;
                }
            },
        };
        match ctx.ast.diff_ast(&ast, own) {
            Ok(0) => {
                same.insert(reference.clone());
            }
            Ok(_) => {}
            Err(e) => warn!(lib = %reference, qname = %key.qname, error = %e, "bytecode diff failed"),
        }
    }
    same
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::consolidate;
    use crate::model::{ConstructChange, ConstructChangeType, ConstructId};
    use crate::testing::FakeServices;

    const QNAME: &str = "org.example.Codec.decode(byte[])";

    fn lib(v: &str) -> LibraryId {
        LibraryId::new("org.example", "codec", v)
    }

    fn changes() -> ConsolidatedChanges {
        consolidate(&[ConstructChange {
            repo: String::new(),
            commit: "c1".to_string(),
            repo_path: "codec/src/main/java/org/example/Codec.java".to_string(),
            construct_id: ConstructId::new(ProgrammingLanguage::Java, ConstructType::METH, QNAME),
            construct_change_type: ConstructChangeType::MOD,
            committed_at: None,
            buggy_body: Some("vvvv".to_string()),
            fixed_body: Some("ffff".to_string()),
        }])
    }

    fn result(v: &str, ts: i64, d_to_v: i32, d_to_f: i32) -> ArtifactResult {
        let mut r = ArtifactResult::new(lib(v), Some(ts), d_to_v != NOT_COMPUTED);
        r.assessments.push(
            ConstructPathAssessment::new(QNAME, "codec", ConstructChangeType::MOD, true)
                .with_distances(d_to_v, d_to_f),
        );
        r
    }

    #[test]
    fn registry_owner_answers_snapshots() {
        let mut registry = BytecodeRegistry::spawn();
        let handle = registry.handle().unwrap();
        let key = ConstructKey {
            qname: QNAME.to_string(),
            path: "codec".to_string(),
        };
        handle.register(key.clone(), ConstructType::METH, lib("1.0"), Side::Vulnerable);
        handle.register(key.clone(), ConstructType::METH, lib("1.0"), Side::Vulnerable);
        handle.register(key.clone(), ConstructType::METH, lib("2.0"), Side::Fixed);
        handle.store_ast(&key, &lib("1.0"), "ast");

        let refs = handle.snapshot(&key).unwrap();
        assert_eq!(refs.cardinality(), 2);
        assert_eq!(refs.asts.get(&lib("1.0")).map(String::as_str), Some("ast"));
        drop(handle);
        assert_eq!(registry.shutdown(), 1);
    }

    #[test]
    fn candidate_requires_no_distance_on_any_in_binary_construct() {
        assert!(is_candidate(&result("1.1", 2, NOT_COMPUTED, NOT_COMPUTED)));
        assert!(!is_candidate(&result("1.0", 1, 0, 4)));
        let mut partial = result("1.2", 3, NOT_COMPUTED, NOT_COMPUTED);
        partial.assessments.push(
            ConstructPathAssessment::new("org.example.Codec.encode()", "codec", ConstructChangeType::MOD, true)
                .with_distances(2, NOT_COMPUTED),
        );
        assert!(!is_candidate(&partial));
    }

    #[test]
    fn resolves_binary_only_versions_against_references() -> anyhow::Result<()> {
        let services = Arc::new(FakeServices::default());
        services.put_ast(&lib("1.0"), QNAME, false, "bin-v");
        services.put_ast(&lib("2.0"), QNAME, false, "bin-f");
        services.put_ast(&lib("1.1"), QNAME, false, "bin-v");
        services.put_ast(&lib("2.1"), QNAME, false, "bin-f");
        services.put_ast(&lib("3.0"), QNAME, false, "bin-x");

        let mut results = vec![
            result("1.0", 1, 0, 4),
            result("1.1", 2, NOT_COMPUTED, NOT_COMPUTED),
            result("2.0", 3, 4, 0),
            result("2.1", 4, NOT_COMPUTED, NOT_COMPUTED),
            result("3.0", 5, NOT_COMPUTED, NOT_COMPUTED),
        ];
        let ctx = Arc::new(BytecodeContext {
            ast: services.clone(),
            changes: Arc::new(changes()),
            lang: ProgrammingLanguage::Java,
        });
        let pool = WorkerPool::new("bytecode-test", 2)?;
        let report = compare_bytecode(&pool, ctx.clone(), &mut results, None);

        assert_eq!(report.candidates, 3);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.updated, 3);
        assert_eq!(report.construct_paths, 1);

        let v11 = &results[1].assessments[0];
        assert_eq!((v11.d_to_v, v11.d_to_f), (0, NOT_COMPUTED));
        assert!(v11.same_bytecode.contains(&lib("1.0")));
        assert_eq!(v11.done_comparisons, 2);

        let v21 = &results[3].assessments[0];
        assert_eq!((v21.d_to_v, v21.d_to_f), (NOT_COMPUTED, 0));

        let v30 = &results[4].assessments[0];
        assert!(!v30.has_distances());
        assert_eq!(v30.done_comparisons, 2);

        let requests = services.ast_requests();
        let again = compare_bytecode(&pool, ctx, &mut results, None);
        assert_eq!(again.resolved, 0);
        assert_eq!(again.updated, 0);
        assert_eq!(services.ast_requests(), requests);
        Ok(())
    }

    fn context(services: &Arc<FakeServices>) -> Arc<BytecodeContext> {
        Arc::new(BytecodeContext {
            ast: services.clone(),
            changes: Arc::new(changes()),
            lang: ProgrammingLanguage::Java,
        })
    }

    #[test]
    fn already_compared_rows_are_skipped() -> anyhow::Result<()> {
        let services = Arc::new(FakeServices::default());
        services.put_ast(&lib("1.0"), QNAME, false, "bin-v");
        services.put_ast(&lib("2.0"), QNAME, false, "bin-f");
        services.put_ast(&lib("3.0"), QNAME, false, "bin-v");

        let mut done = result("3.0", 5, NOT_COMPUTED, NOT_COMPUTED);
        done.assessments[0].done_comparisons = 2;
        let mut results = vec![result("1.0", 1, 0, 4), result("2.0", 3, 4, 0), done];

        let pool = WorkerPool::new("bytecode-test", 2)?;
        let report = compare_bytecode(&pool, context(&services), &mut results, None);

        assert_eq!(report.candidates, 1);
        assert_eq!((report.updated, report.resolved), (0, 0));
        assert_eq!(services.ast_requests(), 0);
        assert!(!results[2].assessments[0].has_distances());
        Ok(())
    }

    #[test]
    fn new_reference_reopens_comparison() -> anyhow::Result<()> {
        let services = Arc::new(FakeServices::default());
        services.put_ast(&lib("1.0"), QNAME, false, "bin-v");
        services.put_ast(&lib("2.0"), QNAME, false, "bin-f");
        services.put_ast(&lib("3.0"), QNAME, false, "bin-f");

        // Compared once while 2.0 was not yet a reference.
        let mut earlier = result("3.0", 5, NOT_COMPUTED, NOT_COMPUTED);
        earlier.assessments[0].done_comparisons = 1;
        let mut results = vec![result("1.0", 1, 0, 4), result("2.0", 3, 4, 0), earlier];

        let pool = WorkerPool::new("bytecode-test", 2)?;
        let report = compare_bytecode(&pool, context(&services), &mut results, None);

        assert_eq!((report.updated, report.resolved), (1, 1));
        let reopened = &results[2].assessments[0];
        assert_eq!(reopened.done_comparisons, 2);
        assert_eq!((reopened.d_to_v, reopened.d_to_f), (NOT_COMPUTED, 0));
        assert!(reopened.same_bytecode.contains(&lib("2.0")));
        Ok(())
    }
}
