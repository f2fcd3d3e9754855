//! Persistent store for construct ASTs and AST-diff edit counts.
//!
//! Uses LMDB (via heed). Released artifacts never change, so an AST fetched
//! for a (library, construct) pair and the edit count between two ASTs stay
//! valid across runs. Diff entries are keyed by the SHA-256 digests of both
//! operands.

use anyhow::{Context, Result};
use heed::types::Str;
use heed::{Database, Env, EnvFlags, EnvOpenOptions, RoTxn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::backend::{AstService, ServiceError};
use crate::model::{ConstructType, LibraryId, ProgrammingLanguage};

pub const CONSTRUCT_ASTS_DB: &str = "construct_asts";
pub const AST_DIFFS_DB: &str = "ast_diffs";

const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const DEFAULT_MAX_DBS: u32 = 8;

type StrDb = Database<Str, Str>;

#[derive(Debug, Clone)]
pub struct AstStore {
    env: Arc<Env>,
    db_path: PathBuf,
    asts: StrDb,
    diffs: StrDb,
}

impl AstStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let env = Arc::new(open_env(&db_path)?);
        let mut wtxn = env.write_txn()?;
        let asts = env.create_database::<Str, Str>(&mut wtxn, Some(CONSTRUCT_ASTS_DB))?;
        let diffs = env.create_database::<Str, Str>(&mut wtxn, Some(AST_DIFFS_DB))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db_path,
            asts,
            diffs,
        })
    }

    pub fn get_ast(&self, key: &str) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.asts.get(&rtxn, key)?.map(str::to_string))
    }

    pub fn put_ast(&self, key: &str, ast: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.asts.put(&mut wtxn, key, ast)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get_diff(&self, key: &str) -> Result<Option<usize>> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .diffs
            .get(&rtxn, key)?
            .and_then(|v| v.parse::<usize>().ok()))
    }

    pub fn put_diff(&self, key: &str, edits: usize) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.diffs.put(&mut wtxn, key, &edits.to_string())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let rtxn = self.env.read_txn()?;
        Ok(StoreStats {
            db_path: self.db_path.to_string_lossy().to_string(),
            construct_asts: table_len(&self.asts, &rtxn)?,
            ast_diffs: table_len(&self.diffs, &rtxn)?,
        })
    }
}

pub fn ast_key(
    lib: &LibraryId,
    construct_type: ConstructType,
    qname: &str,
    sources_only: bool,
) -> String {
    let origin = if sources_only { "src" } else { "bin" };
    format!("{lib}|{construct_type}|{qname}|{origin}")
}

pub fn diff_key(left: &str, right: &str) -> String {
    format!(
        "{}:{}",
        hex::encode(Sha256::digest(left.as_bytes())),
        hex::encode(Sha256::digest(right.as_bytes()))
    )
}

/// `AstService` decorator answering from the store before asking the service.
pub struct CachedAstService {
    inner: Arc<dyn AstService>,
    store: AstStore,
}

impl CachedAstService {
    pub fn new(inner: Arc<dyn AstService>, store: AstStore) -> Self {
        Self { inner, store }
    }
}

impl AstService for CachedAstService {
    fn construct_ast(
        &self,
        lib: &LibraryId,
        construct_type: ConstructType,
        qname: &str,
        sources_only: bool,
        lang: ProgrammingLanguage,
    ) -> Result<Option<String>, ServiceError> {
        let key = ast_key(lib, construct_type, qname, sources_only);
        match self.store.get_ast(&key) {
            Ok(Some(ast)) => return Ok(Some(ast)),
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "ast store read failed"),
        }
        let ast = self
            .inner
            .construct_ast(lib, construct_type, qname, sources_only, lang)?;
        if let Some(ast) = ast.as_deref()
            && let Err(e) = self.store.put_ast(&key, ast)
        {
            warn!(key, error = %e, "ast store write failed");
        }
        Ok(ast)
    }

    fn diff_ast(&self, left: &str, right: &str) -> Result<usize, ServiceError> {
        let key = diff_key(left, right);
        match self.store.get_diff(&key) {
            Ok(Some(edits)) => return Ok(edits),
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "diff store read failed"),
        }
        let edits = self.inner.diff_ast(left, right)?;
        if let Err(e) = self.store.put_diff(&key, edits) {
            warn!(key, error = %e, "diff store write failed");
        }
        Ok(edits)
    }
}

fn open_env(db_path: &Path) -> Result<Env> {
    let mut options = EnvOpenOptions::new();
    options.map_size(DEFAULT_MAP_SIZE);
    options.max_dbs(DEFAULT_MAX_DBS);
    // SAFETY: default LMDB locking stays on; NO_SUB_DIR keeps the single-file layout of --db.
    unsafe {
        options.flags(EnvFlags::NO_SUB_DIR);
        options
            .open(db_path)
            .with_context(|| format!("Failed to create/open db env: {}", db_path.display()))
    }
}

fn table_len(db: &StrDb, rtxn: &RoTxn<'_>) -> Result<u64> {
    let mut count = 0u64;
    for item in db.iter(rtxn)? {
        let _ = item?;
        count += 1;
    }
    Ok(count)
}

#[derive(Debug, serde::Serialize)]
pub struct StoreStats {
    pub db_path: String,
    pub construct_asts: u64,
    pub ast_diffs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAst {
        calls: AtomicUsize,
    }

    impl AstService for CountingAst {
        fn construct_ast(
            &self,
            _lib: &LibraryId,
            _construct_type: ConstructType,
            qname: &str,
            _sources_only: bool,
            _lang: ProgrammingLanguage,
        ) -> Result<Option<String>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(format!("{{\"q\":\"{qname}\"}}")))
        }

        fn diff_ast(&self, left: &str, right: &str) -> Result<usize, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if left == right { 0 } else { 3 })
        }
    }

    #[test]
    fn cached_service_answers_repeated_requests_from_store() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = AstStore::open(dir.path().join("db.lmdb"))?;
        let inner = Arc::new(CountingAst {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedAstService::new(inner.clone(), store.clone());
        let lib = LibraryId::new("g", "a", "1.0");

        for _ in 0..3 {
            let ast = cached.construct_ast(&lib, ConstructType::METH, "a.B.m()", false, ProgrammingLanguage::Java)?;
            assert!(ast.is_some());
            assert_eq!(cached.diff_ast("[1]", "[2]")?, 3);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        let stats = store.stats()?;
        assert_eq!(stats.construct_asts, 1);
        assert_eq!(stats.ast_diffs, 1);
        Ok(())
    }

    #[test]
    fn diff_key_is_directional() {
        assert_ne!(diff_key("a", "b"), diff_key("b", "a"));
        assert_eq!(diff_key("a", "b"), diff_key("a", "b"));
    }
}
