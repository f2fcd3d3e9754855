use patch_eval::backend::{AstService, Backend, ServiceError};
use patch_eval::ledger::{ledger_path, read_ledger};
use patch_eval::local::LocalRepository;
use patch_eval::model::{
    AffectedLibrary, AffectedVersionSource, BugChangeList, ConstructChange, ConstructChangeType,
    ConstructId, ConstructType, LibraryId, ProgrammingLanguage,
};
use patch_eval::pipeline::{BugOutcome, RunContext, RunSettings};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

const BUG: &str = "CVE-2016-1000031";
const GROUP: &str = "org.example";
const ARTIFACT: &str = "upload";
const QNAME: &str = "org.example.Upload.readObject(java.io.ObjectInputStream)";

/// Backend holding a single bug plus an AST service answering from a table.
struct Services {
    bug: BugChangeList,
    asts: BTreeMap<(String, bool), String>,
    stored: Mutex<BTreeMap<AffectedVersionSource, Vec<AffectedLibrary>>>,
}

impl Backend for Services {
    fn bug(&self, bug_id: &str) -> Result<BugChangeList, ServiceError> {
        if bug_id == self.bug.bug_id {
            Ok(self.bug.clone())
        } else {
            Err(ServiceError::NotFound {
                url: format!("test://bugs/{bug_id}"),
            })
        }
    }

    fn bug_libraries(&self, _bug_id: &str) -> Result<Vec<LibraryId>, ServiceError> {
        Ok(vec![LibraryId::new(GROUP, ARTIFACT, "1.0.0")])
    }

    fn affected_libraries(
        &self,
        _bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<Vec<AffectedLibrary>, ServiceError> {
        let stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stored.get(&source).cloned().unwrap_or_default())
    }

    fn upload_affected_libraries(
        &self,
        _bug_id: &str,
        source: AffectedVersionSource,
        libraries: &[AffectedLibrary],
    ) -> Result<(), ServiceError> {
        let mut stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        stored.entry(source).or_default().extend(libraries.iter().cloned());
        Ok(())
    }

    fn delete_affected_libraries(
        &self,
        _bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<(), ServiceError> {
        let mut stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        stored.remove(&source);
        Ok(())
    }
}

impl AstService for Services {
    fn construct_ast(
        &self,
        lib: &LibraryId,
        _construct_type: ConstructType,
        _qname: &str,
        sources_only: bool,
        _lang: ProgrammingLanguage,
    ) -> Result<Option<String>, ServiceError> {
        Ok(self.asts.get(&(lib.version.clone(), sources_only)).cloned())
    }

    fn diff_ast(&self, left: &str, right: &str) -> Result<usize, ServiceError> {
        let differing = left.chars().zip(right.chars()).filter(|(a, b)| a != b).count();
        Ok(differing + left.len().abs_diff(right.len()))
    }
}

fn write_jar(path: &Path, entries: &[&str], modified_secs: u64) -> anyhow::Result<()> {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for name in entries {
        zip.start_file(*name, options)?;
        zip.write_all(b"stub")?;
    }
    zip.finish()?;

    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(UNIX_EPOCH + Duration::from_secs(modified_secs))?;
    Ok(())
}

fn services() -> Services {
    let change = ConstructChange {
        repo: "https://example.org/upload".to_string(),
        commit: "388e824".to_string(),
        repo_path: "core/src/main/java/org/example/Upload.java".to_string(),
        construct_id: ConstructId::new(ProgrammingLanguage::Java, ConstructType::METH, QNAME),
        construct_change_type: ConstructChangeType::MOD,
        committed_at: Some("2016-10-01T12:00:00Z".to_string()),
        buggy_body: Some("vvvv".to_string()),
        fixed_body: Some("ffff".to_string()),
    };
    let mut asts = BTreeMap::new();
    asts.insert(("1.0.0".to_string(), true), "vvvv".to_string());
    asts.insert(("1.0.2".to_string(), true), "ffff".to_string());
    asts.insert(("1.0.0".to_string(), false), "bin-v".to_string());
    asts.insert(("1.0.1".to_string(), false), "bin-f".to_string());
    asts.insert(("1.0.2".to_string(), false), "bin-f".to_string());
    Services {
        bug: BugChangeList {
            bug_id: BUG.to_string(),
            construct_changes: vec![change],
        },
        asts,
        stored: Mutex::new(BTreeMap::new()),
    }
}

fn local_repository(root: &Path) -> anyhow::Result<LocalRepository> {
    let repo = LocalRepository::new(root.to_path_buf());
    let class = "org/example/Upload.class";
    for (i, v) in ["1.0.0", "1.0.1", "1.0.2"].into_iter().enumerate() {
        let lib = LibraryId::new(GROUP, ARTIFACT, v);
        let secs = 1_500_000_000 + 86_400 * i as u64;
        write_jar(&repo.archive_path(&lib, None, "jar"), &[class], secs)?;
        if v != "1.0.1" {
            write_jar(
                &repo.archive_path(&lib, Some("sources"), "jar"),
                &["org/example/Upload.java"],
                secs,
            )?;
        }
    }
    write_jar(
        &repo.archive_path(&LibraryId::new(GROUP, ARTIFACT, "0.9"), None, "jar"),
        &["org/example/Other.class"],
        1_400_000_000,
    )?;
    Ok(repo)
}

fn read_document(folder: &Path, source: &str) -> anyhow::Result<Value> {
    let path = folder.join(format!("{BUG}_{source}_.json"));
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

#[test]
fn local_repository_run_resolves_versions_without_sources() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let repo = local_repository(&dir.path().join("m2"))?;
    let services = Arc::new(services());
    let results = dir.path().join("results");

    let mut settings = RunSettings::new(results.clone());
    settings.to_file = true;
    settings.analysis_concurrency = 2;
    settings.bytecode_concurrency = 2;
    settings.unavailable_backoff = Duration::ZERO;
    let ctx = RunContext::new(services.clone(), Arc::new(repo), services.clone(), settings)?;

    let outcomes = ctx.run_bugs(&[BUG.to_string()]);
    assert_eq!(outcomes[0].1, BugOutcome::Published { verdicts: 4 });

    let equality = read_document(&results, "AST_EQUALITY")?;
    let verdicts: Vec<(String, Option<bool>)> = equality
        .as_array()
        .map(|a| {
            a.iter()
                .map(|v| {
                    (
                        v["libraryId"]["version"].as_str().unwrap_or_default().to_string(),
                        v["affected"].as_bool(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(
        verdicts,
        vec![
            ("1.0.0".to_string(), Some(true)),
            ("1.0.1".to_string(), Some(false)),
            ("1.0.2".to_string(), Some(false)),
        ]
    );
    assert_eq!(equality[1]["sourcesAvailable"], false);
    assert_eq!(
        equality[1]["affectedcc"][0]["sameBytecodeLids"][0]["version"],
        "1.0.2"
    );

    // 0.9 lacks the changed class, so nothing is known about it.
    let review = read_document(&results, "TO_REVIEW")?;
    assert_eq!(review[0]["libraryId"]["version"], "0.9");
    assert!(review[0].get("affected").is_none());
    assert!(!results.join(format!("{BUG}_INTERSECTION_.json")).exists());

    let ledger = read_ledger(&ledger_path(&results, BUG))?;
    assert_eq!(ledger.len(), 4);
    let resolved = ledger
        .iter()
        .find(|r| r.lib.version == "1.0.1")
        .map(|r| r.assessments[0].d_to_f);
    assert_eq!(resolved, Some(0));
    assert!(services.stored.lock().map(|s| s.is_empty()).unwrap_or(false));
    Ok(())
}
