//! Artifact registry backed by a local Maven repository (`~/.m2/repository`).
//!
//! Versions are the directories holding `{artifact}-{version}.jar`, publish
//! timestamps are the jar modification times, and construct intersection
//! checks the class files of the jar.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use memmap2::Mmap;
use std::collections::HashSet;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::backend::{ArtifactRegistry, ServiceError};
use crate::model::{Artifact, ConstructId, ConstructType, LibraryId, ProgrammingLanguage};

pub fn default_m2_repository() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Failed to resolve home directory"))?;
    Ok(home.join(".m2").join("repository"))
}

#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, group: &str, artifact: &str) -> PathBuf {
        self.root.join(group.replace('.', "/")).join(artifact)
    }

    pub fn archive_path(&self, lib: &LibraryId, classifier: Option<&str>, ext: &str) -> PathBuf {
        let file_name = match classifier {
            Some(c) => format!("{}-{}-{c}.{ext}", lib.artifact, lib.version),
            None => format!("{}-{}.{ext}", lib.artifact, lib.version),
        };
        self.artifact_dir(&lib.group, &lib.artifact)
            .join(&lib.version)
            .join(file_name)
    }
}

impl ArtifactRegistry for LocalRepository {
    fn artifact_versions(
        &self,
        group: &str,
        artifact: &str,
    ) -> Result<Vec<Artifact>, ServiceError> {
        let dir = self.artifact_dir(group, artifact);
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no local versions");
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for jar in scan_jars(&dir) {
            let Some(version) = extract_version_from_maven_path(&jar) else {
                continue;
            };
            let lib = LibraryId::new(group, artifact, &version);
            if jar != self.archive_path(&lib, None, "jar") {
                continue;
            }
            out.push(Artifact::new(lib, modified_millis(&jar)));
        }
        out.sort_by(|a, b| a.lib_id.cmp(&b.lib_id));
        Ok(out)
    }

    fn artifact(&self, lib: &LibraryId) -> Result<Option<Artifact>, ServiceError> {
        let jar = self.archive_path(lib, None, "jar");
        if !jar.is_file() {
            return Ok(None);
        }
        Ok(Some(Artifact::new(lib.clone(), modified_millis(&jar))))
    }

    fn artifact_exists(
        &self,
        lib: &LibraryId,
        sources_only: bool,
        packaging: &str,
    ) -> Result<bool, ServiceError> {
        let path = if sources_only {
            self.archive_path(lib, Some("sources"), "jar")
        } else {
            self.archive_path(lib, None, &packaging.to_ascii_lowercase())
        };
        Ok(path.is_file())
    }

    fn intersect_constructs(
        &self,
        lib: &LibraryId,
        constructs: &[ConstructId],
        packaging: &str,
        lang: ProgrammingLanguage,
    ) -> Result<Option<Vec<ConstructId>>, ServiceError> {
        if lang != ProgrammingLanguage::Java {
            warn!(lib = %lib, %lang, "local repository only inspects java archives");
            return Ok(None);
        }
        let jar = self.archive_path(lib, None, &packaging.to_ascii_lowercase());
        let entries = match jar_entries(&jar) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(jar = %jar.display(), error = %e, "cannot read archive");
                return Ok(None);
            }
        };
        Ok(Some(
            constructs
                .iter()
                .filter(|c| {
                    construct_class_path(c)
                        .map(|p| entries.contains(&p))
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
        ))
    }
}

pub fn scan_jars(base_path: &Path) -> Vec<PathBuf> {
    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "jar") {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    rx.iter().collect()
}

pub fn extract_version_from_maven_path(jar_path: &Path) -> Option<String> {
    jar_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().to_string())
}

/// Class file holding a construct, e.g. `a/b/C$D.class` for `a.b.C$D.m(int)`.
pub fn construct_class_path(construct: &ConstructId) -> Option<String> {
    let qname = construct
        .qname
        .split('(')
        .next()
        .unwrap_or(&construct.qname);
    let class = match construct.construct_type {
        ConstructType::METH | ConstructType::INIT => qname.rsplit_once('.')?.0,
        ConstructType::CONS | ConstructType::CLAS | ConstructType::ENUM | ConstructType::INTF => {
            qname
        }
        _ => return None,
    };
    Some(format!("{}.class", class.replace('.', "/")))
}

pub fn jar_entries(jar_path: &Path) -> Result<HashSet<String>> {
    let file =
        File::open(jar_path).with_context(|| format!("Failed to open jar: {}", jar_path.display()))?;
    // SAFETY: the archive is only read, and Maven repositories do not rewrite released jars.
    let mmap = unsafe {
        Mmap::map(&file).with_context(|| format!("Failed to mmap jar: {}", jar_path.display()))?
    };
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip structure: {}", jar_path.display()))?;

    let mut names = HashSet::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        names.insert(entry.name().to_string());
    }
    Ok(names)
}

fn modified_millis(path: &Path) -> Option<i64> {
    let modified = path.metadata().and_then(|m| m.modified()).ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    i64::try_from(millis).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    fn write_jar(path: &Path, entries: &[&str]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for name in entries {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(b"dummy").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn enumerates_versions_and_checks_existence() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path().to_path_buf());
        let v1 = LibraryId::new("org.example", "demo", "1.0.0");
        let v2 = LibraryId::new("org.example", "demo", "1.0.1");
        write_jar(&repo.archive_path(&v1, None, "jar"), &["org/example/Demo.class"]);
        write_jar(&repo.archive_path(&v2, None, "jar"), &["org/example/Demo.class"]);
        write_jar(&repo.archive_path(&v2, Some("sources"), "jar"), &["org/example/Demo.java"]);

        let versions = repo.artifact_versions("org.example", "demo").unwrap();
        let ids: Vec<&str> = versions.iter().map(|a| a.lib_id.version.as_str()).collect();
        assert_eq!(ids, vec!["1.0.0", "1.0.1"]);
        assert!(versions.iter().all(|a| a.timestamp.is_some()));

        assert!(repo.artifact_exists(&v1, false, "JAR").unwrap());
        assert!(!repo.artifact_exists(&v1, true, "jar").unwrap());
        assert!(repo.artifact_exists(&v2, true, "jar").unwrap());
        assert!(repo.artifact_versions("org.example", "missing").unwrap().is_empty());
    }

    #[test]
    fn intersects_constructs_by_class_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path().to_path_buf());
        let lib = LibraryId::new("org.example", "demo", "2.0");
        write_jar(
            &repo.archive_path(&lib, None, "jar"),
            &["org/example/Demo.class", "org/example/Demo$Inner.class"],
        );

        let java = ProgrammingLanguage::Java;
        let present = ConstructId::new(java, ConstructType::METH, "org.example.Demo.run(java.lang.String)");
        let nested = ConstructId::new(java, ConstructType::CONS, "org.example.Demo$Inner(int)");
        let absent = ConstructId::new(java, ConstructType::METH, "org.example.Other.run()");

        let found = repo
            .intersect_constructs(&lib, &[present.clone(), nested.clone(), absent], "jar", java)
            .unwrap()
            .unwrap();
        assert_eq!(found, vec![present, nested]);
    }
}
