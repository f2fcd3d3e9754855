//! `;`-separated ledger of construct assessments, one file per bug.
//!
//! The ledger lets reruns skip libraries that were already analyzed and keeps
//! the distances computed by the bytecode fallback.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

use crate::assessment::{ArtifactResult, ConstructPathAssessment, NOT_COMPUTED, group_by_library};
use crate::model::{ConstructChangeType, LibraryId};

pub const DELIMITER: char = ';';
pub const HEADER: &str = "Qname;Path;Group;Artifact;Version;Type;QnameInJar;SourcesAvailable;dToV;dToF;Timestamp;SameBytecodeLibs;DoneComparisons";

const MIN_COLUMNS: usize = 11;

pub fn ledger_path(folder: &Path, bug_id: &str) -> PathBuf {
    folder.join(format!("{bug_id}.csv"))
}

pub fn format_rows(results: &[ArtifactResult]) -> String {
    let mut out = String::new();
    for r in results {
        for a in &r.assessments {
            out.push_str(&format_row(r, a));
            out.push('\n');
        }
    }
    out
}

fn format_row(r: &ArtifactResult, a: &ConstructPathAssessment) -> String {
    let timestamp = r
        .timestamp
        .map(|t| t.to_string())
        .unwrap_or_else(|| "null".to_string());
    let same: Vec<String> = a.same_bytecode.iter().map(|l| l.to_string()).collect();
    [
        a.qname.clone(),
        a.path.clone(),
        r.lib.group.clone(),
        r.lib.artifact.clone(),
        r.lib.version.clone(),
        a.change_type.to_string(),
        a.qname_in_jar.to_string(),
        r.sources_available.to_string(),
        a.d_to_v.to_string(),
        a.d_to_f.to_string(),
        timestamp,
        same.join("|"),
        a.done_comparisons.to_string(),
    ]
    .join(";")
}

/// Rewrites the whole ledger.
pub fn write_ledger(path: &Path, results: &[ArtifactResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create ledger directory: {}", parent.display()))?;
    }
    let mut tmp_os = path.as_os_str().to_os_string();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);

    let mut content = String::from(HEADER);
    content.push('\n');
    content.push_str(&format_rows(results));
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write ledger: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace ledger: {}", path.display()))?;
    Ok(())
}

/// Appends rows of newly analyzed libraries, creating the ledger if needed.
pub fn append_ledger(path: &Path, results: &[ArtifactResult]) -> Result<()> {
    if !path.exists() {
        return write_ledger(path, results);
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open ledger: {}", path.display()))?;
    file.write_all(format_rows(results).as_bytes())
        .with_context(|| format!("Failed to append to ledger: {}", path.display()))?;
    Ok(())
}

pub fn read_ledger(path: &Path) -> Result<Vec<ArtifactResult>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ledger: {}", path.display()))?;
    Ok(parse_ledger(&content))
}

pub fn parse_ledger(content: &str) -> Vec<ArtifactResult> {
    let mut rows = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split(DELIMITER).collect();
        if cols.len() < MIN_COLUMNS {
            warn!(line = line_no + 1, columns = cols.len(), "skipping short ledger row");
            continue;
        }
        if cols[2] == "Group" {
            continue;
        }
        let Some(change_type) = ConstructChangeType::parse(cols[5]) else {
            warn!(line = line_no + 1, value = cols[5], "skipping ledger row with unknown change type");
            continue;
        };

        let mut assessment =
            ConstructPathAssessment::new(cols[0], cols[1], change_type, parse_bool(cols[6]))
                .with_distances(parse_distance(cols[8]), parse_distance(cols[9]));
        let lib = LibraryId::new(cols[2], cols[3], cols[4]);
        if assessment.is_conflict() {
            error!(
                lib = %lib,
                qname = cols[0],
                "construct equal to both vulnerable and fixed body, row excluded"
            );
            continue;
        }
        if let Some(same) = cols.get(11) {
            assessment.same_bytecode = same.split('|').filter_map(LibraryId::parse).collect();
        }
        if let Some(done) = cols.get(12) {
            assessment.done_comparisons = done.trim().parse().unwrap_or(0);
        }
        let timestamp = cols[10].trim().parse::<i64>().ok();
        rows.push((lib, timestamp, parse_bool(cols[7]), assessment));
    }
    group_by_library(rows)
}

fn parse_bool(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

fn parse_distance(s: &str) -> i32 {
    s.trim().parse().unwrap_or(NOT_COMPUTED)
}
