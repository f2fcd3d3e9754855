//! Shared domain types exchanged with the backend and the artifact registry.
//!
//! Field names follow the JSON documents of those services (camelCase), so the
//! same structs are used for decoding responses and for the local file sink.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProgrammingLanguage {
    Java,
    Py,
    Js,
}

impl ProgrammingLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Java => "JAVA",
            Self::Py => "PY",
            Self::Js => "JS",
        }
    }

    /// Packaging used when asking the registry about binaries of this language.
    pub fn packaging(&self) -> &'static str {
        match self {
            Self::Java => "JAR",
            Self::Py => "SDIST",
            Self::Js => "TGZ",
        }
    }
}

impl fmt::Display for ProgrammingLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstructType {
    PACK,
    CLAS,
    ENUM,
    INTF,
    INIT,
    METH,
    CONS,
    FUNC,
    MODU,
}

impl ConstructType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PACK => "PACK",
            Self::CLAS => "CLAS",
            Self::ENUM => "ENUM",
            Self::INTF => "INTF",
            Self::INIT => "INIT",
            Self::METH => "METH",
            Self::CONS => "CONS",
            Self::FUNC => "FUNC",
            Self::MODU => "MODU",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PACK" => Self::PACK,
            "CLAS" => Self::CLAS,
            "ENUM" => Self::ENUM,
            "INTF" => Self::INTF,
            "INIT" => Self::INIT,
            "METH" => Self::METH,
            "CONS" => Self::CONS,
            "FUNC" => Self::FUNC,
            "MODU" => Self::MODU,
            _ => return None,
        })
    }

    /// Executable constructs whose bodies can be compared across versions.
    pub fn is_comparable(&self) -> bool {
        matches!(self, Self::METH | Self::CONS | Self::FUNC | Self::MODU)
    }
}

impl fmt::Display for ConstructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstructChangeType {
    ADD,
    DEL,
    MOD,
    /// Added and removed again within the same fix; never shipped.
    NUL,
}

impl ConstructChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ADD => "ADD",
            Self::DEL => "DEL",
            Self::MOD => "MOD",
            Self::NUL => "NUL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ADD" => Self::ADD,
            "DEL" => Self::DEL,
            "MOD" => Self::MOD,
            "NUL" => Self::NUL,
            _ => return None,
        })
    }
}

impl fmt::Display for ConstructChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstructId {
    pub lang: ProgrammingLanguage,
    #[serde(rename = "type")]
    pub construct_type: ConstructType,
    pub qname: String,
}

impl ConstructId {
    pub fn new(lang: ProgrammingLanguage, construct_type: ConstructType, qname: &str) -> Self {
        Self {
            lang,
            construct_type,
            qname: qname.to_string(),
        }
    }
}

/// One commit's edit of a construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructChange {
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub commit: String,
    pub repo_path: String,
    pub construct_id: ConstructId,
    pub construct_change_type: ConstructChangeType,
    #[serde(default)]
    pub committed_at: Option<String>,
    #[serde(default)]
    pub buggy_body: Option<String>,
    #[serde(default)]
    pub fixed_body: Option<String>,
}

impl ConstructChange {
    /// Commit time parsed from the backend representation, if it has one.
    pub fn commit_time(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.committed_at.as_deref()?.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t);
        }
        if let Ok(t) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
            return Some(t);
        }
        if let Ok(ms) = raw.parse::<i64>() {
            return DateTime::from_timestamp_millis(ms).map(|t| t.fixed_offset());
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|t| t.and_utc().fixed_offset())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugChangeList {
    pub bug_id: String,
    #[serde(default)]
    pub construct_changes: Vec<ConstructChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl LibraryId {
    pub fn new(group: &str, artifact: &str, version: &str) -> Self {
        Self {
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
        }
    }

    /// Parses `group:artifact:version`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut it = s.trim().splitn(3, ':');
        let group = it.next().filter(|p| !p.is_empty())?;
        let artifact = it.next().filter(|p| !p.is_empty())?;
        let version = it.next().filter(|p| !p.is_empty())?;
        Some(Self::new(group, artifact, version))
    }

    pub fn ga(&self) -> String {
        format!("{}:{}", self.group, self.artifact)
    }

    pub fn same_ga(&self, other: &LibraryId) -> bool {
        self.group == other.group && self.artifact == other.artifact
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

/// Library record returned for a bug; only the Maven coordinates matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub library_id: Option<LibraryId>,
}

/// A published version of a library as known by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "libId")]
    pub lib_id: LibraryId,
    /// Publish time in epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub packaging: Option<String>,
}

impl Artifact {
    pub fn new(lib_id: LibraryId, timestamp: Option<i64>) -> Self {
        Self {
            lib_id,
            timestamp,
            packaging: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AffectedVersionSource {
    Manual,
    Kaybee,
    PreCommitPom,
    LineAdd,
    CheckVersion,
    CheckCode,
    AstEquality,
    MinorEquality,
    MajorEquality,
    Intersection,
    GreaterRelease,
    ToReview,
    PropagateManual,
}

impl AffectedVersionSource {
    /// Sources written by this engine.
    pub const COMPUTED: [AffectedVersionSource; 7] = [
        Self::AstEquality,
        Self::MinorEquality,
        Self::MajorEquality,
        Self::Intersection,
        Self::GreaterRelease,
        Self::ToReview,
        Self::PropagateManual,
    ];

    /// Computed sources whose stored results are removed when a run yields none.
    pub const STALE_CLEANUP: [AffectedVersionSource; 5] = [
        Self::AstEquality,
        Self::MinorEquality,
        Self::MajorEquality,
        Self::Intersection,
        Self::GreaterRelease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "MANUAL",
            Self::Kaybee => "KAYBEE",
            Self::PreCommitPom => "PRE_COMMIT_POM",
            Self::LineAdd => "LINE_ADD",
            Self::CheckVersion => "CHECK_VERSION",
            Self::CheckCode => "CHECK_CODE",
            Self::AstEquality => "AST_EQUALITY",
            Self::MinorEquality => "MINOR_EQUALITY",
            Self::MajorEquality => "MAJOR_EQUALITY",
            Self::Intersection => "INTERSECTION",
            Self::GreaterRelease => "GREATER_RELEASE",
            Self::ToReview => "TO_REVIEW",
            Self::PropagateManual => "PROPAGATE_MANUAL",
        }
    }
}

impl fmt::Display for AffectedVersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construct-level evidence attached to a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedConstructChange {
    pub cc: ConstructRef,
    #[serde(default)]
    pub in_archive: bool,
    #[serde(default)]
    pub dtv: Option<i32>,
    #[serde(default)]
    pub dtf: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub same_bytecode_lids: Vec<LibraryId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructRef {
    pub qname: String,
    #[serde(rename = "type")]
    pub construct_type: ConstructType,
    pub repo_path: String,
    #[serde(default)]
    pub change_type: Option<ConstructChangeType>,
}

/// A version verdict for one bug, as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedLibrary {
    pub source: AffectedVersionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected: Option<bool>,
    pub library_id: LibraryId,
    #[serde(default)]
    pub sources_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_confidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_vulnerable: Option<LibraryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_fixed: Option<LibraryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_intersection: Option<LibraryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_intersection: Option<LibraryId>,
    #[serde(rename = "adfixed", default, skip_serializing_if = "Option::is_none")]
    pub ad_fixed: Option<bool>,
    #[serde(rename = "adpathfixed", default, skip_serializing_if = "Option::is_none")]
    pub ad_path_fixed: Option<bool>,
    #[serde(rename = "affectedcc", default, skip_serializing_if = "Vec::is_empty")]
    pub affected_cc: Vec<AffectedConstructChange>,
}

impl AffectedLibrary {
    pub fn new(
        library_id: LibraryId,
        source: AffectedVersionSource,
        affected: Option<bool>,
    ) -> Self {
        Self {
            source,
            affected,
            library_id,
            sources_available: None,
            overall_confidence: None,
            path_confidence: None,
            last_vulnerable: None,
            first_fixed: None,
            from_intersection: None,
            to_intersection: None,
            ad_fixed: None,
            ad_path_fixed: None,
            affected_cc: Vec::new(),
        }
    }
}
