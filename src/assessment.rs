//! Per-version comparison results and the evidence derived from them.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ConstructChangeType, LibraryId};
use crate::version::Version;

/// Distance value meaning "not computed".
pub const NOT_COMPUTED: i32 = -1;

/// Comparison of one changed construct (per module path) against one library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructPathAssessment {
    pub qname: String,
    /// Short repository path of the change (module prefix).
    pub path: String,
    pub change_type: ConstructChangeType,
    pub qname_in_jar: bool,
    /// Edit count to the vulnerable body.
    pub d_to_v: i32,
    /// Edit count to the fixed body.
    pub d_to_f: i32,
    pub same_bytecode: BTreeSet<LibraryId>,
    pub done_comparisons: usize,
}

impl ConstructPathAssessment {
    pub fn new(qname: &str, path: &str, change_type: ConstructChangeType, qname_in_jar: bool) -> Self {
        Self {
            qname: qname.to_string(),
            path: path.to_string(),
            change_type,
            qname_in_jar,
            d_to_v: NOT_COMPUTED,
            d_to_f: NOT_COMPUTED,
            same_bytecode: BTreeSet::new(),
            done_comparisons: 0,
        }
    }

    pub fn with_distances(mut self, d_to_v: i32, d_to_f: i32) -> Self {
        self.d_to_v = d_to_v;
        self.d_to_f = d_to_f;
        self
    }

    pub fn is_mod(&self) -> bool {
        self.change_type == ConstructChangeType::MOD
    }

    /// Equal to both bodies at once; never usable as equality evidence.
    pub fn is_conflict(&self) -> bool {
        self.d_to_v == 0 && self.d_to_f == 0
    }

    pub fn has_distances(&self) -> bool {
        self.d_to_v != NOT_COMPUTED || self.d_to_f != NOT_COMPUTED
    }

    /// Positive when closer to the vulnerable body, negative when closer to the fix.
    pub fn closeness(&self) -> i32 {
        self.d_to_f - self.d_to_v
    }
}

/// All assessments of one library version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResult {
    pub lib: LibraryId,
    pub version: Version,
    pub timestamp: Option<i64>,
    pub sources_available: bool,
    pub assessments: Vec<ConstructPathAssessment>,
}

impl ArtifactResult {
    pub fn new(lib: LibraryId, timestamp: Option<i64>, sources_available: bool) -> Self {
        let version = Version::new(&lib.version);
        Self {
            lib,
            version,
            timestamp,
            sources_available,
            assessments: Vec::new(),
        }
    }

    pub fn minor_release(&self) -> String {
        self.version.minor_release()
    }

    fn mods(&self) -> impl Iterator<Item = &ConstructPathAssessment> {
        self.assessments.iter().filter(|a| a.is_mod())
    }

    /// No construct equals both bodies, and no two constructs disagree.
    pub fn is_consistent(&self) -> bool {
        let mut found_v = false;
        let mut found_f = false;
        for a in self.mods() {
            if a.is_conflict() {
                return false;
            }
            found_v |= a.d_to_v == 0;
            found_f |= a.d_to_f == 0;
        }
        !(found_v && found_f)
    }

    pub fn is_equal_to_v(&self) -> bool {
        self.is_consistent() && self.mods().any(|a| a.d_to_v == 0)
    }

    pub fn is_equal_to_f(&self) -> bool {
        self.is_consistent() && self.mods().any(|a| a.d_to_f == 0)
    }

    pub fn v_confidence(&self) -> f64 {
        ratio(self.mods(), |a| a.d_to_v == 0)
    }

    pub fn f_confidence(&self) -> f64 {
        ratio(self.mods(), |a| a.d_to_f == 0)
    }

    /// Best ratio of vulnerable-equal constructs within a single module path.
    pub fn v_path_confidence(&self) -> f64 {
        self.path_ratio(|a| a.d_to_v == 0)
    }

    pub fn f_path_confidence(&self) -> f64 {
        self.path_ratio(|a| a.d_to_f == 0)
    }

    fn path_ratio(&self, hit: impl Fn(&ConstructPathAssessment) -> bool) -> f64 {
        let mut per_path: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for a in self.mods() {
            let entry = per_path.entry(a.path.as_str()).or_default();
            entry.0 += 1;
            if hit(a) {
                entry.1 += 1;
            }
        }
        per_path
            .values()
            .map(|(tot, hits)| *hits as f64 / *tot as f64)
            .fold(0.0, f64::max)
    }

    pub fn contains_ad(&self) -> bool {
        self.assessments.iter().any(|a| {
            matches!(a.change_type, ConstructChangeType::ADD | ConstructChangeType::DEL)
        })
    }

    /// Every added construct is present and every deleted one is gone.
    pub fn is_ad_fixed(&self) -> bool {
        ad_fixed(self.assessments.iter())
    }

    /// Like `is_ad_fixed`, satisfied by at least one module path on its own.
    pub fn is_path_ad_fixed(&self) -> bool {
        let paths: BTreeSet<&str> = self.assessments.iter().map(|a| a.path.as_str()).collect();
        paths
            .into_iter()
            .any(|p| ad_fixed(self.assessments.iter().filter(|a| a.path == p)))
    }

    /// Order within one group:artifact: publish time, then version.
    pub fn compare_release(&self, other: &ArtifactResult) -> Ordering {
        let ts = |t: Option<i64>| t.unwrap_or(i64::MAX);
        ts(self.timestamp)
            .cmp(&ts(other.timestamp))
            .then_with(|| self.version.cmp(&other.version))
    }
}

impl Ord for ArtifactResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lib
            .group
            .cmp(&other.lib.group)
            .then_with(|| self.lib.artifact.cmp(&other.lib.artifact))
            .then_with(|| self.compare_release(other))
    }
}

impl PartialOrd for ArtifactResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn ratio<'a>(
    items: impl Iterator<Item = &'a ConstructPathAssessment>,
    hit: impl Fn(&ConstructPathAssessment) -> bool,
) -> f64 {
    let (tot, hits) = items.fold((0usize, 0usize), |(tot, hits), a| {
        (tot + 1, hits + usize::from(hit(a)))
    });
    if tot == 0 {
        return 0.0;
    }
    hits as f64 / tot as f64
}

fn ad_fixed<'a>(items: impl Iterator<Item = &'a ConstructPathAssessment>) -> bool {
    let mut fixed = false;
    for a in items {
        match (a.change_type, a.qname_in_jar) {
            (ConstructChangeType::ADD, false) | (ConstructChangeType::DEL, true) => return false,
            (ConstructChangeType::ADD, true) | (ConstructChangeType::DEL, false) => fixed = true,
            _ => {}
        }
    }
    fixed
}

/// Groups assessment rows into one result per library, sorted.
pub fn group_by_library(
    rows: impl IntoIterator<Item = (LibraryId, Option<i64>, bool, ConstructPathAssessment)>,
) -> Vec<ArtifactResult> {
    let mut by_lib: BTreeMap<LibraryId, ArtifactResult> = BTreeMap::new();
    for (lib, timestamp, sources_available, assessment) in rows {
        let result = by_lib
            .entry(lib.clone())
            .or_insert_with(|| ArtifactResult::new(lib, timestamp, sources_available));
        if result.timestamp.is_none() {
            result.timestamp = timestamp;
        }
        result.sources_available |= sources_available;
        result.assessments.push(assessment);
    }
    let mut out: Vec<ArtifactResult> = by_lib.into_values().collect();
    out.sort();
    out
}
