//! Consolidation of per-commit construct changes into one net change per
//! construct and repository path.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::model::{ConstructChange, ConstructChangeType, ConstructId};

#[derive(Debug, Clone, PartialEq)]
pub struct OverallConstructChange {
    pub construct_id: ConstructId,
    pub repo_path: String,
    pub change_type: ConstructChangeType,
    /// Body before the first commit touching the construct.
    pub buggy_body: Option<String>,
    /// Body after the last commit touching the construct.
    pub fixed_body: Option<String>,
    pub commits: Vec<String>,
}

impl OverallConstructChange {
    pub fn short_path(&self) -> String {
        short_repo_path(&self.repo_path)
    }

    pub fn has_bodies(&self) -> bool {
        self.buggy_body.is_some() || self.fixed_body.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidatedChanges {
    /// Constructs present before and after the fix.
    pub modified: Vec<OverallConstructChange>,
    /// Constructs only present on one side of the fix.
    pub added_or_deleted: Vec<OverallConstructChange>,
}

impl ConsolidatedChanges {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added_or_deleted.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &OverallConstructChange> {
        self.modified.iter().chain(self.added_or_deleted.iter())
    }

    /// Looks up a change by qualified name and short repository path.
    pub fn find(&self, qname: &str, short_path: &str) -> Option<&OverallConstructChange> {
        self.all()
            .find(|c| c.construct_id.qname == qname && c.short_path() == short_path)
    }
}

pub fn is_test_code(change: &ConstructChange) -> bool {
    let qname = &change.construct_id.qname;
    let path = &change.repo_path;
    qname.contains("test")
        || qname.contains("Test")
        || path.contains("/testcases/")
        || path.contains("src/test/")
}

pub fn consolidate(changes: &[ConstructChange]) -> ConsolidatedChanges {
    let mut groups: BTreeMap<(ConstructId, String), Vec<&ConstructChange>> = BTreeMap::new();
    for change in changes {
        if is_test_code(change) || !change.construct_id.construct_type.is_comparable() {
            continue;
        }
        groups
            .entry((change.construct_id.clone(), change.repo_path.clone()))
            .or_default()
            .push(change);
    }

    let mut out = ConsolidatedChanges::default();
    for ((construct_id, repo_path), mut commits) in groups {
        commits.sort_by(|a, b| {
            a.commit_time()
                .cmp(&b.commit_time())
                .then_with(|| a.commit.cmp(&b.commit))
        });
        let Some(overall) = net_change(construct_id, repo_path, &commits) else {
            continue;
        };
        match overall.change_type {
            ConstructChangeType::MOD => out.modified.push(overall),
            ConstructChangeType::ADD | ConstructChangeType::DEL => {
                out.added_or_deleted.push(overall)
            }
            ConstructChangeType::NUL => {}
        }
    }

    debug!(
        modified = out.modified.len(),
        added_or_deleted = out.added_or_deleted.len(),
        "consolidated construct changes"
    );
    out
}

fn net_change(
    construct_id: ConstructId,
    repo_path: String,
    commits: &[&ConstructChange],
) -> Option<OverallConstructChange> {
    let first = commits.first()?;
    let last = commits.last()?;

    let existed_before = matches!(
        first.construct_change_type,
        ConstructChangeType::DEL | ConstructChangeType::MOD
    );
    let exists_after = matches!(
        last.construct_change_type,
        ConstructChangeType::ADD | ConstructChangeType::MOD
    );
    let change_type = match (existed_before, exists_after) {
        (true, true) => ConstructChangeType::MOD,
        (true, false) => ConstructChangeType::DEL,
        (false, true) => ConstructChangeType::ADD,
        (false, false) => ConstructChangeType::NUL,
    };

    if change_type == ConstructChangeType::NUL {
        debug!(qname = %construct_id.qname, "construct added and deleted by the fix, skipping");
        return None;
    }

    let buggy_body = existed_before
        .then(|| first.buggy_body.clone())
        .flatten();
    let fixed_body = exists_after.then(|| last.fixed_body.clone()).flatten();
    if change_type == ConstructChangeType::MOD && buggy_body.is_none() && fixed_body.is_none() {
        warn!(
            qname = %construct_id.qname,
            path = %repo_path,
            "modified construct has neither buggy nor fixed body"
        );
    }

    Some(OverallConstructChange {
        construct_id,
        repo_path,
        change_type,
        buggy_body,
        fixed_body,
        commits: commits.iter().map(|c| c.commit.clone()).collect(),
    })
}

/// Module prefix of a repository path, used to group constructs per module.
pub fn short_repo_path(repo_path: &str) -> String {
    if let Some(idx) = repo_path.find("/src/") {
        return repo_path[..idx].to_string();
    }
    let trunk = repo_path.find("/trunk/");
    let branches = repo_path.find("/branches/");
    match (trunk, branches) {
        (Some(idx), None) => repo_path[..idx + "/trunk/".len()].to_string(),
        (None, Some(idx)) => {
            let from = idx + "/branches/".len();
            match repo_path[from..].find('/') {
                Some(slash) => repo_path[..from + slash].to_string(),
                None => String::new(),
            }
        }
        _ => String::new(),
    }
}
