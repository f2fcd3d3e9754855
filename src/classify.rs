//! Layered classification of analyzed versions into verdicts.
//!
//! Per group:artifact, release trees are visited in release order. Within a
//! tree every version receives at most one computed verdict, tried in this
//! order: AST equality, minor/major-release equality, intersection. A tree
//! without any of those is either a greater release (entirely after the last
//! known fix) or left for review, possibly with a verdict propagated from
//! manual assessments.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::assessment::ArtifactResult;
use crate::consolidate::ConsolidatedChanges;
use crate::model::{
    AffectedConstructChange, AffectedLibrary, AffectedVersionSource, Artifact, ConstructChangeType,
    ConstructRef, LibraryId,
};
use crate::release::{ReleaseTree, build_trees};
use crate::version::Version;

/// Verdicts for every analyzed version, sorted by source then library.
///
/// `manual` holds the stored MANUAL and PROPAGATE_MANUAL verdicts of the bug.
pub fn classify(
    results: &[ArtifactResult],
    changes: &ConsolidatedChanges,
    manual: &[AffectedLibrary],
) -> Vec<AffectedLibrary> {
    let trees = build_trees(results);
    let mut out = Vec::new();
    let mut last_first_fixed: Option<&ArtifactResult> = None;
    let mut current_ga: Option<(&str, &str)> = None;

    for tree in &trees {
        let ga = (tree.group.as_str(), tree.artifact.as_str());
        if current_ga != Some(ga) {
            info!(ga = %tree.ga(), "classifying group artifact");
            current_ga = Some(ga);
            last_first_fixed = None;
        }
        classify_tree(tree, changes, manual, &mut last_first_fixed, &mut out);
    }

    out.sort_by(|a, b| {
        a.source
            .cmp(&b.source)
            .then_with(|| a.library_id.cmp(&b.library_id))
    });
    out
}

fn classify_tree<'a>(
    tree: &ReleaseTree<'a>,
    changes: &ConsolidatedChanges,
    manual: &[AffectedLibrary],
    last_first_fixed: &mut Option<&'a ArtifactResult>,
    out: &mut Vec<AffectedLibrary>,
) {
    let mut verdicts: Vec<Option<bool>> = vec![None; tree.len()];

    for i in tree.equals_v() {
        let node = tree.nodes[i];
        verdicts[i] = Some(true);
        let mut v = verdict(node, AffectedVersionSource::AstEquality, Some(true), changes);
        v.overall_confidence = Some(node.v_confidence().to_string());
        v.path_confidence = Some(node.v_path_confidence().to_string());
        out.push(v);
    }
    for i in tree.equals_f() {
        if verdicts[i].is_some() {
            continue;
        }
        let node = tree.nodes[i];
        verdicts[i] = Some(false);
        let mut v = verdict(node, AffectedVersionSource::AstEquality, Some(false), changes);
        v.overall_confidence = Some(node.f_confidence().to_string());
        v.path_confidence = Some(node.f_path_confidence().to_string());
        out.push(v);
    }

    if let Some((lv, range)) = tree.minor_equality() {
        for i in range {
            if verdicts[i].is_some() {
                continue;
            }
            verdicts[i] = Some(true);
            let mut v = verdict(tree.nodes[i], AffectedVersionSource::MinorEquality, Some(true), changes);
            v.last_vulnerable = Some(tree.nodes[lv].lib.clone());
            out.push(v);
        }
    }
    if let Some((ff, range)) = tree.major_equality() {
        for i in range {
            if verdicts[i].is_some() {
                continue;
            }
            verdicts[i] = Some(false);
            let mut v = verdict(tree.nodes[i], AffectedVersionSource::MajorEquality, Some(false), changes);
            v.first_fixed = Some(tree.nodes[ff].lib.clone());
            out.push(v);
        }
    }

    let intersection = tree.intersection(&verdicts);
    if let Some(x) = &intersection {
        for &(i, affected) in &x.members {
            verdicts[i] = Some(affected);
            let mut v = verdict(tree.nodes[i], AffectedVersionSource::Intersection, Some(affected), changes);
            v.from_intersection = Some(tree.nodes[x.from].lib.clone());
            v.to_intersection = Some(tree.nodes[x.to].lib.clone());
            v.overall_confidence = Some(x.confidence.to_string());
            out.push(v);
        }
    }

    let candidate = tree
        .last_first_fixed(intersection.as_ref())
        .map(|i| tree.nodes[i]);
    match (*last_first_fixed, candidate) {
        (None, candidate) => *last_first_fixed = candidate,
        (Some(current), Some(candidate)) if is_later(candidate, current) => {
            *last_first_fixed = Some(candidate)
        }
        _ => {}
    }
    if let Some(lff) = last_first_fixed {
        debug!(minor = %tree.minor_release, last_first_fixed = %lff.lib, "fixed boundary");
    }

    let hits = verdicts.iter().filter(|v| v.is_some()).count();
    let greater = match (tree.first_timestamp(), last_first_fixed.and_then(|l| l.timestamp)) {
        (Some(first), Some(fixed)) => hits == 0 && first > fixed,
        _ => false,
    };
    if greater {
        for node in &tree.nodes {
            out.push(verdict(node, AffectedVersionSource::GreaterRelease, Some(false), changes));
        }
        return;
    }

    let references: Vec<(Version, bool)> = manual
        .iter()
        .filter(|m| {
            m.library_id.group == tree.group
                && m.library_id.artifact == tree.artifact
                && Version::new(&m.library_id.version).minor_release() == tree.minor_release
        })
        .filter_map(|m| m.affected.map(|a| (Version::new(&m.library_id.version), a)))
        .collect();

    for (i, node) in tree.nodes.iter().enumerate() {
        if verdicts[i].is_some() {
            continue;
        }
        if !has_manual_verdict(manual, &node.lib) {
            out.push(verdict(node, AffectedVersionSource::ToReview, None, changes));
        }
        if manual_propagates(&node.version, &references) {
            out.push(verdict(node, AffectedVersionSource::PropagateManual, Some(false), changes));
        }
    }
}

fn is_later(candidate: &ArtifactResult, current: &ArtifactResult) -> bool {
    matches!((candidate.timestamp, current.timestamp), (Some(c), Some(l)) if l < c)
}

fn has_manual_verdict(manual: &[AffectedLibrary], lib: &LibraryId) -> bool {
    manual
        .iter()
        .any(|m| m.source == AffectedVersionSource::Manual && &m.library_id == lib)
}

/// Whether manual verdicts imply `target` is not affected: some not-affected
/// reference is older and no affected reference is newer. References are only
/// considered from the same maintenance release or when they are maintenance
/// releases themselves; a reference equal to the target decides nothing.
pub fn manual_propagates(target: &Version, references: &[(Version, bool)]) -> bool {
    let mut is_greater = false;
    let mut is_smaller = false;
    for (reference, affected) in references {
        if target.maintenance_release() != reference.maintenance_release()
            && !reference.is_maintenance_release()
        {
            continue;
        }
        match target.cmp(reference) {
            std::cmp::Ordering::Equal => {
                is_greater = false;
                break;
            }
            std::cmp::Ordering::Greater if !affected => is_greater = true,
            std::cmp::Ordering::Less if *affected => is_smaller = true,
            _ => {}
        }
    }
    is_greater && !is_smaller
}

/// PROPAGATE_MANUAL verdicts for a bug without construct changes.
///
/// Each registry version without a manual verdict is compared with the
/// manual verdicts of the same major release and a lower minor number.
pub fn propagate_manual_only(manual: &[AffectedLibrary], versions: &[Artifact]) -> Vec<AffectedLibrary> {
    let assessed: BTreeSet<&LibraryId> = manual.iter().map(|m| &m.library_id).collect();
    let mut out = Vec::new();

    for artifact in versions {
        let lib = &artifact.lib_id;
        if assessed.contains(lib) {
            continue;
        }
        let target = Version::new(&lib.version);
        let Some(target_minor) = target.minor_number() else {
            continue;
        };
        let references: Vec<(Version, bool)> = manual
            .iter()
            .filter(|m| m.library_id.same_ga(lib))
            .filter_map(|m| {
                let reference = Version::new(&m.library_id.version);
                let lower_minor = reference.minor_number().is_some_and(|n| n < target_minor);
                (reference.major_release() == target.major_release() && lower_minor)
                    .then_some((reference, m.affected?))
            })
            .collect();
        if manual_propagates(&target, &references) {
            out.push(AffectedLibrary::new(
                lib.clone(),
                AffectedVersionSource::PropagateManual,
                Some(false),
            ));
        }
    }
    out.sort_by(|a, b| a.library_id.cmp(&b.library_id));
    out
}

fn verdict(
    node: &ArtifactResult,
    source: AffectedVersionSource,
    affected: Option<bool>,
    changes: &ConsolidatedChanges,
) -> AffectedLibrary {
    let mut v = AffectedLibrary::new(node.lib.clone(), source, affected);
    v.sources_available = Some(node.sources_available);
    if node.contains_ad() {
        v.ad_fixed = Some(node.is_ad_fixed());
        v.ad_path_fixed = Some(node.is_path_ad_fixed());
    }
    v.affected_cc = affected_constructs(node, changes);
    v
}

fn affected_constructs(node: &ArtifactResult, changes: &ConsolidatedChanges) -> Vec<AffectedConstructChange> {
    node.assessments
        .iter()
        .filter_map(|a| {
            let change = changes.find(&a.qname, &a.path)?;
            let modified = a.change_type == ConstructChangeType::MOD;
            Some(AffectedConstructChange {
                cc: ConstructRef {
                    qname: a.qname.clone(),
                    construct_type: change.construct_id.construct_type,
                    repo_path: change.repo_path.clone(),
                    change_type: Some(a.change_type),
                },
                in_archive: a.qname_in_jar,
                dtv: modified.then_some(a.d_to_v),
                dtf: modified.then_some(a.d_to_f),
                same_bytecode_lids: a.same_bytecode.iter().cloned().collect(),
            })
        })
        .collect()
}
