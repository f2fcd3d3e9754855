//! Release trees: the analyzed versions of one group:artifact sharing a minor
//! release, in release order.

use std::collections::BTreeMap;

use crate::assessment::{ArtifactResult, NOT_COMPUTED};

#[derive(Debug, Clone)]
pub struct ReleaseTree<'a> {
    pub group: String,
    pub artifact: String,
    pub minor_release: String,
    pub nodes: Vec<&'a ArtifactResult>,
}

/// Versions between the last vulnerable and the first fixed boundary of a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Intersection {
    /// Last node known or measured to be vulnerable.
    pub from: usize,
    /// Node where the fix starts; members before it are vulnerable.
    pub to: usize,
    pub confidence: f64,
    pub crossing: bool,
    /// Unassessed nodes inside the boundaries and their verdict.
    pub members: Vec<(usize, bool)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Crossing {
    from: usize,
    to: usize,
    confidence: f64,
}

/// Groups results per group:artifact and minor release. Trees of one
/// group:artifact are adjacent and ordered by their first release.
pub fn build_trees(results: &[ArtifactResult]) -> Vec<ReleaseTree<'_>> {
    let mut sorted: Vec<&ArtifactResult> = results.iter().collect();
    sorted.sort();

    let mut trees: Vec<ReleaseTree<'_>> = Vec::new();
    for result in sorted {
        let minor = result.minor_release();
        let existing = trees.iter_mut().find(|t| {
            t.group == result.lib.group && t.artifact == result.lib.artifact && t.minor_release == minor
        });
        match existing {
            Some(tree) => tree.nodes.push(result),
            None => trees.push(ReleaseTree {
                group: result.lib.group.clone(),
                artifact: result.lib.artifact.clone(),
                minor_release: minor,
                nodes: vec![result],
            }),
        }
    }
    trees
}

impl ReleaseTree<'_> {
    pub fn ga(&self) -> String {
        format!("{}:{}", self.group, self.artifact)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<i64> {
        self.nodes.first().and_then(|n| n.timestamp)
    }

    pub fn equals_v(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].is_equal_to_v())
    }

    pub fn equals_f(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].is_equal_to_f())
    }

    /// Greatest version equal to the vulnerable body with sources.
    pub fn last_vulnerable(&self) -> Option<usize> {
        self.nodes
            .iter()
            .rposition(|n| n.sources_available && n.is_equal_to_v())
    }

    /// Least version equal to the fixed body with sources.
    pub fn first_fixed(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.sources_available && n.is_equal_to_f())
    }

    /// Nodes ordered before the last vulnerable version.
    pub fn minor_equality(&self) -> Option<(usize, std::ops::Range<usize>)> {
        self.last_vulnerable().map(|lv| (lv, 0..lv))
    }

    /// Nodes ordered after the first fixed version.
    pub fn major_equality(&self) -> Option<(usize, std::ops::Range<usize>)> {
        self.first_fixed().map(|ff| (ff, ff + 1..self.nodes.len()))
    }

    /// Intersection of the tree given the verdicts assigned so far, indexed
    /// like `nodes`.
    pub fn intersection(&self, verdicts: &[Option<bool>]) -> Option<Intersection> {
        if self.nodes.is_empty() || verdicts.len() != self.nodes.len() {
            return None;
        }
        let lo = verdicts.iter().rposition(|v| *v == Some(true));
        let after = lo.map_or(0, |l| l + 1);
        let hi = verdicts[after..]
            .iter()
            .position(|v| *v == Some(false))
            .map(|p| p + after);
        if lo.is_none() && hi.is_none() {
            return None;
        }

        let start = lo.unwrap_or(0);
        let end = hi.unwrap_or(self.nodes.len() - 1);
        let (from, to, confidence, crossing) = match self.crossing(start, end) {
            Some(c) => (c.from, c.to, c.confidence, true),
            None => {
                let (Some(lo), Some(hi)) = (lo, hi) else {
                    return None;
                };
                let v = self
                    .last_vulnerable()
                    .map_or_else(|| self.nodes[lo].v_confidence(), |i| self.nodes[i].v_confidence());
                let f = self
                    .first_fixed()
                    .map_or_else(|| self.nodes[hi].f_confidence(), |i| self.nodes[i].f_confidence());
                (lo, hi, v.min(f), false)
            }
        };

        // A bound without timestamp admits no member.
        let lower = lo.map(|l| self.nodes[l].timestamp);
        let upper = hi.map(|h| self.nodes[h].timestamp);

        let members = (0..self.nodes.len())
            .filter(|&i| verdicts[i].is_none())
            .filter(|&i| lo.is_none_or(|l| i > l) && hi.is_none_or(|h| i < h))
            .filter(|&i| match self.nodes[i].timestamp {
                Some(t) => {
                    lower.is_none_or(|l| l.is_some_and(|l| t > l))
                        && upper.is_none_or(|u| u.is_some_and(|u| t < u))
                }
                None => false,
            })
            .map(|i| (i, i < to))
            .collect();

        Some(Intersection {
            from,
            to,
            confidence,
            crossing,
            members,
        })
    }

    /// First adjacent pair of measured nodes where some construct turns from
    /// closer-to-vulnerable into closer-to-fixed.
    fn crossing(&self, start: usize, end: usize) -> Option<Crossing> {
        let measured: Vec<usize> = (start..=end.min(self.nodes.len().saturating_sub(1)))
            .filter(|&i| !measured_closeness(self.nodes[i]).is_empty())
            .collect();

        for pair in measured.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let before = measured_closeness(self.nodes[a]);
            let after = measured_closeness(self.nodes[b]);
            let total = self.nodes[a]
                .assessments
                .iter()
                .filter(|x| x.is_mod() && x.qname_in_jar && x.d_to_f != NOT_COMPUTED)
                .count();
            let crossings = before
                .iter()
                .filter(|(key, ca)| **ca > 0 && after.get(*key).is_some_and(|cb| *cb < 0))
                .count();
            if crossings > 0 {
                return Some(Crossing {
                    from: a,
                    to: b,
                    confidence: crossings as f64 / total as f64,
                });
            }
        }
        None
    }

    /// Fixed boundary this tree contributes to the group:artifact: the first
    /// fixed version after the last vulnerable one, else the intersection end.
    pub fn last_first_fixed(&self, intersection: Option<&Intersection>) -> Option<usize> {
        let after = self.last_vulnerable().map_or(0, |i| i + 1);
        self.nodes[after..]
            .iter()
            .position(|n| n.sources_available && n.is_equal_to_f())
            .map(|p| p + after)
            .or_else(|| intersection.map(|x| x.to))
    }
}

fn measured_closeness(result: &ArtifactResult) -> BTreeMap<(&str, &str), i32> {
    result
        .assessments
        .iter()
        .filter(|a| {
            a.is_mod() && a.qname_in_jar && a.d_to_v != NOT_COMPUTED && a.d_to_f != NOT_COMPUTED
        })
        .map(|a| ((a.qname.as_str(), a.path.as_str()), a.closeness()))
        .collect()
}
