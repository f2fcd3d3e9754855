//! Maven-style version strings and their release hierarchy.
//!
//! A version `1.2.3-RC1` splits into a numeric part (`1.2.3`) and a tag
//! (`-RC1`). Versions are ordered by numeric segments first, then by segment
//! count, then a release sorts after any tagged build of the same numbers.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    raw: String,
}

impl Version {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn segments(&self) -> Vec<&str> {
        self.raw.split('.').collect()
    }

    pub fn major_release(&self) -> &str {
        self.raw.split('.').next().unwrap_or("0")
    }

    /// `major.minor`, where minor keeps only the leading digits of the second segment.
    pub fn minor_release(&self) -> String {
        let segments = self.segments();
        let major = segments.first().copied().unwrap_or("0");
        let minor = segments
            .get(1)
            .map(|s| leading_digits(s))
            .filter(|d| !d.is_empty())
            .unwrap_or("0");
        format!("{major}.{minor}")
    }

    /// `major.minor.patch`, padding missing segments with `0`.
    pub fn maintenance_release(&self) -> String {
        let segments = self.segments();
        let part = |i: usize| segments.get(i).copied().unwrap_or("0");
        format!("{}.{}.{}", part(0), part(1), part(2))
    }

    pub fn is_maintenance_release(&self) -> bool {
        let segments = self.segments();
        segments.len() == 3
            || (segments.len() > 3 && (segments[3] == "0" || segments[3] == "RELEASE"))
    }

    /// Numeric value of the minor segment, if it starts with digits.
    pub fn minor_number(&self) -> Option<u64> {
        self.segments()
            .get(1)
            .and_then(|s| leading_digits(s).parse::<u64>().ok())
    }

    /// Compares only the numeric prefixes. Segments that differ textually but
    /// not numerically (`01` vs `1`) stop the comparison as equal.
    pub fn compare_number(&self, other: &Version) -> Ordering {
        let (this_num, _) = split_numeric(&self.raw);
        let (other_num, _) = split_numeric(&other.raw);
        for (a, b) in numeric_segments(this_num).zip(numeric_segments(other_num)) {
            if a == b {
                continue;
            }
            match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(x), Ok(y)) if x == y => break,
                (Ok(x), Ok(y)) => return x.cmp(&y),
                _ => continue,
            }
        }
        Ordering::Equal
    }

    fn sort_key(&self) -> (Vec<u64>, bool, String) {
        let (num, tag) = split_numeric(&self.raw);
        let numbers = numeric_segments(num).map(segment_value).collect();
        (numbers, tag.is_empty(), tag.to_lowercase())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn leading_digits(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}

fn split_numeric(raw: &str) -> (&str, &str) {
    let end = raw
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw.split_at(end)
}

fn numeric_segments(num: &str) -> impl Iterator<Item = &str> {
    num.trim_end_matches('.').split('.')
}

fn segment_value(segment: &str) -> u64 {
    if segment.is_empty() {
        return 0;
    }
    segment.parse::<u64>().unwrap_or(u64::MAX)
}
