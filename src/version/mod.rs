use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, UpdateError};

/// Ordered build identifier such as `26100.6130`.
///
/// Equality and ordering treat missing trailing components as zero, so
/// `1` and `1.0` compare equal.
#[derive(Clone, Debug)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn new(parts: Vec<u64>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[u64] {
        &self.0
    }

    /// Branch component of the build (`26100` for `26100.6130`).
    pub fn major(&self) -> u64 {
        self.0.first().copied().unwrap_or(0)
    }

    /// Update revision of the build, if present.
    pub fn minor(&self) -> Option<u64> {
        self.0.get(1).copied()
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        compare(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self.parts(), other.parts())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// Extract the `major.minor` form of a raw version string.
///
/// Every maximal digit run counts as a component; only the first two are kept.
///
/// # Errors
/// Returns [`UpdateError::Parse`] if `raw` contains no digits.
pub fn parse_short(raw: &str) -> Result<(String, Version)> {
    let runs = digit_runs(raw)
        .into_iter()
        .map(|run| {
            run.parse::<u64>()
                .map_err(|e| UpdateError::Parse(format!("invalid component {run} in {raw}: {e}")))
        })
        .take(2)
        .collect::<Result<Vec<u64>>>()?;
    if runs.is_empty() {
        return Err(UpdateError::Parse(format!("no version numbers in {raw:?}")));
    }
    let version = Version::new(runs);
    Ok((version.to_string(), version))
}

/// Compare two component lists, padding the shorter one with zeros.
pub fn compare(a: &[u64], b: &[u64]) -> Ordering {
    let max_len = a.len().max(b.len());
    for i in 0..max_len {
        let a_part = a.get(i).copied().unwrap_or(0);
        let b_part = b.get(i).copied().unwrap_or(0);
        match a_part.cmp(&b_part) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// All maximal runs of ASCII digits in `text`, in order of appearance.
pub fn digit_runs(text: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_ascii_digit(), start) {
            (true, None) => start = Some(idx),
            (false, Some(begin)) => {
                runs.push(&text[begin..idx]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(begin) = start {
        runs.push(&text[begin..]);
    }
    runs
}
