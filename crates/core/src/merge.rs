//! Tag merge policy: combines fresh keywords with what a file already carries.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Write(BTreeSet<String>),
    /// Nothing usable came back; existing metadata must stay as it is.
    NoOp,
}

/// Upper-cases the leading character and trims; `None` for blank input.
pub fn normalize_keyword(keyword: &str) -> Option<String> {
    let trimmed = keyword.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

pub fn merge(
    fresh: &[String],
    existing: Option<&BTreeSet<String>>,
    keep_existing: bool,
    sentinel: &str,
) -> MergeOutcome {
    let mut merged: BTreeSet<String> = fresh.iter().filter_map(|k| normalize_keyword(k)).collect();
    if merged.is_empty() {
        return MergeOutcome::NoOp;
    }
    merged.insert(sentinel.to_string());
    if keep_existing {
        if let Some(existing) = existing {
            merged.extend(existing.iter().cloned());
        }
    }
    MergeOutcome::Write(merged)
}
