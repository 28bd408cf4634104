//! Exclusion of metrics by regular expression.

use crate::error::Result;
use crate::types::MetricEntry;
use regex::Regex;

/// Default exclusion: carbon's own housekeeping metrics.
pub const DEFAULT_EXCLUDE: &[&str] = &[r"^carbon\."];

/// Drops metrics whose name matches any configured pattern.
///
/// Patterns are searched anywhere in the name; anchor them with `^`/`$` to
/// match prefixes or suffixes.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// Compile a filter from patterns.
    ///
    /// A malformed pattern is a configuration error.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the filter has no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check if a metric name is excluded.
    pub fn is_excluded(&self, metric: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(metric))
    }

    /// Keep only entries that are not excluded.
    pub fn apply(&self, entries: Vec<MetricEntry>) -> Vec<MetricEntry> {
        if self.patterns.is_empty() {
            return entries;
        }
        entries
            .into_iter()
            .filter(|e| !self.is_excluded(&e.name))
            .collect()
    }
}
