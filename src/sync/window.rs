//! Time-window pre-filtering of the transfer set.

use crate::error::{Error, Result};
use crate::sync::TransferItem;
use crate::types::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// A half-open interval `[start, end)` of Unix timestamps.
///
/// The filter is advisory: it only selects which files are copied, never
/// which points inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: Timestamp,
    end: Timestamp,
}

impl TimeWindow {
    /// Create a window. `end` before `start` is a configuration error.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if end < start {
            return Err(Error::config(format!(
                "end time {} is before start time {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Window from `start` to the current wall clock, read once.
    pub fn until_now(start: Timestamp) -> Result<Self> {
        Self::new(start, now())
    }

    /// Start of the window (inclusive).
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// End of the window (exclusive).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Check if a timestamp falls inside the window.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Keep items whose source copy was modified inside the window.
    ///
    /// Returns the kept items and how many were dropped.
    pub fn apply(&self, items: Vec<TransferItem>) -> (Vec<TransferItem>, usize) {
        let before = items.len();
        let kept: Vec<_> = items
            .into_iter()
            .filter(|item| self.contains(item.source_mtime))
            .collect();
        let dropped = before - kept.len();
        (kept, dropped)
    }
}

/// Current wall-clock time as a Unix timestamp.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Node;

    fn item(mtime: Timestamp) -> TransferItem {
        TransferItem::pull(format!("m.{}", mtime), Node::new("a"), Node::new("b"), mtime)
    }

    #[test]
    fn test_half_open_boundaries() {
        let window = TimeWindow::new(100, 200).unwrap();

        assert!(window.contains(100));
        assert!(window.contains(199));
        assert!(!window.contains(200));
        assert!(!window.contains(99));
    }

    #[test]
    fn test_apply() {
        let window = TimeWindow::new(100, 200).unwrap();
        let (kept, dropped) = window.apply(vec![item(50), item(100), item(150), item(200)]);

        let mtimes: Vec<_> = kept.iter().map(|i| i.source_mtime).collect();
        assert_eq!(mtimes, vec![100, 150]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_invalid_range() {
        assert!(matches!(TimeWindow::new(10, 5), Err(Error::Config(_))));
        // Empty window is allowed but keeps nothing.
        let empty = TimeWindow::new(5, 5).unwrap();
        assert!(!empty.contains(5));
    }

    #[test]
    fn test_until_now() {
        let window = TimeWindow::until_now(0).unwrap();
        assert_eq!(window.start(), 0);
        assert!(window.end() > 1_600_000_000);
    }
}
