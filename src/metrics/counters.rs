//! Monotonic counters.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Render in Prometheus exposition format.
    pub fn render(&self, out: &mut String) {
        out.push_str(&format!(
            "# HELP {name} {}\n# TYPE {name} counter\n{name} {}\n",
            self.help,
            self.get(),
            name = self.name,
        ));
    }
}

/// A counter split by a single label, e.g. transfer mode.
#[derive(Debug)]
pub struct LabeledCounter {
    name: &'static str,
    help: &'static str,
    label: &'static str,
    values: RwLock<BTreeMap<String, u64>>,
}

impl LabeledCounter {
    pub fn new(name: &'static str, help: &'static str, label: &'static str) -> Self {
        Self {
            name,
            help,
            label,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn inc(&self, value: &str) {
        self.inc_by(value, 1);
    }

    pub fn inc_by(&self, value: &str, n: u64) {
        *self.values.write().entry(value.to_string()).or_default() += n;
    }

    /// Count recorded under `value`, zero if never seen.
    pub fn get(&self, value: &str) -> u64 {
        self.values.read().get(value).copied().unwrap_or(0)
    }

    /// Every label value with its count, ordered by label value.
    pub fn get_all(&self) -> Vec<(String, u64)> {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn render(&self, out: &mut String) {
        out.push_str(&format!(
            "# HELP {name} {}\n# TYPE {name} counter\n",
            self.help,
            name = self.name
        ));
        for (value, count) in self.get_all() {
            out.push_str(&format!(
                "{}{{{}=\"{}\"}} {}\n",
                self.name, self.label, value, count
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("ringsync_test_total", "A test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.get(), 5);

        let mut out = String::new();
        counter.render(&mut out);
        assert!(out.contains("# TYPE ringsync_test_total counter"));
        assert!(out.ends_with("ringsync_test_total 5\n"));
    }

    #[test]
    fn test_labeled_counter() {
        let counter = LabeledCounter::new("ringsync_batches_total", "Batches by mode", "mode");
        counter.inc("update_only");
        counter.inc("update_only");
        counter.inc_by("force_overwrite", 3);

        assert_eq!(counter.get("update_only"), 2);
        assert_eq!(counter.get("force_overwrite"), 3);
        assert_eq!(counter.get("other"), 0);

        let mut out = String::new();
        counter.render(&mut out);
        assert!(out.contains("ringsync_batches_total{mode=\"update_only\"} 2"));
    }
}
