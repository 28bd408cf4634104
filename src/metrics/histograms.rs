//! Histograms of observed durations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Buckets (in seconds) sized for rsync invocations, from sub-second no-op
/// runs up to the default transfer timeout.
pub const TRANSFER_BUCKETS: &[f64] = &[
    0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
];

/// Buckets (in seconds) for node listings.
pub const LISTING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0];

/// A cumulative histogram.
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    // f64 bits
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram over `buckets`, which are sorted on construction.
    pub fn with_buckets(name: &'static str, help: &'static str, buckets: &[f64]) -> Self {
        let mut buckets = buckets.to_vec();
        buckets.sort_by(f64::total_cmp);
        let bucket_counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            name,
            help,
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .sum
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        for (upper, count) in self.buckets.iter().zip(&self.bucket_counts) {
            if value <= *upper {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            sum: f64::from_bits(self.sum.load(Ordering::Relaxed)),
            count: self.count.load(Ordering::Relaxed),
        }
    }

    pub fn render(&self, out: &mut String) {
        let snap = self.snapshot();
        out.push_str(&format!(
            "# HELP {name} {}\n# TYPE {name} histogram\n",
            self.help,
            name = self.name
        ));
        for (upper, count) in snap.buckets.iter().zip(&snap.bucket_counts) {
            out.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", self.name, upper, count));
        }
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, snap.count));
        out.push_str(&format!("{}_sum {}\n", self.name, snap.sum));
        out.push_str(&format!("{}_count {}\n", self.name, snap.count));
    }
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<f64>,
    /// Observations `<=` each bucket bound.
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Smallest bucket bound covering `p` percent of observations.
    ///
    /// Returns `f64::INFINITY` when the percentile falls past the last bucket.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = (self.count as f64 * p / 100.0).ceil() as u64;
        self.buckets
            .iter()
            .zip(&self.bucket_counts)
            .find(|(_, count)| **count >= target)
            .map_or(f64::INFINITY, |(upper, _)| *upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe() {
        let histogram = Histogram::with_buckets("t", "test", &[10.0, 1.0, 5.0]);
        histogram.observe(0.5);
        histogram.observe(3.0);
        histogram.observe(20.0);

        let snap = histogram.snapshot();
        assert_eq!(snap.buckets, vec![1.0, 5.0, 10.0]);
        assert_eq!(snap.bucket_counts, vec![1, 2, 2]);
        assert_eq!(snap.count, 3);
        assert!((snap.sum - 23.5).abs() < 1e-9);
    }

    #[test]
    fn test_percentile() {
        let histogram = Histogram::with_buckets("t", "test", TRANSFER_BUCKETS);
        for _ in 0..9 {
            histogram.observe_duration(Duration::from_millis(200));
        }
        histogram.observe_duration(Duration::from_secs(7200));

        let snap = histogram.snapshot();
        assert_eq!(snap.percentile(50.0), 0.5);
        assert_eq!(snap.percentile(100.0), f64::INFINITY);
    }

    #[test]
    fn test_render() {
        let histogram = Histogram::with_buckets("ringsync_batch_seconds", "Batch time", &[1.0]);
        histogram.observe(0.25);

        let mut out = String::new();
        histogram.render(&mut out);
        assert!(out.contains("ringsync_batch_seconds_bucket{le=\"1\"} 1"));
        assert!(out.contains("ringsync_batch_seconds_bucket{le=\"+Inf\"} 1"));
        assert!(out.contains("ringsync_batch_seconds_count 1"));
    }
}
