/* src/zone/metrics.rs */

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Query counters for one zone. Shared between successive versions of the
/// zone so reloads keep counting.
#[derive(Debug, Default)]
pub struct ZoneMetrics {
    queries: AtomicU64,
    edns_queries: AtomicU64,
    labels: Mutex<HashMap<String, u64>>,
}

impl ZoneMetrics {
    /// Counts one query. Only labels defined in the zone are passed in, so
    /// the per-label table stays bounded by the zone file.
    pub fn record_query(&self, label: Option<&str>, edns: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if edns {
            self.edns_queries.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(label) = label {
            *self.labels.lock().entry(label.to_string()).or_default() += 1;
        }
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn edns_queries(&self) -> u64 {
        self.edns_queries.load(Ordering::Relaxed)
    }

    /// The `n` most queried labels, busiest first.
    pub fn top_labels(&self, n: usize) -> Vec<(String, u64)> {
        let mut labels: Vec<(String, u64)> = self
            .labels
            .lock()
            .iter()
            .map(|(label, count)| (label.clone(), *count))
            .collect();
        labels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        labels.truncate(n);
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_queries_and_ranks_labels() {
        let metrics = ZoneMetrics::default();
        metrics.record_query(Some("www"), true);
        metrics.record_query(Some("www"), false);
        metrics.record_query(None, false);
        metrics.record_query(Some("mail"), false);
        metrics.record_query(Some("mail"), false);
        metrics.record_query(Some("mail"), false);

        assert_eq!(metrics.queries(), 6);
        assert_eq!(metrics.edns_queries(), 1);
        assert_eq!(
            metrics.top_labels(2),
            vec![("mail".to_string(), 3), ("www".to_string(), 2)]
        );
    }
}
