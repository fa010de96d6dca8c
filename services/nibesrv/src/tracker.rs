//! Defrost-counter tracker
//!
//! The controller only exposes whether a defrost is running right now. The
//! tracker counts 0→1 transitions of that register and seeds the running
//! total from the last value recorded in the time-series store, so a
//! restart does not reset the published counter to zero.

use tracing::{debug, info, warn};

use crate::store::SeriesStore;

/// Where the last published counter value lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSource {
    pub series: String,
    pub field: String,
}

/// Edge counter with one-time baseline reconciliation
#[derive(Debug, Default)]
pub struct DefrostCounterTracker {
    baseline_established: bool,
    previous_input: Option<i64>,
    count: u64,
}

impl DefrostCounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the counter from the store
    ///
    /// Returns `true` when a baseline was established by this call. Once a
    /// baseline exists further calls do nothing and return `false`.
    pub async fn reconcile(&mut self, store: &dyn SeriesStore, source: &CounterSource) -> bool {
        if self.baseline_established {
            return false;
        }

        match store.query_last(&source.series, &source.field).await {
            Ok(Some(prior)) => {
                let prior = prior.round();
                if prior > 0.0 {
                    self.count = self.count.saturating_add(prior as u64);
                }
                self.baseline_established = true;
                info!(
                    "Defrost counter reconciled from {}.{}: {} (prior {})",
                    source.series, source.field, self.count, prior
                );
                true
            },
            Ok(None) => {
                self.baseline_established = true;
                info!(
                    "No prior {}.{} recorded, defrost counter starts at {}",
                    source.series, source.field, self.count
                );
                true
            },
            Err(e) => {
                warn!("Defrost counter baseline not available: {}", e);
                false
            },
        }
    }

    /// Feed the current value of the defrost-status register
    pub fn observe(&mut self, current: i64) {
        // No edge on the very first observation
        if self.previous_input == Some(0) && current == 1 {
            self.count += 1;
            debug!("Defrost started, counter now {}", self.count);
        }
        self.previous_input = Some(current);
    }

    pub fn baseline_established(&self) -> bool {
        self.baseline_established
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Counter value to publish; `None` until a baseline exists
    pub fn published_count(&self) -> Option<u64> {
        self.baseline_established.then_some(self.count)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::{NibeSrvError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct FixedStore {
        answer: Result<Option<f64>>,
        calls: AtomicUsize,
    }

    impl FixedStore {
        fn new(answer: Result<Option<f64>>) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SeriesStore for FixedStore {
        async fn query_last(&self, _series: &str, _field: &str) -> Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn source() -> CounterSource {
        CounterSource {
            series: "nibe_s2125_mqtt".to_string(),
            field: "defrost_counter".to_string(),
        }
    }

    #[test]
    fn test_counts_rising_edges() {
        let mut tracker = DefrostCounterTracker::new();
        for value in [0, 0, 1, 0, 1] {
            tracker.observe(value);
        }
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_first_observation_is_not_an_edge() {
        let mut tracker = DefrostCounterTracker::new();
        tracker.observe(1);
        assert_eq!(tracker.count(), 0);
        tracker.observe(1);
        assert_eq!(tracker.count(), 0);
        tracker.observe(0);
        tracker.observe(1);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_non_binary_values_do_not_count() {
        let mut tracker = DefrostCounterTracker::new();
        for value in [0, 2, 1, 0, 3] {
            tracker.observe(value);
        }
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_with_prior_value() {
        let store = FixedStore::new(Ok(Some(7.0)));
        let mut tracker = DefrostCounterTracker::new();
        assert_eq!(tracker.published_count(), None);

        assert!(tracker.reconcile(&store, &source()).await);
        assert!(tracker.baseline_established());
        assert_eq!(tracker.count(), 7);

        tracker.observe(0);
        tracker.observe(1);
        assert_eq!(tracker.published_count(), Some(8));

        // Baseline is taken once only
        assert!(!tracker.reconcile(&store, &source()).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.count(), 8);
    }

    #[tokio::test]
    async fn test_reconcile_adds_to_edges_seen_before_baseline() {
        let store = FixedStore::new(Ok(Some(7.4)));
        let mut tracker = DefrostCounterTracker::new();
        tracker.observe(0);
        tracker.observe(1);

        assert!(tracker.reconcile(&store, &source()).await);
        assert_eq!(tracker.published_count(), Some(8));
    }

    #[tokio::test]
    async fn test_reconcile_with_empty_store() {
        let store = FixedStore::new(Ok(None));
        let mut tracker = DefrostCounterTracker::new();
        assert!(tracker.reconcile(&store, &source()).await);
        assert_eq!(tracker.published_count(), Some(0));
    }

    #[tokio::test]
    async fn test_reconcile_ignores_negative_prior() {
        let store = FixedStore::new(Ok(Some(-3.0)));
        let mut tracker = DefrostCounterTracker::new();
        assert!(tracker.reconcile(&store, &source()).await);
        assert_eq!(tracker.published_count(), Some(0));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_store_leaves_baseline_open() {
        let store = FixedStore::new(Err(NibeSrvError::store("connection refused")));
        let mut tracker = DefrostCounterTracker::new();

        assert!(!tracker.reconcile(&store, &source()).await);
        assert!(!tracker.baseline_established());
        assert_eq!(tracker.published_count(), None);
        assert!(logs_contain("baseline not available"));

        // Retried on the next call
        assert!(!tracker.reconcile(&store, &source()).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }
}
