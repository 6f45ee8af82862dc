//! Reconciliation metrics tracking
//!
//! Thread-safe counters shared by every run of a process, including all
//! workers of a fleet run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Thread-safe metrics for reconciliation runs
#[derive(Debug, Clone)]
pub struct ReconcileMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    issues_found: AtomicUsize,
    issues_fixed: AtomicUsize,
    manual_fix_required: AtomicUsize,
    rows_deleted: AtomicU64,
    categories_committed: AtomicUsize,
    categories_rolled_back: AtomicUsize,
    categories_failed: AtomicUsize,
    stores_processed: AtomicUsize,
    stores_failed: AtomicUsize,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record issues found by a scan phase
    pub fn record_issues(&self, found: usize, manual: usize) {
        self.inner.issues_found.fetch_add(found, Ordering::Relaxed);
        self.inner
            .manual_fix_required
            .fetch_add(manual, Ordering::Relaxed);
    }

    /// Record a category whose repairs were committed
    pub fn record_commit(&self, fixed: usize, rows_deleted: u64) {
        self.inner
            .categories_committed
            .fetch_add(1, Ordering::Relaxed);
        self.inner.issues_fixed.fetch_add(fixed, Ordering::Relaxed);
        self.inner
            .rows_deleted
            .fetch_add(rows_deleted, Ordering::Relaxed);
    }

    /// Record a category rolled back as a dry run
    pub fn record_rollback(&self) {
        self.inner
            .categories_rolled_back
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a category whose transaction failed
    pub fn record_category_failure(&self) {
        self.inner.categories_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished store run
    pub fn record_store(&self, failed: bool) {
        self.inner.stores_processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.inner.stores_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn issues_found(&self) -> usize {
        self.inner.issues_found.load(Ordering::Relaxed)
    }

    pub fn issues_fixed(&self) -> usize {
        self.inner.issues_fixed.load(Ordering::Relaxed)
    }

    pub fn rows_deleted(&self) -> u64 {
        self.inner.rows_deleted.load(Ordering::Relaxed)
    }

    pub fn categories_committed(&self) -> usize {
        self.inner.categories_committed.load(Ordering::Relaxed)
    }

    pub fn categories_rolled_back(&self) -> usize {
        self.inner.categories_rolled_back.load(Ordering::Relaxed)
    }

    pub fn stores_processed(&self) -> usize {
        self.inner.stores_processed.load(Ordering::Relaxed)
    }

    pub fn stores_failed(&self) -> usize {
        self.inner.stores_failed.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            issues_found: self.issues_found(),
            issues_fixed: self.issues_fixed(),
            manual_fix_required: self.inner.manual_fix_required.load(Ordering::Relaxed),
            rows_deleted: self.rows_deleted(),
            categories_committed: self.categories_committed(),
            categories_rolled_back: self.categories_rolled_back(),
            categories_failed: self.inner.categories_failed.load(Ordering::Relaxed),
            stores_processed: self.stores_processed(),
            stores_failed: self.stores_failed(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSummary {
    pub issues_found: usize,
    pub issues_fixed: usize,
    pub manual_fix_required: usize,
    pub rows_deleted: u64,
    pub categories_committed: usize,
    pub categories_rolled_back: usize,
    pub categories_failed: usize,
    pub stores_processed: usize,
    pub stores_failed: usize,
}

impl MetricsSummary {
    /// Log the metrics summary
    pub fn log(&self) {
        log::info!("=== Reconciliation Metrics Summary ===");
        log::info!(
            "Issues: {} found, {} fixed, {} need a manual fix",
            self.issues_found,
            self.issues_fixed,
            self.manual_fix_required
        );
        log::info!("Rows deleted: {}", self.rows_deleted);
        log::info!(
            "Categories: {} committed, {} rolled back, {} failed",
            self.categories_committed,
            self.categories_rolled_back,
            self.categories_failed
        );
        log::info!(
            "Stores: {} processed, {} failed",
            self.stores_processed,
            self.stores_failed
        );
    }
}
