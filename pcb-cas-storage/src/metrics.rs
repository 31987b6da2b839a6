use std::sync::Arc;

/// Shared metrics collector interface
///
/// Lets the embedding application plug in its own metrics backend
/// (Prometheus, StatsD, etc.) without the store depending on one.
pub trait MetricsCollector: Send + Sync {
    fn object_stored(&self, size: u64);
    fn object_duplicate(&self);
    fn bytes_received(&self, amount: u64);
    fn put_failed(&self);
    fn labeled_stored(&self);
    fn labeled_updated(&self);
    fn promote_failed(&self);
    fn staging_removed(&self, amount: u64);
}

/// No-op metrics collector (default)
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn object_stored(&self, _size: u64) {}
    fn object_duplicate(&self) {}
    fn bytes_received(&self, _amount: u64) {}
    fn put_failed(&self) {}
    fn labeled_stored(&self) {}
    fn labeled_updated(&self) {}
    fn promote_failed(&self) {}
    fn staging_removed(&self, _amount: u64) {}
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn object_stored(&self, size: u64) {
        self.0.object_stored(size);
    }

    pub fn object_duplicate(&self) {
        self.0.object_duplicate();
    }

    pub fn bytes_received(&self, amount: u64) {
        self.0.bytes_received(amount);
    }

    pub fn put_failed(&self) {
        self.0.put_failed();
    }

    pub fn labeled_stored(&self) {
        self.0.labeled_stored();
    }

    pub fn labeled_updated(&self) {
        self.0.labeled_updated();
    }

    pub fn promote_failed(&self) {
        self.0.promote_failed();
    }

    pub fn staging_removed(&self, amount: u64) {
        self.0.staging_removed(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}
