use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, IntCounter,
    IntCounterVec, IntGaugeVec,
};

use pcb_cas_storage::{MetricsCollector, StoreStats};

lazy_static! {
    static ref OBJECTS: IntCounterVec = register_int_counter_vec!(
        "pcb_cas_objects_total",
        "Uploads handled by the content store, by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    static ref BYTES_RECEIVED: IntCounter = register_int_counter!(
        "pcb_cas_bytes_received_total",
        "Bytes staged from uploads"
    )
    .expect("metric can be registered");
    static ref OBJECT_BYTES_STORED: IntCounter = register_int_counter!(
        "pcb_cas_object_bytes_stored_total",
        "Bytes committed as new objects"
    )
    .expect("metric can be registered");
    static ref LABELED: IntCounterVec = register_int_counter_vec!(
        "pcb_cas_labeled_total",
        "Promotions into the labeled tree, by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    static ref STAGING_REMOVED: IntCounter = register_int_counter!(
        "pcb_cas_staging_removed_total",
        "Stale staging entries removed"
    )
    .expect("metric can be registered");
    static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "pcb_cas_http_requests_total",
        "API requests by route and status code",
        &["route", "status"]
    )
    .expect("metric can be registered");
    static ref TASK_NOTIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "pcb_cas_task_notifications_total",
        "Labeling task creation calls, by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    static ref TREE_OBJECTS: IntGaugeVec = register_int_gauge_vec!(
        "pcb_cas_tree_objects",
        "Images per tree at the last statistics refresh",
        &["tree"]
    )
    .expect("metric can be registered");
    static ref TREE_BYTES: IntGaugeVec = register_int_gauge_vec!(
        "pcb_cas_tree_bytes",
        "Bytes per tree at the last statistics refresh",
        &["tree"]
    )
    .expect("metric can be registered");
}

/// Store metrics backed by the process-wide Prometheus registry.
#[derive(Debug, Default)]
struct PrometheusCollector;

impl MetricsCollector for PrometheusCollector {
    fn object_stored(&self, size: u64) {
        OBJECTS.with_label_values(&["stored"]).inc();
        OBJECT_BYTES_STORED.inc_by(size);
    }

    fn object_duplicate(&self) {
        OBJECTS.with_label_values(&["duplicate"]).inc();
    }

    fn bytes_received(&self, amount: u64) {
        BYTES_RECEIVED.inc_by(amount);
    }

    fn put_failed(&self) {
        OBJECTS.with_label_values(&["failed"]).inc();
    }

    fn labeled_stored(&self) {
        LABELED.with_label_values(&["stored"]).inc();
    }

    fn labeled_updated(&self) {
        LABELED.with_label_values(&["updated"]).inc();
    }

    fn promote_failed(&self) {
        LABELED.with_label_values(&["failed"]).inc();
    }

    fn staging_removed(&self, amount: u64) {
        STAGING_REMOVED.inc_by(amount);
    }
}

/// Service-level metrics handle.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics;

impl SharedMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Collector to hand to the content store.
    pub fn to_store_metrics(&self) -> pcb_cas_storage::SharedMetrics {
        pcb_cas_storage::SharedMetrics::new(Arc::new(PrometheusCollector))
    }

    pub fn http_request(&self, route: &str, status: u16) {
        HTTP_REQUESTS
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    pub fn task_notified(&self, success: bool) {
        let outcome = if success { "created" } else { "failed" };
        TASK_NOTIFICATIONS.with_label_values(&[outcome]).inc();
    }

    pub fn record_stats(&self, stats: &StoreStats) {
        TREE_OBJECTS
            .with_label_values(&["unlabeled"])
            .set(stats.unlabeled.count as i64);
        TREE_OBJECTS
            .with_label_values(&["labeled"])
            .set(stats.labeled.count as i64);
        TREE_BYTES
            .with_label_values(&["unlabeled"])
            .set(stats.unlabeled.total_size_bytes as i64);
        TREE_BYTES
            .with_label_values(&["labeled"])
            .set(stats.labeled.total_size_bytes as i64);
    }
}
