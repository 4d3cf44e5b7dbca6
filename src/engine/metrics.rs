//! Metrics collection for workflow execution
//!
//! Prometheus-compatible counters and histograms for execution volume,
//! latency, and error rates. Only the exposition text is produced here; the
//! exporter is the embedder's concern.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::time::Instant;

lazy_static! {
    /// Counter for workflow executions by graph and terminal status.
    static ref EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "graphflow_executions_total",
        "Total number of workflow executions",
        &["graph_name", "status"]
    )
    .unwrap();

    /// Histogram for overall execution duration.
    static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "graphflow_execution_duration_seconds",
        "Workflow execution duration in seconds",
        &["graph_name"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    )
    .unwrap();

    /// Counter for node executions by kind and outcome.
    static ref NODE_EXECUTIONS: IntCounterVec = register_int_counter_vec!(
        "graphflow_node_executions_total",
        "Total number of node executions",
        &["node_kind", "status"]
    )
    .unwrap();

    /// Histogram for node handler duration.
    static ref NODE_DURATION: HistogramVec = register_histogram_vec!(
        "graphflow_node_duration_seconds",
        "Node handler duration in seconds",
        &["node_kind"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Gauge for currently running executions.
    static ref ACTIVE_EXECUTIONS: IntGauge = register_int_gauge!(
        "graphflow_active_executions",
        "Number of currently active workflow executions"
    )
    .unwrap();

    /// Counter for taxonomy errors by kind.
    static ref ERRORS: IntCounterVec = register_int_counter_vec!(
        "graphflow_errors_total",
        "Total number of engine errors",
        &["error_kind"]
    )
    .unwrap();

    /// Histogram for checkpoint capture duration.
    static ref CHECKPOINT_DURATION: HistogramVec = register_histogram_vec!(
        "graphflow_checkpoint_duration_seconds",
        "Checkpoint operation duration in seconds",
        &["operation"],
        vec![0.001, 0.01, 0.1, 1.0]
    )
    .unwrap();
}

/// Metrics recorder bound to one graph name.
pub struct MetricsCollector {
    graph_name: String,
}

impl MetricsCollector {
    pub fn new(graph_name: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
        }
    }

    /// Record an execution entering the running state.
    pub fn record_execution_start(&self) {
        ACTIVE_EXECUTIONS.inc();
    }

    /// Record an execution reaching a terminal status.
    pub fn record_execution_end(&self, status: &str, duration_secs: f64) {
        ACTIVE_EXECUTIONS.dec();
        EXECUTIONS
            .with_label_values(&[&self.graph_name, status])
            .inc();
        EXECUTION_DURATION
            .with_label_values(&[&self.graph_name])
            .observe(duration_secs);
    }

    /// Record one node handler run.
    pub fn record_node_execution(&self, node_kind: &str, status: &str, duration_secs: f64) {
        NODE_EXECUTIONS.with_label_values(&[node_kind, status]).inc();
        NODE_DURATION
            .with_label_values(&[node_kind])
            .observe(duration_secs);
    }

    /// Record a taxonomy error.
    pub fn record_error(&self, error_kind: &str) {
        ERRORS.with_label_values(&[error_kind]).inc();
    }

    /// Record a checkpoint operation.
    pub fn record_checkpoint(&self, operation: &str, duration_secs: f64) {
        CHECKPOINT_DURATION
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Export all registered metrics in the Prometheus text format.
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
