//! Observability infrastructure for the dispatcher
//!
//! Provides:
//! - Prometheus metrics on an explicit registry (drift measures, model
//!   seconds, job counters, pass latency)
//! - Structured JSON logging with tracing

use crate::models::{Granularity, MetricType, UnitIdentity, UnitKind};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::{info, warn};

const NAMESPACE: &str = "alameda_ai_dispatcher";

/// Histogram buckets for dispatch pass duration (in seconds)
const PASS_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

const MEASURE_LABELS: &[&str] = &[
    "unit_type",
    "cluster_name",
    "unit",
    "container",
    "data_granularity",
    "metric_type",
];
const MODEL_LABELS: &[&str] = &["unit_type", "cluster_name", "unit", "data_granularity"];
const JOB_LABELS: &[&str] = &["queue", "unit_type", "data_granularity"];

struct DispatcherMetricsInner {
    registry: Registry,
    metric_mape: GaugeVec,
    metric_rmse: GaugeVec,
    metric_drift_total: CounterVec,
    model_seconds: GaugeVec,
    model_seconds_total: CounterVec,
    jobs_sent_total: IntCounterVec,
    job_send_failures_total: IntCounterVec,
    datahub_query_errors_total: IntCounterVec,
    pass_duration_seconds: HistogramVec,
    units_modeling: IntGaugeVec,
}

/// Dispatcher metrics for Prometheus exposition
///
/// Clones share the same registry.
#[derive(Clone)]
pub struct DispatcherMetrics {
    inner: Arc<DispatcherMetricsInner>,
}

/// Labels identifying the target of a drift measurement
#[derive(Debug, Clone, Copy)]
pub struct MeasureTarget<'a> {
    pub identity: &'a UnitIdentity,
    pub container: Option<&'a str>,
    pub granularity: Granularity,
    pub metric_type: MetricType,
}

impl MeasureTarget<'_> {
    fn labels(&self) -> [String; 6] {
        [
            self.identity.kind().as_str().to_string(),
            self.identity.cluster_name().to_string(),
            self.identity.key(),
            self.container.unwrap_or("").to_string(),
            self.granularity.label().to_string(),
            self.metric_type.as_str().to_string(),
        ]
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

impl DispatcherMetrics {
    /// Create metrics registered on a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered on the given registry
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let metric_mape = GaugeVec::new(
            opts("metric_mape", "Latest MAPE between predicted and observed metrics"),
            MEASURE_LABELS,
        )?;
        let metric_rmse = GaugeVec::new(
            opts("metric_rmse", "Latest normalized RMSE between predicted and observed metrics"),
            MEASURE_LABELS,
        )?;
        let metric_drift_total = CounterVec::new(
            opts("metric_drift_total", "Number of drift detections"),
            MEASURE_LABELS,
        )?;
        let model_seconds = GaugeVec::new(
            opts("model_seconds", "Seconds the latest model job took to complete"),
            MODEL_LABELS,
        )?;
        let model_seconds_total = CounterVec::new(
            opts("model_seconds_total", "Total seconds spent on model jobs"),
            MODEL_LABELS,
        )?;
        let jobs_sent_total = IntCounterVec::new(
            opts("jobs_sent_total", "Jobs published to the queue"),
            JOB_LABELS,
        )?;
        let job_send_failures_total = IntCounterVec::new(
            opts("job_send_failures_total", "Jobs that could not be published"),
            JOB_LABELS,
        )?;
        let datahub_query_errors_total = IntCounterVec::new(
            opts("datahub_query_errors_total", "Failed datahub queries"),
            &["unit_type"],
        )?;
        let pass_duration_seconds = HistogramVec::new(
            HistogramOpts::new("dispatch_pass_duration_seconds", "Duration of a dispatch pass")
                .namespace(NAMESPACE)
                .buckets(PASS_BUCKETS.to_vec()),
            &["job_type", "data_granularity"],
        )?;
        let units_modeling = IntGaugeVec::new(
            opts("units_modeling", "Units with a model job in flight"),
            &["unit_type", "data_granularity"],
        )?;

        registry.register(Box::new(metric_mape.clone()))?;
        registry.register(Box::new(metric_rmse.clone()))?;
        registry.register(Box::new(metric_drift_total.clone()))?;
        registry.register(Box::new(model_seconds.clone()))?;
        registry.register(Box::new(model_seconds_total.clone()))?;
        registry.register(Box::new(jobs_sent_total.clone()))?;
        registry.register(Box::new(job_send_failures_total.clone()))?;
        registry.register(Box::new(datahub_query_errors_total.clone()))?;
        registry.register(Box::new(pass_duration_seconds.clone()))?;
        registry.register(Box::new(units_modeling.clone()))?;

        Ok(Self {
            inner: Arc::new(DispatcherMetricsInner {
                registry,
                metric_mape,
                metric_rmse,
                metric_drift_total,
                model_seconds,
                model_seconds_total,
                jobs_sent_total,
                job_send_failures_total,
                datahub_query_errors_total,
                pass_duration_seconds,
                units_modeling,
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Encode all metrics in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn set_mape(&self, target: MeasureTarget<'_>, value: f64) {
        let labels = target.labels();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.inner.metric_mape.with_label_values(&labels).set(value);
    }

    pub fn set_rmse(&self, target: MeasureTarget<'_>, value: f64) {
        let labels = target.labels();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.inner.metric_rmse.with_label_values(&labels).set(value);
    }

    pub fn inc_drift(&self, target: MeasureTarget<'_>) {
        let labels = target.labels();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        self.inner.metric_drift_total.with_label_values(&labels).inc();
    }

    /// Record how long a model job took
    pub fn observe_model_seconds(
        &self,
        identity: &UnitIdentity,
        granularity: Granularity,
        seconds: f64,
    ) {
        let key = identity.key();
        let labels = [
            identity.kind().as_str(),
            identity.cluster_name(),
            key.as_str(),
            granularity.label(),
        ];
        self.inner.model_seconds.with_label_values(&labels).set(seconds);
        self.inner.model_seconds_total.with_label_values(&labels).inc_by(seconds.max(0.0));
    }

    pub fn inc_jobs_sent(&self, queue: &str, kind: UnitKind, granularity: Granularity) {
        self.inner
            .jobs_sent_total
            .with_label_values(&[queue, kind.as_str(), granularity.label()])
            .inc();
    }

    pub fn inc_job_send_failures(&self, queue: &str, kind: UnitKind, granularity: Granularity) {
        self.inner
            .job_send_failures_total
            .with_label_values(&[queue, kind.as_str(), granularity.label()])
            .inc();
    }

    pub fn inc_query_errors(&self, kind: UnitKind) {
        self.inner
            .datahub_query_errors_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn observe_pass_duration(&self, job_type: &str, granularity: Granularity, secs: f64) {
        self.inner
            .pass_duration_seconds
            .with_label_values(&[job_type, granularity.label()])
            .observe(secs);
    }

    pub fn set_units_modeling(&self, kind: UnitKind, granularity: Granularity, count: usize) {
        self.inner
            .units_modeling
            .with_label_values(&[kind.as_str(), granularity.label()])
            .set(count as i64);
    }
}

/// Structured logger for dispatcher events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a published job
    pub fn log_job_sent(
        &self,
        queue: &str,
        identity: &UnitIdentity,
        granularity: Granularity,
        metric_types: &[MetricType],
    ) {
        let metrics: Vec<&str> = metric_types.iter().map(|m| m.as_str()).collect();
        info!(
            event = "job_sent",
            instance = %self.instance,
            queue = queue,
            unit_type = %identity.kind(),
            unit = %identity.key(),
            cluster_name = %identity.cluster_name(),
            data_granularity = %granularity,
            metric_types = ?metrics,
            "Job sent"
        );
    }

    /// Log a drift detection
    pub fn log_drift(&self, target: MeasureTarget<'_>, measure: &str, value: f64, threshold: f64) {
        warn!(
            event = "drift_detected",
            instance = %self.instance,
            unit_type = %target.identity.kind(),
            unit = %target.identity.key(),
            container = target.container.unwrap_or(""),
            data_granularity = %target.granularity,
            metric_type = %target.metric_type,
            measure = measure,
            value = value,
            threshold = threshold,
            "Model drift detected"
        );
    }

    /// Log a completed model job
    pub fn log_model_complete(
        &self,
        identity: &UnitIdentity,
        granularity: Granularity,
        model_seconds: i64,
        tracked: bool,
    ) {
        info!(
            event = "model_complete",
            instance = %self.instance,
            unit_type = %identity.kind(),
            unit = %identity.key(),
            cluster_name = %identity.cluster_name(),
            data_granularity = %granularity,
            model_seconds = model_seconds,
            tracked = tracked,
            "Model job completed"
        );
    }

    pub fn log_startup(&self, version: &str, granularities: &[Granularity], units: &[UnitKind]) {
        let granularities: Vec<&str> = granularities.iter().map(|g| g.label()).collect();
        let units: Vec<&str> = units.iter().map(|u| u.as_str()).collect();
        info!(
            event = "dispatcher_started",
            instance = %self.instance,
            version = %version,
            granularities = ?granularities,
            units = ?units,
            "AI dispatcher started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "dispatcher_shutdown",
            instance = %self.instance,
            reason = %reason,
            "AI dispatcher shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> UnitIdentity {
        UnitIdentity::Node {
            cluster_name: "c1".into(),
            name: "node-a".into(),
        }
    }

    #[test]
    fn test_metrics_are_isolated_per_registry() {
        // Two instances must not collide, unlike global registration
        let first = DispatcherMetrics::new().unwrap();
        let second = DispatcherMetrics::new().unwrap();

        first.inc_jobs_sent("model", UnitKind::Node, Granularity::OneHour);
        let first_text = String::from_utf8(first.encode().unwrap()).unwrap();
        let second_text = String::from_utf8(second.encode().unwrap()).unwrap();

        assert!(first_text.contains("alameda_ai_dispatcher_jobs_sent_total"));
        assert!(!second_text.contains("alameda_ai_dispatcher_jobs_sent_total{"));
    }

    #[test]
    fn test_measure_labels() {
        let metrics = DispatcherMetrics::new().unwrap();
        let identity = node();
        let target = MeasureTarget {
            identity: &identity,
            container: None,
            granularity: Granularity::ThirtySeconds,
            metric_type: MetricType::CpuUsagePercentage,
        };
        metrics.set_mape(target, 12.5);
        metrics.inc_drift(target);

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("alameda_ai_dispatcher_metric_mape"));
        assert!(text.contains("unit=\"node-a\""));
        assert!(text.contains("data_granularity=\"30s\""));
        assert!(text.contains("metric_type=\"CPU_USAGE_SECONDS_PERCENTAGE\""));
    }

    #[test]
    fn test_model_seconds_accumulate() {
        let metrics = DispatcherMetrics::new().unwrap();
        let identity = node();
        metrics.observe_model_seconds(&identity, Granularity::OneHour, 40.0);
        metrics.observe_model_seconds(&identity, Granularity::OneHour, 20.0);

        let gauge = metrics
            .inner
            .model_seconds
            .with_label_values(&["NODE", "c1", "node-a", "1h"])
            .get();
        let total = metrics
            .inner
            .model_seconds_total
            .with_label_values(&["NODE", "c1", "node-a", "1h"])
            .get();
        assert_eq!(gauge, 20.0);
        assert_eq!(total, 60.0);
    }
}
