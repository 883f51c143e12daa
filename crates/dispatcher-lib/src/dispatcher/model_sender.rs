//! Model job sender shared by every unit kind

use super::adapter::UnitAdapter;
use super::PassContext;
use crate::clock::Clock;
use crate::datahub::{DatahubClient, MetricQuery, PredictedSeries, PredictionGroup, SortOrder};
use crate::error::{DispatchError, Result};
use crate::models::{ContainerModelInfo, MetricType, ModelInfo, ResourceUnit, UnitIdentity};
use crate::observability::{DispatcherMetrics, MeasureTarget, StructuredLogger};
use crate::queue::{dedup_key, JobEnvelope, MODEL_QUEUE};
use crate::stats::{DriftEvaluator, Measure};
use crate::tracker::ModelMapper;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of handling one unit in a model pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOutcome {
    /// A model job was published
    Sent,
    /// Predictions are fresh and accurate
    UpToDate,
    /// A model job is already in flight and has not timed out
    InFlight,
}

/// Payload of a model job: the unit snapshot plus the metrics to train
#[derive(Serialize)]
struct ModelJobPayload<'a> {
    #[serde(flatten)]
    unit: serde_json::Value,
    metric_types: &'a [MetricType],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    container_metric_types: &'a [ContainerModelInfo],
}

/// Decides which metrics of a unit need a new model and publishes the job
pub struct ModelJobSender {
    datahub: Arc<dyn DatahubClient>,
    tracker: Arc<ModelMapper>,
    evaluator: DriftEvaluator,
    metrics: DispatcherMetrics,
    logger: StructuredLogger,
    clock: Arc<dyn Clock>,
    publish_timeout: Option<Duration>,
}

impl ModelJobSender {
    pub fn new(
        datahub: Arc<dyn DatahubClient>,
        tracker: Arc<ModelMapper>,
        evaluator: DriftEvaluator,
        metrics: DispatcherMetrics,
        logger: StructuredLogger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            datahub,
            tracker,
            evaluator,
            metrics,
            logger,
            clock,
            publish_timeout: None,
        }
    }

    /// Confirm wait passed to the publisher for each job
    pub fn with_publish_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> &Arc<ModelMapper> {
        &self.tracker
    }

    /// Evaluate one unit and publish a model job when it needs one
    pub async fn send(
        &self,
        adapter: &dyn UnitAdapter,
        unit: &ResourceUnit,
        ctx: &PassContext,
    ) -> Result<ModelOutcome> {
        let identity = adapter.identity(unit);
        let granularity = ctx.granularity;
        let now = self.clock.now();

        let groups = self
            .query(adapter, adapter.last_prediction(self.datahub.as_ref(), unit, granularity))
            .await?;

        let mut info = ModelInfo::new(identity.clone(), now);
        let containers = containers_of(unit, &groups);
        if containers.is_empty() {
            info.metric_types = self
                .metrics_to_train(adapter, unit, &identity, ctx, None, groups.first(), now)
                .await?;
        } else {
            for container in containers {
                let group = groups
                    .iter()
                    .find(|g| g.container.as_deref() == Some(container.as_str()));
                let metric_types = self
                    .metrics_to_train(adapter, unit, &identity, ctx, Some(&container), group, now)
                    .await?;
                if !metric_types.is_empty() {
                    info.containers.push(ContainerModelInfo {
                        name: container,
                        metric_types,
                    });
                }
            }
        }

        if info.is_empty() {
            debug!(
                unit = %identity,
                data_granularity = %granularity,
                "No metric needs a new model"
            );
            return Ok(ModelOutcome::UpToDate);
        }

        self.publish(adapter, unit, &identity, ctx, info, now).await
    }

    /// Metrics of the unit, or of one pod container, that need training
    #[allow(clippy::too_many_arguments)]
    async fn metrics_to_train(
        &self,
        adapter: &dyn UnitAdapter,
        unit: &ResourceUnit,
        identity: &UnitIdentity,
        ctx: &PassContext,
        container: Option<&str>,
        latest: Option<&PredictionGroup>,
        now: i64,
    ) -> Result<Vec<MetricType>> {
        let granularity = ctx.granularity;
        let defaults = adapter.default_metric_types().to_vec();

        let Some(latest) = latest.filter(|g| g.has_samples()) else {
            info!(
                unit = %identity,
                container = container.unwrap_or(""),
                data_granularity = %granularity,
                "No prediction found, sending model job"
            );
            return Ok(defaults);
        };

        match latest.latest_timestamp() {
            Some(ts) if ts > now => {}
            ts => {
                info!(
                    unit = %identity,
                    container = container.unwrap_or(""),
                    data_granularity = %granularity,
                    last_prediction_time = ts.unwrap_or_default(),
                    "Prediction expired, sending model job"
                );
                return Ok(defaults);
            }
        }

        let mut to_train: Vec<MetricType> = defaults
            .into_iter()
            .filter(|metric_type| {
                !latest
                    .raw
                    .iter()
                    .any(|s| s.metric_type == *metric_type && !s.samples.is_empty())
            })
            .collect();
        for metric_type in &to_train {
            info!(
                unit = %identity,
                container = container.unwrap_or(""),
                data_granularity = %granularity,
                metric_type = %metric_type,
                "No prediction for metric, sending model job"
            );
        }

        let mut predicted: Vec<PredictedSeries> = Vec::new();
        for series in latest.raw.iter().filter(|s| !s.samples.is_empty()) {
            let full = self
                .query(
                    adapter,
                    adapter.prediction_series(
                        self.datahub.as_ref(),
                        unit,
                        granularity,
                        container,
                        series,
                    ),
                )
                .await?;
            predicted.push(full);
        }

        let start = predicted
            .iter()
            .filter_map(|s| s.earliest_timestamp())
            .filter(|ts| *ts > 0 && *ts <= now)
            .min()
            .unwrap_or(now - ctx.prediction_steps * granularity.secs());

        let query = MetricQuery {
            start,
            end: Some(now),
            metric_types: predicted.iter().map(|s| s.metric_type).collect(),
            aggregation: adapter.aggregation(granularity),
            order: SortOrder::Asc,
        };
        let observed = self
            .query(
                adapter,
                adapter.observed_series(self.datahub.as_ref(), unit, granularity, &query),
            )
            .await?;
        let observed = observed
            .iter()
            .find(|g| container.is_none() || g.container.as_deref() == container);

        for series in &predicted {
            let Some(actual) = observed.and_then(|g| g.series(series.metric_type)) else {
                debug!(
                    unit = %identity,
                    metric_type = %series.metric_type,
                    "No observed metrics to compare with prediction"
                );
                continue;
            };

            let assessment = self.evaluator.evaluate(
                series.metric_type,
                &actual.samples,
                &series.samples,
                granularity.secs(),
            );

            let target = MeasureTarget {
                identity,
                container,
                granularity,
                metric_type: series.metric_type,
            };
            if let Some(value) = assessment.mape.value {
                self.metrics.set_mape(target, value);
            }
            if let Some(value) = assessment.rmse.value {
                self.metrics.set_rmse(target, value);
            }

            if assessment.drifted() {
                let verdict = assessment.active_verdict();
                let config = self.evaluator.config();
                let threshold = match verdict.measure {
                    Measure::Mape => config.mape_threshold,
                    Measure::Rmse => config.rmse_threshold,
                };
                self.metrics.inc_drift(target);
                self.logger.log_drift(
                    target,
                    verdict.measure.as_str(),
                    verdict.value.unwrap_or_default(),
                    threshold,
                );
            }

            if assessment.needs_retrain() && !to_train.contains(&series.metric_type) {
                to_train.push(series.metric_type);
            }
        }

        Ok(to_train)
    }

    async fn publish(
        &self,
        adapter: &dyn UnitAdapter,
        unit: &ResourceUnit,
        identity: &UnitIdentity,
        ctx: &PassContext,
        info: ModelInfo,
        now: i64,
    ) -> Result<ModelOutcome> {
        let kind = adapter.kind();
        let granularity = ctx.granularity;

        let payload = ModelJobPayload {
            unit: unit.payload_value()?,
            metric_types: &info.metric_types,
            container_metric_types: &info.containers,
        };
        let body = JobEnvelope::builder(kind, granularity.secs(), serde_json::to_string(&payload)?)
            .create_timestamp(now)
            .build()
            .to_json()?;

        let mut metric_types = info.metric_types.clone();
        for container in &info.containers {
            metric_types.extend(container.metric_types.iter().copied());
        }
        metric_types.sort();
        metric_types.dedup();

        let Some(claim) = self.tracker.try_claim(kind, granularity, info).await else {
            debug!(
                unit = %identity,
                data_granularity = %granularity,
                "Model job still in flight, skipping"
            );
            return Ok(ModelOutcome::InFlight);
        };

        let key = dedup_key(kind, &identity.key(), granularity.secs());
        match ctx
            .publisher
            .send_json(MODEL_QUEUE, &body, &key, self.publish_timeout)
            .await
        {
            Ok(()) => {
                self.metrics.inc_jobs_sent(MODEL_QUEUE, kind, granularity);
                self.logger
                    .log_job_sent(MODEL_QUEUE, identity, granularity, &metric_types);
                Ok(ModelOutcome::Sent)
            }
            Err(err) => {
                self.tracker.release(claim).await;
                self.metrics.inc_job_send_failures(MODEL_QUEUE, kind, granularity);
                warn!(
                    unit = %identity,
                    data_granularity = %granularity,
                    error = %err,
                    "Failed to publish model job"
                );
                Err(err)
            }
        }
    }

    /// Await a datahub call, counting and normalizing failures
    async fn query<T>(
        &self,
        adapter: &dyn UnitAdapter,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        call.await.map_err(|err| {
            self.metrics.inc_query_errors(adapter.kind());
            match err {
                DispatchError::QueryFailed(_) => err,
                other => DispatchError::QueryFailed(other.to_string()),
            }
        })
    }
}

/// Containers evaluated separately, empty for kinds without containers
fn containers_of(unit: &ResourceUnit, groups: &[PredictionGroup]) -> Vec<String> {
    if !matches!(unit, ResourceUnit::Pod(_)) {
        return Vec::new();
    }
    if !unit.containers().is_empty() {
        return unit.containers().to_vec();
    }
    let mut names: Vec<String> = groups.iter().filter_map(|g| g.container.clone()).collect();
    names.sort();
    names.dedup();
    names
}
