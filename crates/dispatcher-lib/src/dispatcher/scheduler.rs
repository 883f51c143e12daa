//! Per-granularity dispatch loops
//!
//! Every configured granularity runs a model loop (when modeling is
//! enabled) and a predict loop. A pass opens its own publisher, lists the
//! units of every configured kind, filters them and hands each to the
//! matching sender. Kinds that fan out are processed concurrently, bounded
//! by a semaphore.

use super::adapter::{adapter_for, UnitAdapter, UnitFilter};
use super::model_sender::{ModelJobSender, ModelOutcome};
use super::predict_sender::PredictJobSender;
use super::PassContext;
use crate::datahub::DatahubClient;
use crate::error::{DispatchError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{Granularity, ResourceUnit, ScalingTool, UnitKind};
use crate::observability::DispatcherMetrics;
use crate::queue::QueueConnector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    Model,
    Predict,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Model => "model",
            JobType::Predict => "predict",
        }
    }
}

/// Loop settings for one granularity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranularitySchedule {
    pub granularity: Granularity,
    pub prediction_steps: i64,
    pub model_interval: Duration,
    pub predict_interval: Duration,
}

impl GranularitySchedule {
    /// Both loops sleep one granularity between passes
    pub fn new(granularity: Granularity, prediction_steps: i64) -> Self {
        let interval = Duration::from_secs(granularity.secs() as u64);
        Self {
            granularity,
            prediction_steps,
            model_interval: interval,
            predict_interval: interval,
        }
    }

    fn interval(&self, job_type: JobType) -> Duration {
        match job_type {
            JobType::Model => self.model_interval,
            JobType::Predict => self.predict_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub schedules: Vec<GranularitySchedule>,
    pub units: Vec<UnitKind>,
    pub model_enabled: bool,
    pub hourly_predict: bool,
    /// Upper bound on units processed at once when a kind fans out
    pub max_concurrent_units: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedules: Granularity::SUPPORTED
                .iter()
                .map(|g| GranularitySchedule::new(*g, 48))
                .collect(),
            units: UnitKind::ALL.to_vec(),
            model_enabled: true,
            hourly_predict: false,
            max_concurrent_units: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.schedules.is_empty() {
            return Err(DispatchError::Config("no granularity configured".to_string()));
        }
        if self.units.is_empty() {
            return Err(DispatchError::Config("no unit kind configured".to_string()));
        }
        if let Some(schedule) = self
            .schedules
            .iter()
            .find(|s| s.model_interval.is_zero() || s.predict_interval.is_zero())
        {
            return Err(DispatchError::Config(format!(
                "granularity {} has a zero send interval",
                schedule.granularity
            )));
        }
        Ok(())
    }

    pub fn granularities(&self) -> Vec<Granularity> {
        self.schedules.iter().map(|s| s.granularity).collect()
    }
}

/// Counts of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Units that passed the filter
    pub units: usize,
    pub sent: usize,
    pub failed: usize,
}

impl PassSummary {
    fn record(&mut self, result: UnitResult) {
        self.units += 1;
        match result {
            UnitResult::Sent => self.sent += 1,
            UnitResult::Failed => self.failed += 1,
            UnitResult::Skipped => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitResult {
    Sent,
    Skipped,
    Failed,
}

struct JobSenders {
    model: Arc<ModelJobSender>,
    predict: Arc<PredictJobSender>,
}

impl JobSenders {
    async fn dispatch(
        &self,
        job_type: JobType,
        adapter: &dyn UnitAdapter,
        unit: &ResourceUnit,
        ctx: &PassContext,
    ) -> UnitResult {
        let result = match job_type {
            JobType::Model => self.model.send(adapter, unit, ctx).await.map(|outcome| {
                if outcome == ModelOutcome::Sent {
                    UnitResult::Sent
                } else {
                    UnitResult::Skipped
                }
            }),
            JobType::Predict => self
                .predict
                .send(adapter, unit, ctx)
                .await
                .map(|_| UnitResult::Sent),
        };

        result.unwrap_or_else(|err| {
            warn!(
                job_type = job_type.as_str(),
                unit = %adapter.identity(unit),
                data_granularity = %ctx.granularity,
                error = %err,
                "Failed to dispatch unit"
            );
            UnitResult::Failed
        })
    }
}

/// Runs the model and predict loops of every configured granularity
pub struct Dispatcher {
    config: SchedulerConfig,
    datahub: Arc<dyn DatahubClient>,
    connector: Arc<dyn QueueConnector>,
    senders: Arc<JobSenders>,
    metrics: DispatcherMetrics,
    health: HealthRegistry,
}

impl Dispatcher {
    pub fn new(
        config: SchedulerConfig,
        datahub: Arc<dyn DatahubClient>,
        connector: Arc<dyn QueueConnector>,
        model_sender: Arc<ModelJobSender>,
        predict_sender: Arc<PredictJobSender>,
        metrics: DispatcherMetrics,
        health: HealthRegistry,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            datahub,
            connector,
            senders: Arc::new(JobSenders {
                model: model_sender,
                predict: predict_sender,
            }),
            metrics,
            health,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn one task per granularity and job type
    pub fn spawn(self: Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for schedule in &self.config.schedules {
            if self.config.model_enabled {
                handles.push(tokio::spawn(self.clone().run(
                    schedule.clone(),
                    JobType::Model,
                    shutdown.subscribe(),
                )));
            }
            handles.push(tokio::spawn(self.clone().run(
                schedule.clone(),
                JobType::Predict,
                shutdown.subscribe(),
            )));
        }
        handles
    }

    /// Run passes until shutdown; a pass in progress always completes
    pub async fn run(
        self: Arc<Self>,
        schedule: GranularitySchedule,
        job_type: JobType,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let interval = schedule.interval(job_type);
        info!(
            job_type = job_type.as_str(),
            data_granularity = %schedule.granularity,
            interval_secs = interval.as_secs(),
            "Starting dispatch loop"
        );

        loop {
            let summary = self.run_pass(&schedule, job_type).await;
            info!(
                job_type = job_type.as_str(),
                data_granularity = %schedule.granularity,
                units = summary.units,
                sent = summary.sent,
                failed = summary.failed,
                "Dispatch pass finished"
            );

            if !matches!(
                shutdown.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            ) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!(
            job_type = job_type.as_str(),
            data_granularity = %schedule.granularity,
            "Dispatch loop stopped"
        );
    }

    /// Dispatch every accepted unit once
    pub async fn run_pass(&self, schedule: &GranularitySchedule, job_type: JobType) -> PassSummary {
        let started = Instant::now();
        let granularity = schedule.granularity;
        let mut summary = PassSummary::default();

        let publisher = match self.connector.publisher().await {
            Ok(publisher) => {
                self.health.set_healthy(components::QUEUE).await;
                publisher
            }
            Err(err) => {
                error!(
                    job_type = job_type.as_str(),
                    data_granularity = %granularity,
                    error = %err,
                    "Failed to open queue publisher, skipping pass"
                );
                self.health
                    .record_failure(components::QUEUE, err.to_string())
                    .await;
                return summary;
            }
        };
        let ctx = Arc::new(PassContext {
            granularity,
            prediction_steps: schedule.prediction_steps,
            publisher: publisher.clone(),
        });

        let listed = self.list_units().await;
        let filter = UnitFilter {
            hourly_predict: self.config.hourly_predict,
            vpa_present: listed.iter().any(|(kind, units)| {
                *kind == UnitKind::Pod
                    && units
                        .iter()
                        .any(|u| u.scaling_tool() == Some(ScalingTool::Vpa))
            }),
        };

        for (kind, units) in listed {
            let adapter = adapter_for(kind);
            let accepted: Vec<ResourceUnit> = units
                .into_iter()
                .filter(|unit| adapter.accepts(unit, granularity, &filter))
                .collect();
            debug!(
                job_type = job_type.as_str(),
                unit_type = %kind,
                data_granularity = %granularity,
                count = accepted.len(),
                "Dispatching units"
            );

            if adapter.fans_out() {
                self.fan_out(adapter, accepted, &ctx, job_type, &mut summary)
                    .await;
            } else {
                for unit in &accepted {
                    let result = self
                        .senders
                        .dispatch(job_type, adapter.as_ref(), unit, &ctx)
                        .await;
                    summary.record(result);
                }
            }

            if job_type == JobType::Model {
                let tracked = self.senders.model.tracker().len(kind, granularity).await;
                self.metrics.set_units_modeling(kind, granularity, tracked);
            }
        }

        publisher.close().await;
        self.metrics.observe_pass_duration(
            job_type.as_str(),
            granularity,
            started.elapsed().as_secs_f64(),
        );
        summary
    }

    async fn list_units(&self) -> Vec<(UnitKind, Vec<ResourceUnit>)> {
        let mut listed = Vec::with_capacity(self.config.units.len());
        let mut failures = 0;
        for kind in &self.config.units {
            match self.datahub.list_units(*kind).await {
                Ok(units) => listed.push((*kind, units)),
                Err(err) => {
                    failures += 1;
                    self.metrics.inc_query_errors(*kind);
                    warn!(unit_type = %kind, error = %err, "Failed to list units");
                }
            }
        }

        if failures == 0 {
            self.health.set_healthy(components::DATAHUB).await;
        } else {
            self.health
                .record_failure(
                    components::DATAHUB,
                    format!("{} unit listings failed", failures),
                )
                .await;
        }
        listed
    }

    async fn fan_out(
        &self,
        adapter: Arc<dyn UnitAdapter>,
        units: Vec<ResourceUnit>,
        ctx: &Arc<PassContext>,
        job_type: JobType,
        summary: &mut PassSummary,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_units.max(1)));
        let mut tasks = JoinSet::new();

        for unit in units {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let senders = self.senders.clone();
            let adapter = adapter.clone();
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let result = senders
                    .dispatch(job_type, adapter.as_ref(), &unit, &ctx)
                    .await;
                drop(permit);
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => summary.record(result),
                Err(err) => {
                    error!(unit_type = %adapter.kind(), error = %err, "Dispatch task failed");
                    summary.record(UnitResult::Failed);
                }
            }
        }
    }
}
