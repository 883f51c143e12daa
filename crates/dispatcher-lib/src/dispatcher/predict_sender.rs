//! Predict job sender

use super::adapter::UnitAdapter;
use super::PassContext;
use crate::clock::Clock;
use crate::error::Result;
use crate::models::ResourceUnit;
use crate::observability::{DispatcherMetrics, StructuredLogger};
use crate::queue::{dedup_key, JobEnvelope, PREDICT_QUEUE};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Publishes predict jobs carrying the unit snapshot
pub struct PredictJobSender {
    metrics: DispatcherMetrics,
    logger: StructuredLogger,
    clock: Arc<dyn Clock>,
    publish_timeout: Option<Duration>,
}

impl PredictJobSender {
    pub fn new(metrics: DispatcherMetrics, logger: StructuredLogger, clock: Arc<dyn Clock>) -> Self {
        Self {
            metrics,
            logger,
            clock,
            publish_timeout: None,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub async fn send(
        &self,
        adapter: &dyn UnitAdapter,
        unit: &ResourceUnit,
        ctx: &PassContext,
    ) -> Result<()> {
        let kind = adapter.kind();
        let identity = adapter.identity(unit);
        let granularity = ctx.granularity;

        let body = JobEnvelope::builder(kind, granularity.secs(), unit.payload_json()?)
            .create_timestamp(self.clock.now())
            .build()
            .to_json()?;
        let key = dedup_key(kind, &identity.key(), granularity.secs());

        match ctx
            .publisher
            .send_json(PREDICT_QUEUE, &body, &key, self.publish_timeout)
            .await
        {
            Ok(()) => {
                self.metrics.inc_jobs_sent(PREDICT_QUEUE, kind, granularity);
                self.logger.log_job_sent(
                    PREDICT_QUEUE,
                    &identity,
                    granularity,
                    adapter.default_metric_types(),
                );
                Ok(())
            }
            Err(err) => {
                self.metrics.inc_job_send_failures(PREDICT_QUEUE, kind, granularity);
                warn!(
                    unit = %identity,
                    data_granularity = %granularity,
                    error = %err,
                    "Failed to publish predict job"
                );
                Err(err)
            }
        }
    }
}
