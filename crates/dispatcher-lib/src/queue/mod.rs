//! Message queue access
//!
//! Jobs are published as JSON envelopes to durable queues, and completion
//! notifications are consumed from the "model_complete" queue. The broker
//! is reached through [`QueueConnector`] so the dispatcher can be driven by
//! an in-memory double in tests.

mod amqp;
mod job;

pub use amqp::{AmqpConfig, AmqpConnector, AmqpPublisher};
pub use job::{dedup_key, JobBuilder, JobEnvelope};

use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Queue consumed by the prediction workers
pub const PREDICT_QUEUE: &str = "predict";
/// Queue consumed by the training workers
pub const MODEL_QUEUE: &str = "model";
/// Queue the training workers report finished jobs on
pub const MODEL_COMPLETE_QUEUE: &str = "model_complete";

/// Stream of raw message bodies
pub type MessageStream = BoxStream<'static, Result<Vec<u8>>>;

/// Publishes job envelopes
#[async_trait]
pub trait JobPublisher: Send + Sync {
    /// Publish `body` to `queue`, retrying per the publisher's policy.
    ///
    /// `timeout` bounds how long each attempt waits for the broker to
    /// confirm the message.
    async fn send_json(
        &self,
        queue: &str,
        body: &str,
        dedup_key: &str,
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Release the underlying connection
    async fn close(&self) {}
}

/// Opens publishers and subscriptions against the broker
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Open a publisher on a fresh connection
    async fn publisher(&self) -> Result<Arc<dyn JobPublisher>>;

    /// Subscribe to a queue; the stream ends when the connection drops
    async fn subscribe(&self, queue: &str) -> Result<MessageStream>;
}

/// Bounded retry with a fixed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts are exhausted, returning the
    /// last error in that case
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    warn!(
                        operation = what,
                        attempt = attempt,
                        max_attempts = attempts,
                        retry_in_ms = self.interval.as_millis() as u64,
                        error = %err,
                        "Queue operation failed, retrying"
                    );
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

pub(crate) fn publish_failed(queue: &str, reason: impl Into<String>) -> DispatchError {
    DispatchError::PublishFailed {
        queue: queue.to_string(),
        reason: reason.into(),
    }
}
