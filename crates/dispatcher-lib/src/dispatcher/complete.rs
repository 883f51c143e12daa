//! Model completion handling
//!
//! Training workers report finished jobs on the "model_complete" queue.
//! Each notification clears the unit's tracker entry, exports how long the
//! job took and requests a prediction with the new model.

use super::adapter::adapter_for;
use super::predict_sender::PredictJobSender;
use super::PassContext;
use crate::clock::Clock;
use crate::datahub::DatahubClient;
use crate::error::{DispatchError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{Granularity, UnitIdentity, UnitKind};
use crate::observability::{DispatcherMetrics, StructuredLogger};
use crate::queue::{QueueConnector, MODEL_COMPLETE_QUEUE};
use crate::tracker::ModelMapper;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Message published by a training worker when a model job finishes
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionNotification {
    pub unit: Value,
    pub unit_type: String,
    pub data_granularity: String,
    /// Echo of the job's `createTimestamp`, Unix seconds
    #[serde(default)]
    pub job_create_time: i64,
    #[serde(default)]
    pub cluster_name: String,
}

impl CompletionNotification {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|err| DispatchError::InvalidNotification(err.to_string()))
    }

    pub fn kind(&self) -> Result<UnitKind> {
        self.unit_type
            .parse()
            .map_err(|err: crate::models::UnknownVariant| {
                DispatchError::InvalidNotification(err.to_string())
            })
    }

    pub fn granularity(&self) -> Result<Granularity> {
        Granularity::from_label(&self.data_granularity).ok_or_else(|| {
            DispatchError::InvalidNotification(format!(
                "unknown data granularity {:?}",
                self.data_granularity
            ))
        })
    }

    /// Identity of the unit, read from the kind-specific unit shape
    pub fn identity(&self) -> Result<UnitIdentity> {
        let cluster_name = self
            .text(&["cluster_name"])
            .or_else(|| self.text(&["object_meta", "cluster_name"]))
            .unwrap_or_else(|| self.cluster_name.clone());

        let identity = match self.kind()? {
            UnitKind::Node => UnitIdentity::Node {
                cluster_name,
                name: self.name()?,
            },
            UnitKind::Namespace => UnitIdentity::Namespace {
                cluster_name,
                name: self.name()?,
            },
            UnitKind::Cluster => UnitIdentity::Cluster { name: self.name()? },
            UnitKind::Pod => {
                let (namespace, name) = self.namespaced_name()?;
                UnitIdentity::Pod {
                    cluster_name,
                    namespace,
                    name,
                }
            }
            UnitKind::Application => {
                let (namespace, name) = self.namespaced_name()?;
                UnitIdentity::Application {
                    cluster_name,
                    namespace,
                    name,
                }
            }
            UnitKind::Controller => {
                let (namespace, name) = self.namespaced_name()?;
                UnitIdentity::Controller {
                    cluster_name,
                    kind: self.required(&["kind"])?,
                    namespace,
                    name,
                }
            }
            UnitKind::Gpu => UnitIdentity::Gpu {
                cluster_name,
                host: self.required(&["host"])?,
                minor_number: self.minor_number()?,
            },
        };
        Ok(identity)
    }

    fn field(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.unit, |value, key| value.get(key))
    }

    fn text(&self, path: &[&str]) -> Option<String> {
        self.field(path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn required(&self, path: &[&str]) -> Result<String> {
        self.text(path).ok_or_else(|| {
            DispatchError::InvalidNotification(format!(
                "{} unit without {}",
                self.unit_type,
                path.join(".")
            ))
        })
    }

    fn name(&self) -> Result<String> {
        self.text(&["name"])
            .or_else(|| self.text(&["object_meta", "name"]))
            .ok_or_else(|| {
                DispatchError::InvalidNotification(format!("{} unit without name", self.unit_type))
            })
    }

    fn namespaced_name(&self) -> Result<(String, String)> {
        let nested = self
            .text(&["namespaced_name", "namespace"])
            .zip(self.text(&["namespaced_name", "name"]));
        let flat = || {
            self.text(&["namespace"])
                .or_else(|| self.text(&["object_meta", "namespace"]))
                .zip(self.name().ok())
        };
        nested.or_else(flat).ok_or_else(|| {
            DispatchError::InvalidNotification(format!(
                "{} unit without namespace and name",
                self.unit_type
            ))
        })
    }

    // Workers send the minor number either as a string or as a number
    fn minor_number(&self) -> Result<i32> {
        let invalid = || {
            DispatchError::InvalidNotification("GPU unit without a valid minor_number".to_string())
        };
        match self.field(&["minor_number"]) {
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(invalid),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Consumes completion notifications until shutdown
pub struct CompletionListener {
    connector: Arc<dyn QueueConnector>,
    datahub: Arc<dyn DatahubClient>,
    tracker: Arc<ModelMapper>,
    predict_sender: Arc<PredictJobSender>,
    metrics: DispatcherMetrics,
    logger: StructuredLogger,
    clock: Arc<dyn Clock>,
    health: HealthRegistry,
    reconnect_interval: Duration,
}

impl CompletionListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn QueueConnector>,
        datahub: Arc<dyn DatahubClient>,
        tracker: Arc<ModelMapper>,
        predict_sender: Arc<PredictJobSender>,
        metrics: DispatcherMetrics,
        logger: StructuredLogger,
        clock: Arc<dyn Clock>,
        health: HealthRegistry,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            connector,
            datahub,
            tracker,
            predict_sender,
            metrics,
            logger,
            clock,
            health,
            reconnect_interval,
        }
    }

    /// Subscribe and handle notifications, reconnecting until shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(queue = MODEL_COMPLETE_QUEUE, "Starting completion listener");

        'session: loop {
            let subscription = tokio::select! {
                result = self.connector.subscribe(MODEL_COMPLETE_QUEUE) => result,
                _ = shutdown.recv() => break 'session,
            };

            match subscription {
                Ok(mut stream) => {
                    self.health.set_healthy(components::COMPLETION_LISTENER).await;
                    loop {
                        tokio::select! {
                            message = stream.next() => match message {
                                Some(Ok(body)) => {
                                    if let Err(err) = self.handle_message(&body).await {
                                        warn!(error = %err, "Failed to handle model completion");
                                    }
                                }
                                Some(Err(err)) => {
                                    error!(error = %err, "Completion queue consumer failed");
                                    break;
                                }
                                None => {
                                    warn!("Completion queue subscription ended");
                                    break;
                                }
                            },
                            _ = shutdown.recv() => break 'session,
                        }
                    }
                    self.health
                        .record_failure(components::COMPLETION_LISTENER, "Reconnecting to queue")
                        .await;
                }
                Err(err) => {
                    error!(
                        error = %err,
                        retry_in_ms = self.reconnect_interval.as_millis() as u64,
                        "Failed to subscribe to completion queue"
                    );
                    self.health
                        .record_failure(components::COMPLETION_LISTENER, err.to_string())
                        .await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_interval) => {}
                _ = shutdown.recv() => break 'session,
            }
        }

        info!("Completion listener stopped");
    }

    /// Handle one notification body
    pub async fn handle_message(&self, body: &[u8]) -> Result<()> {
        let notification = CompletionNotification::parse(body)?;
        let kind = notification.kind()?;
        let granularity = notification.granularity()?;
        let identity = notification.identity()?;
        let now = self.clock.now();

        let removed = self
            .tracker
            .remove_model_info(kind, granularity, &identity.tracker_key())
            .await;
        self.metrics
            .set_units_modeling(kind, granularity, self.tracker.len(kind, granularity).await);

        let started = if notification.job_create_time > 0 {
            Some(notification.job_create_time)
        } else {
            removed.as_ref().map(|info| info.timestamp)
        };
        match started {
            Some(started) => {
                let seconds = now - started;
                self.metrics
                    .observe_model_seconds(&identity, granularity, seconds as f64);
                self.logger
                    .log_model_complete(&identity, granularity, seconds, removed.is_some());
            }
            None => debug!(
                unit = %identity,
                data_granularity = %granularity,
                "Completed model has no start time"
            ),
        }

        self.request_prediction(&identity, granularity).await
    }

    async fn request_prediction(&self, identity: &UnitIdentity, granularity: Granularity) -> Result<()> {
        let unit = self.datahub.find_unit(identity).await.map_err(|err| {
            self.metrics.inc_query_errors(identity.kind());
            err
        })?;
        let Some(unit) = unit else {
            info!(unit = %identity, "Unit no longer exists, skipping predict job");
            return Ok(());
        };

        let publisher = self.connector.publisher().await?;
        let ctx = PassContext {
            granularity,
            prediction_steps: 0,
            publisher: publisher.clone(),
        };
        let adapter = adapter_for(identity.kind());
        let result = self.predict_sender.send(adapter.as_ref(), &unit, &ctx).await;
        publisher.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(value: Value) -> CompletionNotification {
        CompletionNotification::parse(value.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_node_identity() {
        let n = notification(json!({
            "unit": {"name": "node-a", "cluster_name": "c1"},
            "unit_type": "NODE",
            "data_granularity": "1h",
            "job_create_time": 1_700_000_000
        }));
        assert_eq!(n.kind().unwrap(), UnitKind::Node);
        assert_eq!(n.granularity().unwrap(), Granularity::OneHour);
        assert_eq!(
            n.identity().unwrap(),
            UnitIdentity::Node {
                cluster_name: "c1".into(),
                name: "node-a".into()
            }
        );
    }

    #[test]
    fn test_pod_namespaced_name_shape() {
        let n = notification(json!({
            "unit": {"namespaced_name": {"namespace": "default", "name": "web-0"}},
            "unit_type": "POD",
            "data_granularity": "30s",
            "cluster_name": "c2"
        }));
        let identity = n.identity().unwrap();
        assert_eq!(identity.key(), "default/web-0");
        assert_eq!(identity.cluster_name(), "c2");
        assert_eq!(n.job_create_time, 0);
    }

    #[test]
    fn test_controller_flat_shape() {
        let n = notification(json!({
            "unit": {"namespace": "shop", "name": "web", "kind": "DEPLOYMENT"},
            "unit_type": "CONTROLLER",
            "data_granularity": "6h"
        }));
        assert_eq!(n.identity().unwrap().key(), "DEPLOYMENT/shop/web");
    }

    #[test]
    fn test_gpu_minor_number_as_string_or_number() {
        for minor in [json!("3"), json!(3)] {
            let n = notification(json!({
                "unit": {"host": "gpu-host", "minor_number": minor},
                "unit_type": "GPU",
                "data_granularity": "1h"
            }));
            assert_eq!(n.identity().unwrap().key(), "gpu-host/3");
        }
    }

    #[test]
    fn test_malformed_notifications() {
        assert!(CompletionNotification::parse(b"not json").is_err());

        let unknown_kind = notification(json!({
            "unit": {"name": "x"},
            "unit_type": "DEPLOYMENT",
            "data_granularity": "1h"
        }));
        assert!(unknown_kind.identity().is_err());

        let missing_name = notification(json!({
            "unit": {},
            "unit_type": "NODE",
            "data_granularity": "1h"
        }));
        assert!(matches!(
            missing_name.identity(),
            Err(DispatchError::InvalidNotification(_))
        ));

        let bad_granularity = notification(json!({
            "unit": {"name": "n1"},
            "unit_type": "NODE",
            "data_granularity": "15m"
        }));
        assert!(bad_granularity.granularity().is_err());
    }
}
