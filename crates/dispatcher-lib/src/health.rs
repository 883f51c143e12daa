//! Health tracking for the dispatcher's long-running components
//!
//! Backs the Kubernetes liveness and readiness checks. Dispatch passes and
//! the completion listener report every failure; a component stays degraded
//! while failures are sporadic and turns unhealthy once they repeat.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component is reported unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but passes still run
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

/// Last reported state of a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failures reported since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>, failures: u32) -> Self {
        Self {
            status,
            message,
            consecutive_failures: failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None, 0)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()), 0)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()), 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components, healthy when there are none
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max_by_key(|status| match status {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const DATAHUB: &str = "datahub";
    pub const QUEUE: &str = "queue";
    pub const SCHEDULER: &str = "scheduler";
    pub const COMPLETION_LISTENER: &str = "completion_listener";

    pub const ALL: [&str; 4] = [DATAHUB, QUEUE, SCHEDULER, COMPLETION_LISTENER];
}

/// Shared component health and the startup readiness flag
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<AtomicBool>,
    failure_threshold: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(AtomicBool::new(false)),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    /// Mark a success, clearing the failure count
    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Count a failure; degraded below the threshold, unhealthy at it
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) -> ComponentStatus {
        let mut components = self.components.write().await;
        let failures = components
            .get(name)
            .map_or(0, |h| h.consecutive_failures)
            .saturating_add(1);
        let status = if failures >= self.failure_threshold {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };

        components.insert(
            name.to_string(),
            ComponentHealth::with_status(status, Some(message.into()), failures),
        );
        status
    }

    /// Current state of one component, `None` if never registered
    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Waiting for datahub and queue".to_string()),
            };
        }

        let components = self.components.read().await;
        let mut unhealthy: Vec<&str> = components
            .iter()
            .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();
        unhealthy.sort_unstable();

        match unhealthy.first() {
            Some(name) => ReadinessResponse {
                ready: false,
                reason: Some(format!("Component {} unhealthy", name)),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_starts_empty_and_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::new();
        for name in components::ALL {
            registry.register(name).await;
        }

        let health = registry.health().await;
        assert_eq!(health.components.len(), 4);
        assert_eq!(
            health.components[components::SCHEDULER].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_unhealthy_wins_over_degraded() {
        let registry = HealthRegistry::new();
        registry.register(components::DATAHUB).await;
        registry.register(components::COMPLETION_LISTENER).await;

        registry.set_degraded(components::DATAHUB, "Slow queries").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::COMPLETION_LISTENER, "Subscription lost")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_repeated_failures_escalate() {
        let registry = HealthRegistry::new();
        registry.register(components::QUEUE).await;

        assert_eq!(
            registry.record_failure(components::QUEUE, "broker closed").await,
            ComponentStatus::Degraded
        );
        assert_eq!(
            registry.record_failure(components::QUEUE, "broker closed").await,
            ComponentStatus::Degraded
        );
        assert_eq!(
            registry.record_failure(components::QUEUE, "broker closed").await,
            ComponentStatus::Unhealthy
        );

        let health = registry.health().await;
        assert_eq!(health.components[components::QUEUE].consecutive_failures, 3);
        assert!(!health.status.is_operational());
    }

    #[tokio::test]
    async fn test_component_lookup() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.record_failure(components::SCHEDULER, "pass panicked").await;

        let scheduler = registry.component(components::SCHEDULER).await.unwrap();
        assert_eq!(scheduler.status, ComponentStatus::Degraded);
        assert_eq!(scheduler.consecutive_failures, 1);
        assert!(registry.component(components::COMPLETION_LISTENER).await.is_none());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let registry = HealthRegistry::with_failure_threshold(2);
        registry.record_failure(components::DATAHUB, "deadline exceeded").await;
        registry.set_healthy(components::DATAHUB).await;

        assert_eq!(
            registry.record_failure(components::DATAHUB, "deadline exceeded").await,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_not_ready_until_startup_completes() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_component() {
        let registry = HealthRegistry::new();
        registry.register(components::QUEUE).await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::QUEUE, "Broker unreachable").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Component queue unhealthy"));
    }
}
