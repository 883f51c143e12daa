//! Drift-driven model and prediction job dispatching
//!
//! This crate provides the core functionality for:
//! - Reading units, predictions and observed metrics from the datahub
//! - Measuring prediction drift with MAPE and RMSE
//! - Tracking model jobs in flight
//! - Publishing model and predict jobs to the message queue
//! - Health checks and observability

pub mod api;
pub mod clock;
pub mod datahub;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod proto;
pub mod queue;
pub mod stats;
pub mod tracker;

pub use error::{DispatchError, Result, StatsError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DispatcherMetrics, StructuredLogger};
