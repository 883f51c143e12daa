//! Error types shared across the dispatcher

use std::time::Duration;
use thiserror::Error;

/// Failures of the drift statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatsError {
    /// No observed sample could be paired with a prediction
    #[error("no data points available for measurement")]
    NoDataPoints,

    /// Fewer usable pairs than the configured floor
    #[error("data points not enough: found {found}, required {required}")]
    DataPointsNotEnough { found: usize, required: usize },
}

/// Errors raised while dispatching jobs
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("datahub query failed: {0}")]
    QueryFailed(String),

    #[error("datahub returned status: {0}")]
    Status(#[from] tonic::Status),

    #[error("datahub transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("publish to queue {queue} failed: {reason}")]
    PublishFailed { queue: String, reason: String },

    #[error("queue error: {0}")]
    Queue(#[from] lapin::Error),

    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("invalid completion notification: {0}")]
    InvalidNotification(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
