//! Job dispatching
//!
//! This module ties the datahub, the drift statistics, the model tracker
//! and the queue together:
//! - [`UnitAdapter`] captures what differs between unit kinds
//! - [`ModelJobSender`] decides whether a unit needs a new model
//! - [`PredictJobSender`] requests fresh predictions
//! - [`Dispatcher`] runs the per-granularity loops
//! - [`CompletionListener`] reacts to finished model jobs

mod adapter;
mod complete;
mod model_sender;
mod predict_sender;
mod scheduler;


pub use adapter::{
    adapter_for, find_series, ApplicationAdapter, ClusterAdapter, ControllerAdapter, GpuAdapter,
    NamespaceAdapter, NodeAdapter, PodAdapter, PredictionLookup, UnitAdapter, UnitFilter,
};
pub use complete::{CompletionListener, CompletionNotification};
pub use model_sender::{ModelJobSender, ModelOutcome};
pub use predict_sender::PredictJobSender;
pub use scheduler::{Dispatcher, GranularitySchedule, JobType, PassSummary, SchedulerConfig};

use crate::models::Granularity;
use crate::queue::JobPublisher;
use std::sync::Arc;

/// State shared by every unit handled in one pass
#[derive(Clone)]
pub struct PassContext {
    pub granularity: Granularity,
    /// Prediction horizon in samples, used to size the observation window
    pub prediction_steps: i64,
    pub publisher: Arc<dyn JobPublisher>,
}
