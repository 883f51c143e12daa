//! Statistics used to detect model drift
//!
//! Observed samples are paired with predicted samples by timestamp
//! proximity, then scored with MAPE and RMSE.

mod drift;
mod measure;

pub use drift::{
    DriftAssessment, DriftConfig, DriftEvaluator, DriftVerdict, Measure, RmseNormalization,
};
pub use measure::{mape, pair_samples, rmse, MeasurementPair};
