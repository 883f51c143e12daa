//! Drift verdicts built on top of MAPE and RMSE

use super::measure::{mape, pair_samples, rmse};
use crate::error::StatsError;
use crate::models::{MetricType, Sample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Error measure that drives the retrain decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    Mape,
    Rmse,
}

impl Measure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::Mape => "mape",
            Measure::Rmse => "rmse",
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Measure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mape" => Ok(Measure::Mape),
            "rmse" => Ok(Measure::Rmse),
            other => Err(format!("unknown measure '{}', expected mape or rmse", other)),
        }
    }
}

/// Per-metric divisors applied before squaring in RMSE
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmseNormalization {
    pub cpu: f64,
    pub memory: f64,
    pub duty_cycle: f64,
}

impl Default for RmseNormalization {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1_000_000.0,
            duty_cycle: 0.2,
        }
    }
}

impl RmseNormalization {
    /// Divisor for a metric type, 1.0 for types without one or for
    /// non-positive settings
    pub fn for_metric(&self, metric_type: MetricType) -> f64 {
        let value = match metric_type {
            MetricType::CpuUsagePercentage => self.cpu,
            MetricType::MemoryUsageBytes => self.memory,
            MetricType::DutyCycle => self.duty_cycle,
            MetricType::PowerUsageWatts | MetricType::TemperatureCelsius => 1.0,
        };
        if value.is_finite() && value > 0.0 {
            value
        } else {
            1.0
        }
    }
}

/// Drift evaluation settings
#[derive(Debug, Clone)]
pub struct DriftConfig {
    /// Measure that drives the retrain decision
    pub measure: Measure,
    /// MAPE threshold in percent
    pub mape_threshold: f64,
    pub rmse_threshold: f64,
    pub normalization: RmseNormalization,
    /// Usable-pair floor at 30s granularity
    pub min_data_points: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            measure: Measure::Mape,
            mape_threshold: 15.0,
            rmse_threshold: 10.0,
            normalization: RmseNormalization::default(),
            min_data_points: 5,
        }
    }
}

/// Outcome of one measure for one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftVerdict {
    pub measure: Measure,
    /// Computed error, absent when the computation failed
    pub value: Option<f64>,
    pub failure: Option<StatsError>,
    /// Value exceeded the threshold
    pub drifted: bool,
}

impl DriftVerdict {
    fn from_result(measure: Measure, result: Result<f64, StatsError>, threshold: f64) -> Self {
        match result {
            Ok(value) => Self {
                measure,
                value: Some(value),
                failure: None,
                drifted: value > threshold,
            },
            Err(err) => Self {
                measure,
                value: None,
                failure: Some(err),
                drifted: false,
            },
        }
    }

    /// A failed computation is treated as needing a retrain
    pub fn needs_retrain(&self) -> bool {
        self.drifted || self.failure.is_some()
    }
}

/// Both verdicts for a metric, one of which is active
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftAssessment {
    pub metric_type: MetricType,
    pub mape: DriftVerdict,
    pub rmse: DriftVerdict,
    pub active: Measure,
}

impl DriftAssessment {
    pub fn active_verdict(&self) -> &DriftVerdict {
        match self.active {
            Measure::Mape => &self.mape,
            Measure::Rmse => &self.rmse,
        }
    }

    pub fn needs_retrain(&self) -> bool {
        self.active_verdict().needs_retrain()
    }

    pub fn drifted(&self) -> bool {
        self.active_verdict().drifted
    }
}

/// Computes MAPE and RMSE for a metric and decides whether to retrain
#[derive(Debug, Clone)]
pub struct DriftEvaluator {
    config: DriftConfig,
}

impl DriftEvaluator {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        metric_type: MetricType,
        observed: &[Sample],
        predicted: &[Sample],
        granularity_secs: i64,
    ) -> DriftAssessment {
        let pairs = pair_samples(observed, predicted, granularity_secs);
        debug!(
            metric_type = %metric_type,
            pairs = pairs.len(),
            granularity_secs = granularity_secs,
            "Evaluating drift"
        );

        let mape = DriftVerdict::from_result(
            Measure::Mape,
            mape(&pairs, granularity_secs, self.config.min_data_points),
            self.config.mape_threshold,
        );
        let rmse = DriftVerdict::from_result(
            Measure::Rmse,
            rmse(
                &pairs,
                self.config.normalization.for_metric(metric_type),
                granularity_secs,
                self.config.min_data_points,
            ),
            self.config.rmse_threshold,
        );

        let assessment = DriftAssessment {
            metric_type,
            mape,
            rmse,
            active: self.config.measure,
        };

        let verdict = assessment.active_verdict();
        match (verdict.value, verdict.failure) {
            (_, Some(err)) => info!(
                metric_type = %metric_type,
                measure = %verdict.measure,
                error = %err,
                "Drift measure failed, metric needs retraining"
            ),
            (Some(value), None) => info!(
                metric_type = %metric_type,
                measure = %verdict.measure,
                value = value,
                drifted = verdict.drifted,
                "Drift measure computed"
            ),
            (None, None) => {}
        }

        assessment
    }
}
