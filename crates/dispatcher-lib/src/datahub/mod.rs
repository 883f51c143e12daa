//! Read access to the datahub
//!
//! The dispatcher needs three queries: list units of a kind, list
//! predictions of a unit, and list observed metrics of a unit. They are
//! expressed by [`DatahubClient`] so the scheduling logic can run against
//! any backend.

mod client;

pub use client::{DatahubClientConfig, GrpcDatahubClient};

use crate::error::Result;
use crate::models::{
    Granularity, MetricSeries, MetricType, ResourceUnit, Sample, UnitIdentity, UnitKind,
};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Aggregation applied by the datahub when downsampling observed metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Avg,
    Max,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Max => "max",
        }
    }
}

/// Filter for prediction lookups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredictionQuery {
    pub limit: Option<u32>,
    pub order: SortOrder,
    pub model_id: Option<String>,
    pub prediction_id: Option<String>,
}

impl PredictionQuery {
    /// Most recent prediction only
    pub fn latest() -> Self {
        Self {
            limit: Some(1),
            order: SortOrder::Desc,
            ..Default::default()
        }
    }

    pub fn by_model_id(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Default::default()
        }
    }

    pub fn by_prediction_id(prediction_id: impl Into<String>) -> Self {
        Self {
            prediction_id: Some(prediction_id.into()),
            ..Default::default()
        }
    }
}

/// Filter for observed metric lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    /// Window start, Unix seconds
    pub start: i64,
    /// Window end, open-ended when absent
    pub end: Option<i64>,
    pub metric_types: Vec<MetricType>,
    pub aggregation: Aggregation,
    pub order: SortOrder,
}

/// Predicted samples of one metric with the ids of the run that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedSeries {
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
    pub model_id: String,
    pub prediction_id: String,
}

impl PredictedSeries {
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.samples.iter().map(|s| s.timestamp).max()
    }

    pub fn earliest_timestamp(&self) -> Option<i64> {
        self.samples.iter().map(|s| s.timestamp).min()
    }
}

/// Prediction of a unit, or of one pod container
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PredictionGroup {
    pub container: Option<String>,
    pub raw: Vec<PredictedSeries>,
    pub upper_bound: Vec<MetricSeries>,
    pub lower_bound: Vec<MetricSeries>,
}

impl PredictionGroup {
    pub fn series(&self, metric_type: MetricType) -> Option<&PredictedSeries> {
        self.raw.iter().find(|s| s.metric_type == metric_type)
    }

    /// Latest raw sample timestamp across all metrics
    pub fn latest_timestamp(&self) -> Option<i64> {
        self.raw.iter().filter_map(|s| s.latest_timestamp()).max()
    }

    pub fn has_samples(&self) -> bool {
        self.raw.iter().any(|s| !s.samples.is_empty())
    }
}

/// Observed metrics of a unit, or of one pod container
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedGroup {
    pub container: Option<String>,
    pub series: Vec<MetricSeries>,
}

impl ObservedGroup {
    pub fn series(&self, metric_type: MetricType) -> Option<&MetricSeries> {
        self.series.iter().find(|s| s.metric_type == metric_type)
    }
}

/// Read-only datahub queries used by the dispatcher
#[async_trait]
pub trait DatahubClient: Send + Sync {
    /// List every unit of a kind
    async fn list_units(&self, kind: UnitKind) -> Result<Vec<ResourceUnit>>;

    /// List predictions of a unit at a granularity
    async fn list_predictions(
        &self,
        unit: &ResourceUnit,
        granularity: Granularity,
        query: &PredictionQuery,
    ) -> Result<Vec<PredictionGroup>>;

    /// List observed metrics of a unit at a granularity
    async fn list_metrics(
        &self,
        unit: &ResourceUnit,
        granularity: Granularity,
        query: &MetricQuery,
    ) -> Result<Vec<ObservedGroup>>;

    /// Find the current snapshot of one unit
    ///
    /// Lists every unit of the kind; clients that can filter server side
    /// override this.
    async fn find_unit(&self, identity: &UnitIdentity) -> Result<Option<ResourceUnit>> {
        let units = self.list_units(identity.kind()).await?;
        Ok(units.into_iter().find(|unit| identity.matches(&unit.identity())))
    }
}
