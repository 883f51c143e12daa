//! Per-kind behavior plugged into the generic job senders
//!
//! Everything that differs between unit kinds lives behind [`UnitAdapter`]:
//! which metrics are trained by default, how a prediction series is looked
//! up again, how observed metrics are aggregated, whether a pass fans out,
//! and which units a pass skips.

use crate::datahub::{
    Aggregation, DatahubClient, MetricQuery, ObservedGroup, PredictedSeries, PredictionGroup,
    PredictionQuery,
};
use crate::error::Result;
use crate::models::{Granularity, MetricType, ResourceUnit, ScalingTool, UnitIdentity, UnitKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// How the full prediction series behind a latest prediction is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionLookup {
    /// Refetch by the model id carried on the latest prediction
    ModelId,
    /// Resolve the model id through the prediction id first
    PredictionId,
}

/// Settings consulted when choosing the units of a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitFilter {
    /// Dispatch every kind at 30s, not only VPA-managed workloads
    pub hourly_predict: bool,
    /// A VPA-managed pod was listed in the current pass
    pub vpa_present: bool,
}

impl UnitFilter {
    fn fine_allowed(&self, granularity: Granularity) -> bool {
        granularity != Granularity::ThirtySeconds || self.hourly_predict
    }
}

/// Kind-specific capabilities used by the job senders
#[async_trait]
pub trait UnitAdapter: Send + Sync {
    fn kind(&self) -> UnitKind;

    fn identity(&self, unit: &ResourceUnit) -> UnitIdentity {
        unit.identity()
    }

    /// Metrics trained when there is no usable prediction
    fn default_metric_types(&self) -> &'static [MetricType] {
        self.kind().default_metric_types()
    }

    fn prediction_lookup(&self) -> PredictionLookup {
        PredictionLookup::ModelId
    }

    /// Aggregation applied to observed metrics at a granularity
    fn aggregation(&self, _granularity: Granularity) -> Aggregation {
        Aggregation::Avg
    }

    /// Units of this kind are processed concurrently within a pass
    fn fans_out(&self) -> bool {
        false
    }

    /// Whether a pass at `granularity` dispatches jobs for `unit`
    fn accepts(&self, _unit: &ResourceUnit, _granularity: Granularity, _filter: &UnitFilter) -> bool {
        true
    }

    /// Most recent prediction of the unit, one group per container for pods
    async fn last_prediction(
        &self,
        datahub: &dyn DatahubClient,
        unit: &ResourceUnit,
        granularity: Granularity,
    ) -> Result<Vec<PredictionGroup>> {
        datahub
            .list_predictions(unit, granularity, &PredictionQuery::latest())
            .await
    }

    /// Full prediction series of the run that produced `latest`.
    ///
    /// Falls back to `latest` itself when the datahub has nothing better.
    async fn prediction_series(
        &self,
        datahub: &dyn DatahubClient,
        unit: &ResourceUnit,
        granularity: Granularity,
        container: Option<&str>,
        latest: &PredictedSeries,
    ) -> Result<PredictedSeries> {
        let metric_type = latest.metric_type;
        let mut model_id = latest.model_id.clone();

        if self.prediction_lookup() == PredictionLookup::PredictionId
            && !latest.prediction_id.is_empty()
        {
            let groups = datahub
                .list_predictions(
                    unit,
                    granularity,
                    &PredictionQuery::by_prediction_id(latest.prediction_id.clone()),
                )
                .await?;
            if let Some(series) = find_series(&groups, container, metric_type) {
                if !series.model_id.is_empty() {
                    model_id = series.model_id.clone();
                }
            }
        }

        if model_id.is_empty() {
            debug!(
                unit = %self.identity(unit),
                metric_type = %metric_type,
                "Prediction carries no model id, using latest samples"
            );
            return Ok(latest.clone());
        }

        let groups = datahub
            .list_predictions(unit, granularity, &PredictionQuery::by_model_id(model_id))
            .await?;
        Ok(find_series(&groups, container, metric_type)
            .filter(|series| !series.samples.is_empty())
            .cloned()
            .unwrap_or_else(|| latest.clone()))
    }

    /// Observed metrics of the unit over the query window
    async fn observed_series(
        &self,
        datahub: &dyn DatahubClient,
        unit: &ResourceUnit,
        granularity: Granularity,
        query: &MetricQuery,
    ) -> Result<Vec<ObservedGroup>> {
        datahub.list_metrics(unit, granularity, query).await
    }
}

/// Series of `metric_type` in the group of `container` (any group when unset)
pub fn find_series<'a>(
    groups: &'a [PredictionGroup],
    container: Option<&str>,
    metric_type: MetricType,
) -> Option<&'a PredictedSeries> {
    groups
        .iter()
        .filter(|group| container.is_none() || group.container.as_deref() == container)
        .find_map(|group| group.series(metric_type))
}

pub struct NodeAdapter;

#[async_trait]
impl UnitAdapter for NodeAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Node
    }

    // Nodes follow the workloads: at 30s only when some pod is VPA-managed
    fn accepts(&self, _unit: &ResourceUnit, granularity: Granularity, filter: &UnitFilter) -> bool {
        filter.fine_allowed(granularity) || filter.vpa_present
    }
}

pub struct PodAdapter;

#[async_trait]
impl UnitAdapter for PodAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Pod
    }

    fn aggregation(&self, granularity: Granularity) -> Aggregation {
        if granularity == Granularity::ThirtySeconds {
            Aggregation::Max
        } else {
            Aggregation::Avg
        }
    }

    fn fans_out(&self) -> bool {
        true
    }

    fn accepts(&self, unit: &ResourceUnit, granularity: Granularity, filter: &UnitFilter) -> bool {
        filter.fine_allowed(granularity) || is_vpa(unit)
    }
}

pub struct GpuAdapter;

#[async_trait]
impl UnitAdapter for GpuAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Gpu
    }

    fn aggregation(&self, _granularity: Granularity) -> Aggregation {
        Aggregation::Max
    }

    fn accepts(&self, _unit: &ResourceUnit, granularity: Granularity, _filter: &UnitFilter) -> bool {
        granularity == Granularity::OneHour
    }
}

pub struct NamespaceAdapter;

#[async_trait]
impl UnitAdapter for NamespaceAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Namespace
    }

    fn accepts(&self, _unit: &ResourceUnit, granularity: Granularity, filter: &UnitFilter) -> bool {
        filter.fine_allowed(granularity)
    }
}

pub struct ApplicationAdapter;

#[async_trait]
impl UnitAdapter for ApplicationAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Application
    }

    fn accepts(&self, unit: &ResourceUnit, granularity: Granularity, filter: &UnitFilter) -> bool {
        filter.fine_allowed(granularity) || is_vpa(unit)
    }
}

pub struct ClusterAdapter;

#[async_trait]
impl UnitAdapter for ClusterAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Cluster
    }

    fn prediction_lookup(&self) -> PredictionLookup {
        PredictionLookup::PredictionId
    }

    fn fans_out(&self) -> bool {
        true
    }

    fn accepts(&self, _unit: &ResourceUnit, granularity: Granularity, filter: &UnitFilter) -> bool {
        filter.fine_allowed(granularity)
    }
}

pub struct ControllerAdapter;

#[async_trait]
impl UnitAdapter for ControllerAdapter {
    fn kind(&self) -> UnitKind {
        UnitKind::Controller
    }

    fn prediction_lookup(&self) -> PredictionLookup {
        PredictionLookup::PredictionId
    }

    fn fans_out(&self) -> bool {
        true
    }

    fn accepts(&self, unit: &ResourceUnit, granularity: Granularity, filter: &UnitFilter) -> bool {
        filter.fine_allowed(granularity) || is_vpa(unit)
    }
}

fn is_vpa(unit: &ResourceUnit) -> bool {
    unit.scaling_tool() == Some(ScalingTool::Vpa)
}

/// Adapter for a unit kind
pub fn adapter_for(kind: UnitKind) -> Arc<dyn UnitAdapter> {
    match kind {
        UnitKind::Node => Arc::new(NodeAdapter),
        UnitKind::Pod => Arc::new(PodAdapter),
        UnitKind::Gpu => Arc::new(GpuAdapter),
        UnitKind::Namespace => Arc::new(NamespaceAdapter),
        UnitKind::Application => Arc::new(ApplicationAdapter),
        UnitKind::Cluster => Arc::new(ClusterAdapter),
        UnitKind::Controller => Arc::new(ControllerAdapter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicationUnit, ClusterUnit, GpuUnit, NodeUnit, PodUnit};

    fn pod(scaling_tool: ScalingTool) -> ResourceUnit {
        ResourceUnit::Pod(PodUnit {
            cluster_name: "c1".into(),
            namespace: "default".into(),
            name: "web-0".into(),
            node_name: "n1".into(),
            containers: vec!["app".into()],
            scaling_tool,
        })
    }

    #[test]
    fn test_adapter_kinds_match() {
        for kind in UnitKind::ALL {
            assert_eq!(adapter_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_two_hop_lookup_kinds() {
        let two_hop: Vec<UnitKind> = UnitKind::ALL
            .into_iter()
            .filter(|k| adapter_for(*k).prediction_lookup() == PredictionLookup::PredictionId)
            .collect();
        assert_eq!(two_hop, vec![UnitKind::Cluster, UnitKind::Controller]);
    }

    #[test]
    fn test_fan_out_kinds() {
        let fan_out: Vec<UnitKind> = UnitKind::ALL
            .into_iter()
            .filter(|k| adapter_for(*k).fans_out())
            .collect();
        assert_eq!(fan_out, vec![UnitKind::Pod, UnitKind::Cluster, UnitKind::Controller]);
    }

    #[test]
    fn test_aggregation() {
        assert_eq!(GpuAdapter.aggregation(Granularity::OneHour), Aggregation::Max);
        assert_eq!(PodAdapter.aggregation(Granularity::ThirtySeconds), Aggregation::Max);
        assert_eq!(PodAdapter.aggregation(Granularity::OneHour), Aggregation::Avg);
        assert_eq!(NodeAdapter.aggregation(Granularity::ThirtySeconds), Aggregation::Avg);
    }

    #[test]
    fn test_gpu_only_hourly() {
        let gpu = ResourceUnit::Gpu(GpuUnit {
            cluster_name: "c1".into(),
            host: "h".into(),
            minor_number: 0,
            model_name: String::new(),
        });
        let filter = UnitFilter {
            hourly_predict: true,
            vpa_present: true,
        };
        assert!(GpuAdapter.accepts(&gpu, Granularity::OneHour, &filter));
        assert!(!GpuAdapter.accepts(&gpu, Granularity::ThirtySeconds, &filter));
        assert!(!GpuAdapter.accepts(&gpu, Granularity::SixHours, &filter));
    }

    #[test]
    fn test_fine_granularity_requires_vpa() {
        let strict = UnitFilter::default();
        assert!(PodAdapter.accepts(&pod(ScalingTool::Vpa), Granularity::ThirtySeconds, &strict));
        assert!(!PodAdapter.accepts(&pod(ScalingTool::Hpa), Granularity::ThirtySeconds, &strict));
        assert!(PodAdapter.accepts(&pod(ScalingTool::Hpa), Granularity::OneHour, &strict));

        let app = ResourceUnit::Application(ApplicationUnit {
            cluster_name: "c1".into(),
            namespace: "default".into(),
            name: "shop".into(),
            scaling_tool: ScalingTool::None,
        });
        assert!(!ApplicationAdapter.accepts(&app, Granularity::ThirtySeconds, &strict));

        let hourly = UnitFilter {
            hourly_predict: true,
            vpa_present: false,
        };
        assert!(PodAdapter.accepts(&pod(ScalingTool::Hpa), Granularity::ThirtySeconds, &hourly));
        assert!(ApplicationAdapter.accepts(&app, Granularity::ThirtySeconds, &hourly));
    }

    #[test]
    fn test_cluster_and_nodes_at_fine_granularity() {
        let cluster = ResourceUnit::Cluster(ClusterUnit { name: "c1".into() });
        let node = ResourceUnit::Node(NodeUnit {
            cluster_name: "c1".into(),
            name: "n1".into(),
        });
        let strict = UnitFilter::default();
        assert!(!ClusterAdapter.accepts(&cluster, Granularity::ThirtySeconds, &strict));
        assert!(ClusterAdapter.accepts(&cluster, Granularity::TwentyFourHours, &strict));
        assert!(!NodeAdapter.accepts(&node, Granularity::ThirtySeconds, &strict));

        let with_vpa = UnitFilter {
            hourly_predict: false,
            vpa_present: true,
        };
        assert!(NodeAdapter.accepts(&node, Granularity::ThirtySeconds, &with_vpa));
        assert!(!ClusterAdapter.accepts(&cluster, Granularity::ThirtySeconds, &with_vpa));
    }

    #[test]
    fn test_find_series_by_container() {
        let series = |container: &str, value: f64| PredictionGroup {
            container: Some(container.to_string()),
            raw: vec![PredictedSeries {
                metric_type: MetricType::CpuUsagePercentage,
                samples: vec![crate::models::Sample::new(100, value)],
                model_id: format!("m-{}", container),
                prediction_id: String::new(),
            }],
            ..Default::default()
        };
        let groups = vec![series("app", 1.0), series("sidecar", 2.0)];

        let found = find_series(&groups, Some("sidecar"), MetricType::CpuUsagePercentage);
        assert_eq!(found.map(|s| s.model_id.as_str()), Some("m-sidecar"));
        assert!(find_series(&groups, Some("db"), MetricType::CpuUsagePercentage).is_none());
        assert!(find_series(&groups, None, MetricType::MemoryUsageBytes).is_none());
    }
}
