//! gRPC implementation of [`DatahubClient`]

use super::{
    Aggregation, DatahubClient, MetricQuery, ObservedGroup, PredictedSeries, PredictionGroup,
    PredictionQuery, SortOrder,
};
use crate::error::{DispatchError, Result};
use crate::models::{
    ApplicationUnit, ClusterUnit, ControllerUnit, GpuUnit, Granularity, MetricSeries, MetricType,
    NamespaceUnit, NodeUnit, PodUnit, ResourceUnit, Sample, ScalingTool, UnitIdentity, UnitKind,
};
use crate::proto;
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::Channel;
use tracing::{debug, info};

/// Connection settings for the datahub
#[derive(Debug, Clone)]
pub struct DatahubClientConfig {
    /// Datahub endpoint (e.g., "http://datahub.alameda:50050")
    pub endpoint: String,
    pub connect_timeout: Duration,
    /// Deadline applied to every query
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
}

impl Default for DatahubClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://alameda-datahub.alameda:50050".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
        }
    }
}

/// Datahub client over a shared tonic channel
#[derive(Debug, Clone)]
pub struct GrpcDatahubClient {
    config: DatahubClientConfig,
    channel: Channel,
}

impl GrpcDatahubClient {
    /// Build a lazily connected client
    pub fn new(config: DatahubClientConfig) -> Result<Self> {
        let channel = Channel::from_shared(config.endpoint.clone())
            .map_err(|e| DispatchError::Config(format!("invalid datahub endpoint: {}", e)))?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .http2_keep_alive_interval(config.keepalive_interval)
            .keep_alive_timeout(config.keepalive_timeout)
            .keep_alive_while_idle(true)
            .connect_lazy();

        info!(endpoint = %config.endpoint, "Datahub client created");
        Ok(Self { config, channel })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn client(&self) -> proto::DatahubServiceClient<Channel> {
        proto::DatahubServiceClient::new(self.channel.clone())
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.config.request_timeout);
        request
    }
}

#[async_trait]
impl DatahubClient for GrpcDatahubClient {
    async fn list_units(&self, kind: UnitKind) -> Result<Vec<ResourceUnit>> {
        let request = self.request(proto::ListResourcesRequest {
            unit_type: unit_type_to_proto(kind),
            object_meta: None,
        });

        let response = self.client().list_resources(request).await?.into_inner();
        let units: Vec<ResourceUnit> = response
            .resources
            .into_iter()
            .filter_map(|resource| resource_to_unit(kind, resource))
            .collect();

        debug!(unit_type = %kind, count = units.len(), "Listed units from datahub");
        Ok(units)
    }

    async fn find_unit(&self, identity: &UnitIdentity) -> Result<Option<ResourceUnit>> {
        let kind = identity.kind();
        let request = self.request(proto::ListResourcesRequest {
            unit_type: unit_type_to_proto(kind),
            object_meta: Some(identity_filter(identity)),
        });

        let response = self.client().list_resources(request).await?.into_inner();
        let unit = response
            .resources
            .into_iter()
            .filter_map(|resource| resource_to_unit(kind, resource))
            .find(|unit| identity.matches(&unit.identity()));

        debug!(unit = %identity, found = unit.is_some(), "Looked up unit in datahub");
        Ok(unit)
    }

    async fn list_predictions(
        &self,
        unit: &ResourceUnit,
        granularity: Granularity,
        query: &PredictionQuery,
    ) -> Result<Vec<PredictionGroup>> {
        let request = self.request(proto::ListPredictionsRequest {
            unit: Some(unit_selector(unit)),
            granularity: granularity.secs(),
            query_condition: Some(proto::QueryCondition {
                time_range: None,
                order: order_to_proto(query.order),
                limit: query.limit.map(|l| l as i32).unwrap_or(0),
            }),
            model_id: query.model_id.clone().unwrap_or_default(),
            prediction_id: query.prediction_id.clone().unwrap_or_default(),
        });

        let response = self.client().list_predictions(request).await?.into_inner();
        Ok(response
            .predictions
            .into_iter()
            .map(prediction_to_group)
            .collect())
    }

    async fn list_metrics(
        &self,
        unit: &ResourceUnit,
        granularity: Granularity,
        query: &MetricQuery,
    ) -> Result<Vec<ObservedGroup>> {
        let request = self.request(proto::ListMetricsRequest {
            unit: Some(unit_selector(unit)),
            granularity: granularity.secs(),
            query_condition: Some(proto::QueryCondition {
                time_range: Some(proto::TimeRange {
                    start_time: Some(timestamp(query.start)),
                    end_time: query.end.map(timestamp),
                    step: Some(prost_types::Duration {
                        seconds: granularity.secs(),
                        nanos: 0,
                    }),
                    aggregation: aggregation_to_proto(query.aggregation),
                }),
                order: order_to_proto(query.order),
                limit: 0,
            }),
            metric_types: query
                .metric_types
                .iter()
                .map(|m| metric_type_to_proto(*m))
                .collect(),
        });

        let response = self.client().list_metrics(request).await?.into_inner();
        Ok(response
            .metrics
            .into_iter()
            .map(|series| ObservedGroup {
                container: non_empty(series.container_name),
                series: series
                    .metric_data
                    .into_iter()
                    .filter_map(metric_data_to_series)
                    .collect(),
            })
            .collect())
    }
}

fn timestamp(seconds: i64) -> prost_types::Timestamp {
    prost_types::Timestamp { seconds, nanos: 0 }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub(crate) fn unit_type_to_proto(kind: UnitKind) -> i32 {
    let unit_type = match kind {
        UnitKind::Node => proto::UnitType::Node,
        UnitKind::Pod => proto::UnitType::Pod,
        UnitKind::Gpu => proto::UnitType::Gpu,
        UnitKind::Namespace => proto::UnitType::Namespace,
        UnitKind::Application => proto::UnitType::Application,
        UnitKind::Cluster => proto::UnitType::Cluster,
        UnitKind::Controller => proto::UnitType::Controller,
    };
    unit_type as i32
}

pub(crate) fn metric_type_to_proto(metric_type: MetricType) -> i32 {
    let value = match metric_type {
        MetricType::CpuUsagePercentage => proto::MetricType::CpuUsageSecondsPercentage,
        MetricType::MemoryUsageBytes => proto::MetricType::MemoryUsageBytes,
        MetricType::DutyCycle => proto::MetricType::DutyCycle,
        MetricType::PowerUsageWatts => proto::MetricType::PowerUsageWatts,
        MetricType::TemperatureCelsius => proto::MetricType::TemperatureCelsius,
    };
    value as i32
}

pub(crate) fn metric_type_from_proto(value: i32) -> Option<MetricType> {
    MetricType::ALL
        .iter()
        .copied()
        .find(|m| metric_type_to_proto(*m) == value)
}

fn order_to_proto(order: SortOrder) -> i32 {
    match order {
        SortOrder::Asc => proto::Order::Asc as i32,
        SortOrder::Desc => proto::Order::Desc as i32,
    }
}

fn aggregation_to_proto(aggregation: Aggregation) -> i32 {
    match aggregation {
        Aggregation::Avg => proto::Aggregation::Avg as i32,
        Aggregation::Max => proto::Aggregation::Max as i32,
    }
}

fn meta(name: &str, namespace: &str, cluster: &str, kind: &str) -> proto::ObjectMeta {
    proto::ObjectMeta {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: String::new(),
        cluster_name: cluster.to_string(),
        kind: kind.to_string(),
    }
}

/// Resource listing filter selecting a single unit
fn identity_filter(identity: &UnitIdentity) -> proto::ObjectMeta {
    match identity {
        UnitIdentity::Node { cluster_name, name }
        | UnitIdentity::Namespace { cluster_name, name } => meta(name, "", cluster_name, ""),
        UnitIdentity::Pod {
            cluster_name,
            namespace,
            name,
        }
        | UnitIdentity::Application {
            cluster_name,
            namespace,
            name,
        } => meta(name, namespace, cluster_name, ""),
        UnitIdentity::Controller {
            cluster_name,
            kind,
            namespace,
            name,
        } => meta(name, namespace, cluster_name, kind),
        UnitIdentity::Cluster { name } => meta("", "", name, ""),
        UnitIdentity::Gpu {
            cluster_name, host, ..
        } => proto::ObjectMeta {
            node_name: host.clone(),
            ..meta("", "", cluster_name, "")
        },
    }
}

fn unit_selector(unit: &ResourceUnit) -> proto::UnitSelector {
    let (object_meta, host, minor_number) = match unit {
        ResourceUnit::Node(n) => (meta(&n.name, "", &n.cluster_name, ""), String::new(), 0),
        ResourceUnit::Pod(p) => (
            meta(&p.name, &p.namespace, &p.cluster_name, ""),
            String::new(),
            0,
        ),
        ResourceUnit::Namespace(n) => (meta(&n.name, "", &n.cluster_name, ""), String::new(), 0),
        ResourceUnit::Application(a) => (
            meta(&a.name, &a.namespace, &a.cluster_name, ""),
            String::new(),
            0,
        ),
        ResourceUnit::Controller(c) => (
            meta(&c.name, &c.namespace, &c.cluster_name, &c.kind),
            String::new(),
            0,
        ),
        ResourceUnit::Cluster(c) => (meta("", "", &c.name, ""), String::new(), 0),
        ResourceUnit::Gpu(g) => (meta("", "", &g.cluster_name, ""), g.host.clone(), g.minor_number),
    };

    proto::UnitSelector {
        unit_type: unit_type_to_proto(unit.kind()),
        object_meta: Some(object_meta),
        host,
        minor_number,
    }
}

fn resource_to_unit(kind: UnitKind, resource: proto::Resource) -> Option<ResourceUnit> {
    let meta = resource.object_meta.unwrap_or_default();
    let scaling_tool = ScalingTool::parse(&resource.scaling_tool);

    let unit = match kind {
        UnitKind::Node => ResourceUnit::Node(NodeUnit {
            cluster_name: meta.cluster_name,
            name: meta.name,
        }),
        UnitKind::Pod => ResourceUnit::Pod(PodUnit {
            cluster_name: meta.cluster_name,
            namespace: meta.namespace,
            name: meta.name,
            node_name: meta.node_name,
            containers: resource.containers,
            scaling_tool,
        }),
        UnitKind::Namespace => ResourceUnit::Namespace(NamespaceUnit {
            cluster_name: meta.cluster_name,
            name: meta.name,
        }),
        UnitKind::Application => ResourceUnit::Application(ApplicationUnit {
            cluster_name: meta.cluster_name,
            namespace: meta.namespace,
            name: meta.name,
            scaling_tool,
        }),
        UnitKind::Controller => ResourceUnit::Controller(ControllerUnit {
            cluster_name: meta.cluster_name,
            namespace: meta.namespace,
            name: meta.name,
            kind: meta.kind,
            scaling_tool,
        }),
        UnitKind::Cluster => {
            // Clusters are addressed by their own name
            let name = if meta.name.is_empty() {
                meta.cluster_name
            } else {
                meta.name
            };
            ResourceUnit::Cluster(ClusterUnit { name })
        }
        UnitKind::Gpu => ResourceUnit::Gpu(GpuUnit {
            cluster_name: meta.cluster_name,
            host: resource.host,
            minor_number: resource.minor_number,
            model_name: resource.model_name,
        }),
    };

    if unit.identity().key().is_empty() {
        debug!(unit_type = %kind, "Skipping datahub resource without identity");
        return None;
    }
    Some(unit)
}

fn parse_samples(data: &[proto::Sample]) -> Vec<Sample> {
    data.iter()
        .filter_map(|sample| {
            let time = sample.time.as_ref()?.seconds;
            match sample.num_value.trim().parse::<f64>() {
                Ok(value) => Some(Sample::new(time, value)),
                Err(e) => {
                    debug!(value = %sample.num_value, error = %e, "Skipping unparsable sample");
                    None
                }
            }
        })
        .collect()
}

fn metric_data_to_series(data: proto::MetricData) -> Option<MetricSeries> {
    let metric_type = metric_type_from_proto(data.metric_type)?;
    Some(MetricSeries {
        metric_type,
        samples: parse_samples(&data.data),
    })
}

fn metric_data_to_predicted(data: proto::MetricData) -> Option<PredictedSeries> {
    let metric_type = metric_type_from_proto(data.metric_type)?;
    // Every sample of a series carries the ids of the same run
    let first = data.data.first();
    let model_id = first.map(|s| s.model_id.clone()).unwrap_or_default();
    let prediction_id = first.map(|s| s.prediction_id.clone()).unwrap_or_default();

    Some(PredictedSeries {
        metric_type,
        samples: parse_samples(&data.data),
        model_id,
        prediction_id,
    })
}

fn prediction_to_group(prediction: proto::Prediction) -> PredictionGroup {
    PredictionGroup {
        container: non_empty(prediction.container_name),
        raw: prediction
            .predicted_raw_data
            .into_iter()
            .filter_map(metric_data_to_predicted)
            .collect(),
        upper_bound: prediction
            .predicted_upperbound_data
            .into_iter()
            .filter_map(metric_data_to_series)
            .collect(),
        lower_bound: prediction
            .predicted_lowerbound_data
            .into_iter()
            .filter_map(metric_data_to_series)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto_sample(time: i64, value: &str, model_id: &str) -> proto::Sample {
        proto::Sample {
            time: Some(timestamp(time)),
            end_time: None,
            num_value: value.to_string(),
            model_id: model_id.to_string(),
            prediction_id: "pred-1".to_string(),
        }
    }

    #[test]
    fn test_metric_type_proto_mapping() {
        for metric in MetricType::ALL {
            assert_eq!(metric_type_from_proto(metric_type_to_proto(metric)), Some(metric));
        }
        assert_eq!(metric_type_from_proto(0), None);
    }

    #[test]
    fn test_unparsable_samples_are_skipped() {
        let data = vec![
            proto_sample(10, "1.5", "m1"),
            proto_sample(20, "NaN-ish", "m1"),
            proto_sample(30, " 2 ", "m1"),
        ];
        let samples = parse_samples(&data);
        assert_eq!(samples, vec![Sample::new(10, 1.5), Sample::new(30, 2.0)]);
    }

    #[test]
    fn test_prediction_group_conversion() {
        let prediction = proto::Prediction {
            object_meta: None,
            container_name: "app".to_string(),
            predicted_raw_data: vec![proto::MetricData {
                metric_type: proto::MetricType::MemoryUsageBytes as i32,
                data: vec![proto_sample(100, "10", "model-a"), proto_sample(130, "12", "model-a")],
                granularity: 30,
            }],
            predicted_upperbound_data: vec![],
            predicted_lowerbound_data: vec![],
        };

        let group = prediction_to_group(prediction);
        assert_eq!(group.container.as_deref(), Some("app"));
        let series = group.series(MetricType::MemoryUsageBytes).unwrap();
        assert_eq!(series.model_id, "model-a");
        assert_eq!(series.prediction_id, "pred-1");
        assert_eq!(group.latest_timestamp(), Some(130));
    }

    #[test]
    fn test_resource_conversion() {
        let resource = proto::Resource {
            unit_type: proto::UnitType::Controller as i32,
            object_meta: Some(proto::ObjectMeta {
                name: "web".into(),
                namespace: "default".into(),
                node_name: String::new(),
                cluster_name: "c1".into(),
                kind: "DEPLOYMENT".into(),
            }),
            containers: vec![],
            scaling_tool: "vpa".into(),
            host: String::new(),
            minor_number: 0,
            model_name: String::new(),
        };

        let unit = resource_to_unit(UnitKind::Controller, resource).unwrap();
        assert_eq!(unit.identity().key(), "DEPLOYMENT/default/web");
        assert_eq!(unit.scaling_tool(), Some(ScalingTool::Vpa));

        let empty = proto::Resource {
            unit_type: proto::UnitType::Node as i32,
            object_meta: None,
            containers: vec![],
            scaling_tool: String::new(),
            host: String::new(),
            minor_number: 0,
            model_name: String::new(),
        };
        assert!(resource_to_unit(UnitKind::Node, empty).is_none());
    }

    #[test]
    fn test_identity_filter_selects_one_unit() {
        let pod = UnitIdentity::Pod {
            cluster_name: "c1".into(),
            namespace: "default".into(),
            name: "web-0".into(),
        };
        let filter = identity_filter(&pod);
        assert_eq!(filter.name, "web-0");
        assert_eq!(filter.namespace, "default");
        assert_eq!(filter.cluster_name, "c1");

        let controller = UnitIdentity::Controller {
            cluster_name: "c1".into(),
            kind: "STATEFULSET".into(),
            namespace: "db".into(),
            name: "pg".into(),
        };
        assert_eq!(identity_filter(&controller).kind, "STATEFULSET");

        let gpu = UnitIdentity::Gpu {
            cluster_name: "c1".into(),
            host: "gpu-host".into(),
            minor_number: 2,
        };
        let filter = identity_filter(&gpu);
        assert_eq!(filter.node_name, "gpu-host");
        assert!(filter.name.is_empty());

        let cluster = UnitIdentity::Cluster { name: "c1".into() };
        assert_eq!(identity_filter(&cluster).cluster_name, "c1");
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_config_error() {
        let config = DatahubClientConfig {
            endpoint: "not a uri".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            GrpcDatahubClient::new(config),
            Err(DispatchError::Config(_))
        ));
    }
}
