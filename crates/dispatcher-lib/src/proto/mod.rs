//! Datahub protobuf bindings
//!
//! Message types mirror `proto/datahub/v1/datahub.proto`. With the
//! `proto-gen` feature they are generated by tonic-build instead.

#[cfg(feature = "proto-gen")]
pub mod datahub {
    pub mod v1 {
        tonic::include_proto!("datahub.v1");
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod datahub {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum UnitType {
            #[default]
            Unspecified = 0,
            Node = 1,
            Pod = 2,
            Gpu = 3,
            Namespace = 4,
            Application = 5,
            Cluster = 6,
            Controller = 7,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum MetricType {
            #[default]
            Unspecified = 0,
            CpuUsageSecondsPercentage = 1,
            MemoryUsageBytes = 2,
            PowerUsageWatts = 3,
            TemperatureCelsius = 4,
            DutyCycle = 5,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum Aggregation {
            #[default]
            None = 0,
            Avg = 1,
            Max = 2,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum Order {
            #[default]
            Asc = 0,
            Desc = 1,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ObjectMeta {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(string, tag = "2")]
            pub namespace: String,
            #[prost(string, tag = "3")]
            pub node_name: String,
            #[prost(string, tag = "4")]
            pub cluster_name: String,
            #[prost(string, tag = "5")]
            pub kind: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct TimeRange {
            #[prost(message, optional, tag = "1")]
            pub start_time: Option<prost_types::Timestamp>,
            #[prost(message, optional, tag = "2")]
            pub end_time: Option<prost_types::Timestamp>,
            #[prost(message, optional, tag = "3")]
            pub step: Option<prost_types::Duration>,
            #[prost(int32, tag = "4")]
            pub aggregation: i32,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct QueryCondition {
            #[prost(message, optional, tag = "1")]
            pub time_range: Option<TimeRange>,
            #[prost(int32, tag = "2")]
            pub order: i32,
            #[prost(int32, tag = "3")]
            pub limit: i32,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Sample {
            #[prost(message, optional, tag = "1")]
            pub time: Option<prost_types::Timestamp>,
            #[prost(message, optional, tag = "2")]
            pub end_time: Option<prost_types::Timestamp>,
            #[prost(string, tag = "3")]
            pub num_value: String,
            #[prost(string, tag = "4")]
            pub model_id: String,
            #[prost(string, tag = "5")]
            pub prediction_id: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct MetricData {
            #[prost(int32, tag = "1")]
            pub metric_type: i32,
            #[prost(message, repeated, tag = "2")]
            pub data: Vec<Sample>,
            #[prost(int64, tag = "3")]
            pub granularity: i64,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Resource {
            #[prost(int32, tag = "1")]
            pub unit_type: i32,
            #[prost(message, optional, tag = "2")]
            pub object_meta: Option<ObjectMeta>,
            #[prost(string, repeated, tag = "3")]
            pub containers: Vec<String>,
            #[prost(string, tag = "4")]
            pub scaling_tool: String,
            #[prost(string, tag = "5")]
            pub host: String,
            #[prost(int32, tag = "6")]
            pub minor_number: i32,
            #[prost(string, tag = "7")]
            pub model_name: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct UnitSelector {
            #[prost(int32, tag = "1")]
            pub unit_type: i32,
            #[prost(message, optional, tag = "2")]
            pub object_meta: Option<ObjectMeta>,
            #[prost(string, tag = "3")]
            pub host: String,
            #[prost(int32, tag = "4")]
            pub minor_number: i32,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListResourcesRequest {
            #[prost(int32, tag = "1")]
            pub unit_type: i32,
            #[prost(message, optional, tag = "2")]
            pub object_meta: Option<ObjectMeta>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListResourcesResponse {
            #[prost(message, repeated, tag = "1")]
            pub resources: Vec<Resource>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Prediction {
            #[prost(message, optional, tag = "1")]
            pub object_meta: Option<ObjectMeta>,
            #[prost(string, tag = "2")]
            pub container_name: String,
            #[prost(message, repeated, tag = "3")]
            pub predicted_raw_data: Vec<MetricData>,
            #[prost(message, repeated, tag = "4")]
            pub predicted_upperbound_data: Vec<MetricData>,
            #[prost(message, repeated, tag = "5")]
            pub predicted_lowerbound_data: Vec<MetricData>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListPredictionsRequest {
            #[prost(message, optional, tag = "1")]
            pub unit: Option<UnitSelector>,
            #[prost(int64, tag = "2")]
            pub granularity: i64,
            #[prost(message, optional, tag = "3")]
            pub query_condition: Option<QueryCondition>,
            #[prost(string, tag = "4")]
            pub model_id: String,
            #[prost(string, tag = "5")]
            pub prediction_id: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListPredictionsResponse {
            #[prost(message, repeated, tag = "1")]
            pub predictions: Vec<Prediction>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct MetricSeries {
            #[prost(message, optional, tag = "1")]
            pub object_meta: Option<ObjectMeta>,
            #[prost(string, tag = "2")]
            pub container_name: String,
            #[prost(message, repeated, tag = "3")]
            pub metric_data: Vec<MetricData>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListMetricsRequest {
            #[prost(message, optional, tag = "1")]
            pub unit: Option<UnitSelector>,
            #[prost(int64, tag = "2")]
            pub granularity: i64,
            #[prost(message, optional, tag = "3")]
            pub query_condition: Option<QueryCondition>,
            #[prost(int32, repeated, tag = "4")]
            pub metric_types: Vec<i32>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ListMetricsResponse {
            #[prost(message, repeated, tag = "1")]
            pub metrics: Vec<MetricSeries>,
        }

        pub mod datahub_service_client {
            use super::*;
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct DatahubServiceClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl DatahubServiceClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> DatahubServiceClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                async fn ready(&mut self) -> Result<(), tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })
                }

                pub async fn list_resources(
                    &mut self,
                    request: impl tonic::IntoRequest<ListResourcesRequest>,
                ) -> Result<tonic::Response<ListResourcesResponse>, tonic::Status> {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/datahub.v1.DatahubService/ListResources",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }

                pub async fn list_predictions(
                    &mut self,
                    request: impl tonic::IntoRequest<ListPredictionsRequest>,
                ) -> Result<tonic::Response<ListPredictionsResponse>, tonic::Status> {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/datahub.v1.DatahubService/ListPredictions",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }

                pub async fn list_metrics(
                    &mut self,
                    request: impl tonic::IntoRequest<ListMetricsRequest>,
                ) -> Result<tonic::Response<ListMetricsResponse>, tonic::Status> {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/datahub.v1.DatahubService/ListMetrics",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub use datahub::v1::datahub_service_client::DatahubServiceClient;
pub use datahub::v1::*;
