//! Core data models for the dispatcher

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Returned when a wire tag does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

/// Kinds of resource units a model can be trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitKind {
    Node,
    Pod,
    Gpu,
    Namespace,
    Application,
    Cluster,
    Controller,
}

impl UnitKind {
    pub const ALL: [UnitKind; 7] = [
        UnitKind::Node,
        UnitKind::Pod,
        UnitKind::Gpu,
        UnitKind::Namespace,
        UnitKind::Application,
        UnitKind::Cluster,
        UnitKind::Controller,
    ];

    /// Tag used in job envelopes and completion notifications
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Node => "NODE",
            UnitKind::Pod => "POD",
            UnitKind::Gpu => "GPU",
            UnitKind::Namespace => "NAMESPACE",
            UnitKind::Application => "APPLICATION",
            UnitKind::Cluster => "CLUSTER",
            UnitKind::Controller => "CONTROLLER",
        }
    }

    /// Metric types trained when there is nothing to compare against
    pub fn default_metric_types(&self) -> &'static [MetricType] {
        match self {
            UnitKind::Gpu => &[MetricType::MemoryUsageBytes, MetricType::DutyCycle],
            _ => &[MetricType::CpuUsagePercentage, MetricType::MemoryUsageBytes],
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                what: "unit kind",
                value: s.to_string(),
            })
    }
}

/// Metric types tracked by the datahub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricType {
    #[serde(rename = "CPU_USAGE_SECONDS_PERCENTAGE")]
    CpuUsagePercentage,
    #[serde(rename = "MEMORY_USAGE_BYTES")]
    MemoryUsageBytes,
    #[serde(rename = "DUTY_CYCLE")]
    DutyCycle,
    #[serde(rename = "POWER_USAGE_WATTS")]
    PowerUsageWatts,
    #[serde(rename = "TEMPERATURE_CELSIUS")]
    TemperatureCelsius,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [
        MetricType::CpuUsagePercentage,
        MetricType::MemoryUsageBytes,
        MetricType::DutyCycle,
        MetricType::PowerUsageWatts,
        MetricType::TemperatureCelsius,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::CpuUsagePercentage => "CPU_USAGE_SECONDS_PERCENTAGE",
            MetricType::MemoryUsageBytes => "MEMORY_USAGE_BYTES",
            MetricType::DutyCycle => "DUTY_CYCLE",
            MetricType::PowerUsageWatts => "POWER_USAGE_WATTS",
            MetricType::TemperatureCelsius => "TEMPERATURE_CELSIUS",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .iter()
            .copied()
            .find(|metric| metric.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownVariant {
                what: "metric type",
                value: s.to_string(),
            })
    }
}

/// Sampling interval at which metrics and predictions are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    ThirtySeconds,
    OneHour,
    SixHours,
    TwentyFourHours,
}

impl Granularity {
    pub const SUPPORTED: [Granularity; 4] = [
        Granularity::ThirtySeconds,
        Granularity::OneHour,
        Granularity::SixHours,
        Granularity::TwentyFourHours,
    ];

    pub fn secs(&self) -> i64 {
        match self {
            Granularity::ThirtySeconds => 30,
            Granularity::OneHour => 3600,
            Granularity::SixHours => 21600,
            Granularity::TwentyFourHours => 86400,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Granularity::ThirtySeconds => "30s",
            Granularity::OneHour => "1h",
            Granularity::SixHours => "6h",
            Granularity::TwentyFourHours => "24h",
        }
    }

    /// Exact lookup, `None` for unsupported values
    pub fn try_from_secs(secs: i64) -> Option<Self> {
        Self::SUPPORTED.iter().copied().find(|g| g.secs() == secs)
    }

    /// Lookup that falls back to 30s for unsupported values
    pub fn from_secs(secs: i64) -> Self {
        Self::try_from_secs(secs).unwrap_or_else(|| {
            warn!(
                granularity_secs = secs,
                fallback = "30s",
                "Unsupported granularity, falling back to 30s"
            );
            Granularity::ThirtySeconds
        })
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::SUPPORTED
            .iter()
            .copied()
            .find(|g| g.label() == label.trim())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Label for a granularity in seconds ("30s" for anything unsupported)
pub fn granularity_label(secs: i64) -> &'static str {
    Granularity::from_secs(secs).label()
}

/// Seconds for a granularity label (30 for anything unsupported)
pub fn granularity_secs(label: &str) -> i64 {
    Granularity::from_label(label)
        .map(|g| g.secs())
        .unwrap_or(30)
}

/// Autoscaling tool attached to a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingTool {
    #[default]
    None,
    Vpa,
    Hpa,
}

impl ScalingTool {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "VPA" => ScalingTool::Vpa,
            "HPA" => ScalingTool::Hpa,
            _ => ScalingTool::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUnit {
    pub cluster_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodUnit {
    pub cluster_name: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub scaling_tool: ScalingTool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceUnit {
    pub cluster_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationUnit {
    pub cluster_name: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub scaling_tool: ScalingTool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerUnit {
    pub cluster_name: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub scaling_tool: ScalingTool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterUnit {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuUnit {
    pub cluster_name: String,
    pub host: String,
    pub minor_number: i32,
    #[serde(default)]
    pub model_name: String,
}

/// Snapshot of a unit fetched from the datahub for one scheduling pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUnit {
    Node(NodeUnit),
    Pod(PodUnit),
    Namespace(NamespaceUnit),
    Application(ApplicationUnit),
    Controller(ControllerUnit),
    Cluster(ClusterUnit),
    Gpu(GpuUnit),
}

impl ResourceUnit {
    pub fn kind(&self) -> UnitKind {
        match self {
            ResourceUnit::Node(_) => UnitKind::Node,
            ResourceUnit::Pod(_) => UnitKind::Pod,
            ResourceUnit::Namespace(_) => UnitKind::Namespace,
            ResourceUnit::Application(_) => UnitKind::Application,
            ResourceUnit::Controller(_) => UnitKind::Controller,
            ResourceUnit::Cluster(_) => UnitKind::Cluster,
            ResourceUnit::Gpu(_) => UnitKind::Gpu,
        }
    }

    pub fn identity(&self) -> UnitIdentity {
        match self {
            ResourceUnit::Node(n) => UnitIdentity::Node {
                cluster_name: n.cluster_name.clone(),
                name: n.name.clone(),
            },
            ResourceUnit::Pod(p) => UnitIdentity::Pod {
                cluster_name: p.cluster_name.clone(),
                namespace: p.namespace.clone(),
                name: p.name.clone(),
            },
            ResourceUnit::Namespace(n) => UnitIdentity::Namespace {
                cluster_name: n.cluster_name.clone(),
                name: n.name.clone(),
            },
            ResourceUnit::Application(a) => UnitIdentity::Application {
                cluster_name: a.cluster_name.clone(),
                namespace: a.namespace.clone(),
                name: a.name.clone(),
            },
            ResourceUnit::Controller(c) => UnitIdentity::Controller {
                cluster_name: c.cluster_name.clone(),
                kind: c.kind.clone(),
                namespace: c.namespace.clone(),
                name: c.name.clone(),
            },
            ResourceUnit::Cluster(c) => UnitIdentity::Cluster {
                name: c.name.clone(),
            },
            ResourceUnit::Gpu(g) => UnitIdentity::Gpu {
                cluster_name: g.cluster_name.clone(),
                host: g.host.clone(),
                minor_number: g.minor_number,
            },
        }
    }

    pub fn scaling_tool(&self) -> Option<ScalingTool> {
        match self {
            ResourceUnit::Pod(p) => Some(p.scaling_tool),
            ResourceUnit::Application(a) => Some(a.scaling_tool),
            ResourceUnit::Controller(c) => Some(c.scaling_tool),
            _ => None,
        }
    }

    /// Container names, only pods have any
    pub fn containers(&self) -> &[String] {
        match self {
            ResourceUnit::Pod(p) => &p.containers,
            _ => &[],
        }
    }

    /// Unit snapshot as a JSON object
    pub fn payload_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            ResourceUnit::Node(n) => serde_json::to_value(n),
            ResourceUnit::Pod(p) => serde_json::to_value(p),
            ResourceUnit::Namespace(n) => serde_json::to_value(n),
            ResourceUnit::Application(a) => serde_json::to_value(a),
            ResourceUnit::Controller(c) => serde_json::to_value(c),
            ResourceUnit::Cluster(c) => serde_json::to_value(c),
            ResourceUnit::Gpu(g) => serde_json::to_value(g),
        }
    }

    /// JSON carried as `payloadJSONString` in a predict job envelope
    pub fn payload_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload_value()?)
    }
}

/// Identity fields of a unit, independent of the snapshot it came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "unit_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitIdentity {
    Node {
        cluster_name: String,
        name: String,
    },
    Pod {
        cluster_name: String,
        namespace: String,
        name: String,
    },
    Namespace {
        cluster_name: String,
        name: String,
    },
    Application {
        cluster_name: String,
        namespace: String,
        name: String,
    },
    Controller {
        cluster_name: String,
        kind: String,
        namespace: String,
        name: String,
    },
    Cluster {
        name: String,
    },
    Gpu {
        cluster_name: String,
        host: String,
        minor_number: i32,
    },
}

impl UnitIdentity {
    pub fn kind(&self) -> UnitKind {
        match self {
            UnitIdentity::Node { .. } => UnitKind::Node,
            UnitIdentity::Pod { .. } => UnitKind::Pod,
            UnitIdentity::Namespace { .. } => UnitKind::Namespace,
            UnitIdentity::Application { .. } => UnitKind::Application,
            UnitIdentity::Controller { .. } => UnitKind::Controller,
            UnitIdentity::Cluster { .. } => UnitKind::Cluster,
            UnitIdentity::Gpu { .. } => UnitKind::Gpu,
        }
    }

    /// Key of the unit within its cluster
    pub fn key(&self) -> String {
        match self {
            UnitIdentity::Node { name, .. }
            | UnitIdentity::Namespace { name, .. }
            | UnitIdentity::Cluster { name } => name.clone(),
            UnitIdentity::Pod {
                namespace, name, ..
            }
            | UnitIdentity::Application {
                namespace, name, ..
            } => format!("{}/{}", namespace, name),
            UnitIdentity::Controller {
                kind,
                namespace,
                name,
                ..
            } => format!("{}/{}/{}", kind, namespace, name),
            UnitIdentity::Gpu {
                host, minor_number, ..
            } => format!("{}/{}", host, minor_number),
        }
    }

    /// Key under which the tracker stores this unit
    ///
    /// Prefixed with the cluster name so same-named units of different
    /// clusters never share an entry.
    pub fn tracker_key(&self) -> String {
        match self {
            UnitIdentity::Cluster { name } => name.clone(),
            _ if self.cluster_name().is_empty() => self.key(),
            _ => format!("{}/{}", self.cluster_name(), self.key()),
        }
    }

    /// Same unit, treating an empty cluster name as unknown
    pub fn matches(&self, other: &UnitIdentity) -> bool {
        let same_cluster = self.cluster_name().is_empty()
            || other.cluster_name().is_empty()
            || self.cluster_name() == other.cluster_name();
        self.kind() == other.kind() && self.key() == other.key() && same_cluster
    }

    pub fn cluster_name(&self) -> &str {
        match self {
            UnitIdentity::Node { cluster_name, .. }
            | UnitIdentity::Pod { cluster_name, .. }
            | UnitIdentity::Namespace { cluster_name, .. }
            | UnitIdentity::Application { cluster_name, .. }
            | UnitIdentity::Controller { cluster_name, .. }
            | UnitIdentity::Gpu { cluster_name, .. } => cluster_name,
            UnitIdentity::Cluster { name } => name,
        }
    }
}

impl fmt::Display for UnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.key())
    }
}

/// A single timestamped value (Unix seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples of one metric type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
}

/// Metric needs of one pod container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerModelInfo {
    pub name: String,
    pub metric_types: Vec<MetricType>,
}

/// Tracker entry for a unit with a model job in flight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub identity: UnitIdentity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerModelInfo>,
    pub metric_types: Vec<MetricType>,
    pub timestamp: i64,
}

impl ModelInfo {
    pub fn new(identity: UnitIdentity, timestamp: i64) -> Self {
        Self {
            identity,
            containers: Vec::new(),
            metric_types: Vec::new(),
            timestamp,
        }
    }

    pub fn key(&self) -> String {
        self.identity.tracker_key()
    }

    /// True when no metric of the unit or of any container needs training
    pub fn is_empty(&self) -> bool {
        self.metric_types.is_empty() && self.containers.iter().all(|c| c.metric_types.is_empty())
    }
}
