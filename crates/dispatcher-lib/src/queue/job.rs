//! Job envelopes published to the training and prediction queues

use crate::models::{granularity_label, UnitKind};
use serde::{Deserialize, Serialize};

/// JSON wrapper consumed by the ML workers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub unit_type: String,
    pub granularity: String,
    pub granularity_sec: i64,
    #[serde(rename = "payloadJSONString")]
    pub payload_json_string: String,
    /// Unix seconds, echoed back as `job_create_time` on completion
    pub create_timestamp: i64,
}

impl JobEnvelope {
    pub fn builder(kind: UnitKind, granularity_secs: i64, payload: impl Into<String>) -> JobBuilder {
        JobBuilder {
            kind,
            granularity_secs,
            payload: payload.into(),
            create_timestamp: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builder for [`JobEnvelope`]
#[derive(Debug, Clone)]
pub struct JobBuilder {
    kind: UnitKind,
    granularity_secs: i64,
    payload: String,
    create_timestamp: Option<i64>,
}

impl JobBuilder {
    pub fn create_timestamp(mut self, timestamp: i64) -> Self {
        self.create_timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> JobEnvelope {
        JobEnvelope {
            unit_type: self.kind.as_str().to_string(),
            granularity: granularity_label(self.granularity_secs).to_string(),
            granularity_sec: self.granularity_secs,
            payload_json_string: self.payload,
            create_timestamp: self
                .create_timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        }
    }
}

/// Message id used by the broker to drop duplicate jobs
pub fn dedup_key(kind: UnitKind, identity_key: &str, granularity_secs: i64) -> String {
    format!("{}/{}/{}", kind.as_str(), identity_key, granularity_secs)
}
