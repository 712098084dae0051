//! Event bus message envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
    pub correlation_id: Option<String>,
}

impl EventMessage {
    pub fn new(id: String, event_type: impl Into<String>, data: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        EventMessage {
            id,
            event_type: event_type.into(),
            data,
            timestamp,
            source: None,
            correlation_id: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
