//! Append-only audit trail entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
    Error,
}

/// Severity categories attached to audit entries, matching the
/// `lifecycle | state | permission | resource | security | tool | communication`
/// set named in the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Lifecycle,
    State,
    Permission,
    Resource,
    Security,
    Tool,
    Communication,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub actor_id: String,
    pub category: AuditCategory,
    pub details: serde_json::Value,
    pub outcome: Outcome,
    pub created_at: DateTime<Utc>,
}

/// Builder for [`AuditEntry`] keeping call sites terse; `id`/`created_at`
/// are stamped by the sink on append, not by the builder.
pub struct AuditEntryBuilder {
    action: String,
    resource_type: String,
    resource_id: String,
    actor_id: String,
    category: AuditCategory,
    details: serde_json::Value,
    outcome: Outcome,
}

impl AuditEntryBuilder {
    pub fn new(action: impl Into<String>, category: AuditCategory, outcome: Outcome) -> Self {
        AuditEntryBuilder {
            action: action.into(),
            resource_type: String::new(),
            resource_id: String::new(),
            actor_id: String::new(),
            category,
            details: serde_json::Value::Null,
            outcome,
        }
    }

    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self.resource_id = resource_id.into();
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn build(self, id: String, created_at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            actor_id: self.actor_id,
            category: self.category,
            details: self.details,
            outcome: self.outcome,
            created_at,
        }
    }
}
