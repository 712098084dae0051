//! Gateway wire protocol: the `{type, id, payload}` envelope exchanged
//! between callers and the gateway, and the typed payloads for every
//! request the kernel understands.

use sa_domain::agent::{AgentState, Manifest, ResourceUsage};
use sa_domain::error::Error;
use sa_domain::governance::{AppealStatus, CaseStatus, SanctionStatus};
use sa_domain::permission::Permission;
use sa_domain::policy::Policy;
use serde::{Deserialize, Serialize};

/// Caller → gateway. `payload`'s shape is determined by `request_type`; see
/// [`RequestKind`] for the closed set of recognized requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub request_type: String,
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RequestEnvelope {
    /// Decode `payload` against `request_type`, producing a closed,
    /// statically-typed [`RequestKind`]. An unrecognized `request_type` or
    /// a payload that fails its schema is reported as `InvalidInput`.
    pub fn parse_kind(&self) -> Result<RequestKind, Error> {
        let tagged = serde_json::json!({ "type": self.request_type, "payload": self.payload });
        serde_json::from_value(tagged)
            .map_err(|e| Error::InvalidInput(format!("request {}: {e}", self.request_type)))
    }
}

/// Gateway → caller. `response_type` is either `<request_type>_result` or
/// the literal `error`; `id` always echoes the originating request's `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub response_type: String,
    pub id: String,
    pub payload: serde_json::Value,
}

impl ResponseEnvelope {
    pub fn result(id: impl Into<String>, request_type: &str, payload: serde_json::Value) -> Self {
        ResponseEnvelope {
            response_type: format!("{request_type}_result"),
            id: id.into(),
            payload,
        }
    }

    pub fn error(id: impl Into<String>, error: &Error) -> Self {
        let payload = ErrorPayload {
            code: error.code().to_string(),
            message: error.to_string(),
            details: None,
        };
        ResponseEnvelope {
            response_type: "error".into(),
            id: id.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The closed set of request payloads the kernel dispatches on. Deserialized
/// from `{type, payload}` via [`RequestEnvelope::parse_kind`]; the `id`
/// field of the envelope is carried separately, not duplicated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RequestKind {
    Auth(AuthRequest),
    AgentSpawn(AgentSpawnRequest),
    AgentTask(AgentTaskRequest),
    AgentTerminate(AgentTerminateRequest),
    AgentStatus(AgentStatusRequest),
    PolicyCreate(PolicyCreateRequest),
    ModerationCaseList(ModerationCaseListRequest),
    SanctionList(SanctionListRequest),
    AppealOpen(AppealOpenRequest),
    AppealList(AppealListRequest),
    AppealResolve(AppealResolveRequest),
    CapabilityGrant(CapabilityGrantRequest),
    CapabilityRevoke(CapabilityRevokeRequest),
    CapabilityList(CapabilityListRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpawnRequest {
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpawnResult {
    pub agent_id: String,
    pub state: AgentState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskRequest {
    pub agent_id: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskResult {
    pub agent_id: String,
    pub state: AgentState,
    pub resource_usage: ResourceUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTerminateRequest {
    pub agent_id: String,
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusRequest {
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusResult {
    pub agent_id: String,
    pub state: AgentState,
    pub resource_usage: ResourceUsage,
    pub last_checkpoint: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCreateRequest {
    pub policy: Policy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationCaseListRequest {
    #[serde(default)]
    pub subject_agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<CaseStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanctionListRequest {
    #[serde(default)]
    pub subject_agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<SanctionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppealOpenRequest {
    pub case_id: String,
    pub opened_by_agent_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppealListRequest {
    #[serde(default)]
    pub case_id: Option<String>,
    #[serde(default)]
    pub status: Option<AppealStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppealResolveRequest {
    pub appeal_id: String,
    pub status: AppealStatus,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityGrantRequest {
    pub agent_id: String,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRevokeRequest {
    pub agent_id: String,
    pub token_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityListRequest {
    /// Omitted lists live tokens across every agent.
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_status_request_by_type_tag() {
        let envelope = RequestEnvelope {
            request_type: "agent_status".into(),
            id: "req-1".into(),
            payload: serde_json::json!({ "agent_id": "agent-1" }),
        };
        let kind = envelope.parse_kind().unwrap();
        match kind {
            RequestKind::AgentStatus(req) => assert_eq!(req.agent_id, "agent-1"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_is_invalid_input() {
        let envelope = RequestEnvelope {
            request_type: "not_a_real_type".into(),
            id: "req-1".into(),
            payload: serde_json::Value::Null,
        };
        assert!(envelope.parse_kind().is_err());
    }

    #[test]
    fn error_response_echoes_request_id_and_error_code() {
        let response = ResponseEnvelope::error("req-2", &Error::NotFound("agent-9".into()));
        assert_eq!(response.response_type, "error");
        assert_eq!(response.id, "req-2");
        let payload: ErrorPayload = serde_json::from_value(response.payload).unwrap();
        assert_eq!(payload.code, "NotFound");
    }

    #[test]
    fn result_response_type_suffix() {
        let response = ResponseEnvelope::result("req-3", "agent_spawn", serde_json::json!({}));
        assert_eq!(response.response_type, "agent_spawn_result");
    }
}
