//! `POST /v1/envelope` — the single wire entry point. Decodes the
//! `{type, id, payload}` request, dispatches by `RequestKind` onto the
//! kernel components, and re-encodes the result (or error) as a
//! `ResponseEnvelope`. HTTP status is always 200; callers read `type` to
//! tell success from `error`, the same convention the protocol crate's
//! doc comment describes.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use sa_domain::error::Error;
use sa_domain::governance::{AppealFilter, CaseFilter, SanctionFilter};
use sa_domain::policy::Decision;
use sa_domain::tool::Message;
use sa_protocol::{RequestEnvelope, RequestKind, ResponseEnvelope};
use sa_providers::{ChatRequest, LlmProvider};

use crate::state::AppState;

pub async fn handle(State(state): State<AppState>, Json(envelope): Json<RequestEnvelope>) -> impl IntoResponse {
    let id = envelope.id.clone();
    let request_type = envelope.request_type.clone();

    let response = match envelope.parse_kind() {
        Ok(kind) => match dispatch(&state, kind).await {
            Ok(payload) => ResponseEnvelope::result(id, &request_type, payload),
            Err(err) => ResponseEnvelope::error(id, &err),
        },
        Err(err) => ResponseEnvelope::error(id, &err),
    };

    Json(response)
}

async fn dispatch(state: &AppState, kind: RequestKind) -> Result<serde_json::Value, Error> {
    match kind {
        RequestKind::Auth(req) => {
            check_api_token(state, &req.token)?;
            Ok(serde_json::json!({ "authenticated": true }))
        }
        RequestKind::AgentSpawn(req) => {
            let agent = state.lifecycle.spawn(req.manifest).await?;
            Ok(serde_json::json!({ "agent_id": agent.id, "state": agent.state }))
        }
        RequestKind::AgentTask(req) => {
            let provider = state
                .providers
                .for_role("default")
                .ok_or_else(|| Error::Internal("no provider assigned to role default".into()))?;

            let check = state.sandbox.check(&req.agent_id, "llm", "chat", None);
            if !check.allowed {
                return Err(Error::PermissionDenied(
                    check.reason.unwrap_or_else(|| "capability check denied".into()),
                ));
            }

            let input = req.input.clone();
            let content = input.as_str().map(str::to_string);
            let bytes = serde_json::to_vec(&input).map(|v| v.len() as u64).unwrap_or(0);
            let evaluation = state.policy.evaluate(&req.agent_id, "agent_task", content.as_deref(), bytes);
            if evaluation.decision == Decision::Block {
                return Err(Error::PermissionDenied(format!(
                    "policy blocked agent_task for agent {}",
                    req.agent_id
                )));
            }

            state
                .lifecycle
                .task(&req.agent_id, |mut agent| async move {
                    let text = input.as_str().map(str::to_string).unwrap_or_else(|| input.to_string());
                    let message = Message::user(text);
                    let response = provider
                        .chat(ChatRequest {
                            messages: vec![message],
                            ..Default::default()
                        })
                        .await?;
                    if let Some(usage) = response.usage {
                        agent
                            .resource_usage
                            .add_tokens(usage.prompt_tokens as u64, usage.completion_tokens as u64);
                    }
                    agent
                        .user_data
                        .insert("last_output".into(), serde_json::json!(response.content));
                    Ok(agent)
                })
                .await?;
            let agent = state
                .lifecycle
                .agent(&req.agent_id)
                .ok_or_else(|| Error::NotFound(req.agent_id.clone()))?;
            Ok(serde_json::json!({
                "agent_id": agent.id,
                "state": agent.state,
                "resource_usage": agent.resource_usage,
            }))
        }
        RequestKind::AgentTerminate(req) => {
            state.lifecycle.terminate(&req.agent_id, req.forced).await?;
            Ok(serde_json::json!({ "agent_id": req.agent_id, "state": "terminated" }))
        }
        RequestKind::AgentStatus(req) => {
            let agent = state
                .lifecycle
                .agent(&req.agent_id)
                .ok_or_else(|| Error::NotFound(req.agent_id.clone()))?;
            Ok(serde_json::json!({
                "agent_id": agent.id,
                "state": agent.state,
                "resource_usage": agent.resource_usage,
                "last_checkpoint": agent.last_checkpoint,
            }))
        }
        RequestKind::PolicyCreate(req) => {
            state.policy.add_policy(req.policy.clone());
            Ok(serde_json::json!({ "policy_id": req.policy.id }))
        }
        RequestKind::ModerationCaseList(req) => {
            let cases = state.governance.list_cases(&CaseFilter {
                subject_agent_id: req.subject_agent_id,
                status: req.status,
            });
            Ok(serde_json::json!({ "cases": cases }))
        }
        RequestKind::SanctionList(req) => {
            let sanctions = state.governance.list_sanctions(&SanctionFilter {
                subject_agent_id: req.subject_agent_id,
                status: req.status,
            });
            Ok(serde_json::json!({ "sanctions": sanctions }))
        }
        RequestKind::AppealOpen(req) => {
            let appeal = state
                .governance
                .open_appeal(req.case_id, req.opened_by_agent_id, req.reason)?;
            Ok(serde_json::json!({ "appeal": appeal }))
        }
        RequestKind::AppealList(req) => {
            let appeals = state.governance.list_appeals(&AppealFilter {
                case_id: req.case_id,
                status: req.status,
            });
            Ok(serde_json::json!({ "appeals": appeals }))
        }
        RequestKind::AppealResolve(req) => {
            let appeal = state
                .governance
                .resolve_appeal(&req.appeal_id, req.status, req.resolution)?;
            Ok(serde_json::json!({ "appeal": appeal }))
        }
        RequestKind::CapabilityGrant(req) => {
            let token = state
                .sandbox
                .grant(req.agent_id, req.permissions, req.purpose, req.expires_at);
            Ok(serde_json::json!({ "token": token }))
        }
        RequestKind::CapabilityRevoke(req) => {
            state.sandbox.revoke(&req.agent_id, &req.token_id)?;
            Ok(serde_json::json!({ "revoked": true }))
        }
        RequestKind::CapabilityList(req) => {
            let tokens = state.sandbox.list_tokens(req.agent_id.as_deref());
            Ok(serde_json::json!({ "tokens": tokens }))
        }
    }
}

/// Constant-time compare against the envelope-level API token, mirroring
/// the admin guard's comparison. `None` on `state.api_token_hash` means the
/// envelope endpoint is open (dev mode).
fn check_api_token(state: &AppState, token: &str) -> Result<(), Error> {
    let Some(expected) = &state.api_token_hash else {
        return Ok(());
    };
    let provided = Sha256::digest(token.as_bytes());
    if bool::from(provided.ct_eq(expected.as_slice())) {
        Ok(())
    } else {
        Err(Error::PermissionDenied("invalid api token".into()))
    }
}
