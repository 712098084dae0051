//! Health, metrics, and admin-only system info. The constant-time bearer
//! token comparison mirrors the teacher's `AdminGuard` pattern: SHA-256 the
//! provided token, compare against the hash computed once at startup with
//! `subtle::ConstantTimeEq` so neither token length nor content leaks via
//! timing.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use sa_domain::governance::{CaseFilter, CaseStatus, SanctionFilter, SanctionStatus};
use sa_kernel::circuit_breaker::CircuitState;

use crate::state::AppState;

pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected_hash = match &state.admin_token_hash {
            Some(h) => h,
            None => return Ok(AdminGuard),
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "invalid admin token" })),
            ));
        }
        Ok(AdminGuard)
    }
}

/// `GET /health` — `ok | degraded | down`. The kernel only depends on one
/// required-optional external store (persistence); a circuit that is
/// `open` means persistence is unreachable but tasks still run against
/// in-memory agent state, hence `degraded` rather than `down`.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let breaker_state = state.persistence_breaker_state();
    let status = if breaker_state == CircuitState::Open && state.config.persistence.require_persistent_store {
        "down"
    } else if breaker_state == CircuitState::Open {
        "degraded"
    } else {
        "ok"
    };

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /v1/metrics` — operator-facing snapshot: agent counts by state,
/// circuit breaker state, scheduler job stats, open case / active sanction
/// counts. Grounded in the teacher's `api/admin/health.rs::metrics`.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let agents = state.lifecycle.list_agents();
    let mut by_state = std::collections::HashMap::new();
    for agent in &agents {
        *by_state.entry(agent.state.to_string()).or_insert(0usize) += 1;
    }

    let jobs = state.scheduler.list_jobs();
    let open_cases = state
        .governance
        .list_cases(&CaseFilter {
            subject_agent_id: None,
            status: Some(CaseStatus::Open),
        })
        .len();
    let active_sanctions = state
        .governance
        .list_sanctions(&SanctionFilter {
            subject_agent_id: None,
            status: Some(SanctionStatus::Active),
        })
        .len();

    Json(serde_json::json!({
        "agents": {
            "total": agents.len(),
            "by_state": by_state,
        },
        "circuit_breaker": {
            "state": state.breaker_stats().state.to_string(),
            "failure_count": state.breaker_stats().failure_count,
            "success_streak": state.breaker_stats().success_streak,
            "total_calls": state.breaker_stats().total_calls,
            "rejected_calls": state.breaker_stats().rejected_calls,
        },
        "scheduler": {
            "jobs": jobs.iter().map(|j| serde_json::json!({
                "id": j.id,
                "run_count": j.run_count,
                "overlap_skip_count": j.overlap_skip_count,
                "paused": j.paused,
            })).collect::<Vec<_>>(),
        },
        "governance": {
            "open_cases": open_cases,
            "active_sanctions": active_sanctions,
        },
        "providers": state.providers.len(),
    }))
}

/// `GET /v1/admin/system` — admin-only internals dump.
pub async fn system_info(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "server": {
            "host": state.config.server.host,
            "port": state.config.server.port,
        },
        "admin_token_set": state.admin_token_hash.is_some(),
        "sandbox_enforcement": state.config.sandbox.enforce_permissions,
        "persistence_store": format!("{:?}", state.config.persistence.store),
        "provider_count": state.providers.len(),
        "agent_count": state.lifecycle.list_agents().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use sa_domain::config::{Config, StoreKind};

    async fn state_with_admin_token(var: &str, token: Option<&str>) -> AppState {
        let mut config = Config::default();
        config.persistence.store = StoreKind::Memory;
        config.server.admin_token_env = Some(var.into());
        match token {
            Some(t) => std::env::set_var(var, t),
            None => std::env::remove_var(var),
        }
        crate::bootstrap::bootstrap(std::sync::Arc::new(config)).await.unwrap()
    }

    fn parts_with_bearer(token: Option<&str>) -> axum::http::request::Parts {
        let mut builder = Request::builder();
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {t}"));
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[tokio::test]
    async fn guard_allows_any_request_when_admin_token_unset() {
        let state = state_with_admin_token("SA_GATEWAY_TEST_ADMIN_TOKEN_UNSET", None).await;
        let mut parts = parts_with_bearer(None);
        assert!(AdminGuard::from_request_parts(&mut parts, &state).await.is_ok());
    }

    #[tokio::test]
    async fn guard_rejects_missing_or_wrong_token() {
        let state = state_with_admin_token("SA_GATEWAY_TEST_ADMIN_TOKEN_A", Some("correct-horse")).await;
        let mut parts = parts_with_bearer(Some("wrong-token"));
        assert!(AdminGuard::from_request_parts(&mut parts, &state).await.is_err());
    }

    #[tokio::test]
    async fn guard_accepts_matching_token() {
        let state = state_with_admin_token("SA_GATEWAY_TEST_ADMIN_TOKEN_B", Some("correct-horse")).await;
        let mut parts = parts_with_bearer(Some("correct-horse"));
        assert!(AdminGuard::from_request_parts(&mut parts, &state).await.is_ok());
    }

    #[tokio::test]
    async fn health_reports_ok_when_breaker_closed() {
        let mut config = Config::default();
        config.persistence.store = StoreKind::Memory;
        let state = crate::bootstrap::bootstrap(std::sync::Arc::new(config)).await.unwrap();
        assert_eq!(state.persistence_breaker_state(), CircuitState::Closed);
    }
}
