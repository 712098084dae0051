//! Moderation case, sanction, and appeal types owned by Governance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::SanctionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationCase {
    pub id: String,
    pub subject_agent_id: String,
    pub policy_id: String,
    pub rule_index: usize,
    pub action: String,
    pub status: CaseStatus,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionStatus {
    Active,
    Lifted,
    Expired,
}

/// Invariant: at most one active sanction of each [`SanctionKind`] per
/// subject at any time — enforced by `sa_kernel::governance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sanction {
    pub id: String,
    pub case_id: String,
    pub subject_agent_id: String,
    #[serde(rename = "type")]
    pub kind: SanctionKind,
    pub applied_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SanctionStatus,
}

impl Sanction {
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    Pending,
    Resolved,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appeal {
    pub id: String,
    pub case_id: String,
    pub opened_by_agent_id: String,
    pub reason: String,
    pub status: AppealStatus,
    pub resolution: Option<String>,
}

/// Filters accepted by the `list*` governance queries. All fields are
/// conjunctive; `None` means "don't filter on this field".
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub subject_agent_id: Option<String>,
    pub status: Option<CaseStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct SanctionFilter {
    pub subject_agent_id: Option<String>,
    pub status: Option<SanctionStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct AppealFilter {
    pub case_id: Option<String>,
    pub status: Option<AppealStatus>,
}
