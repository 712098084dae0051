//! Moderation cases, sanctions, and appeals.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::audit::{AuditCategory, AuditEntryBuilder, Outcome};
use sa_domain::error::{Error, Result};
use sa_domain::governance::{
    Appeal, AppealFilter, AppealStatus, CaseFilter, CaseStatus, ModerationCase, Sanction,
    SanctionFilter, SanctionStatus,
};
use sa_domain::policy::{SanctionKind, SanctionTemplate};
use sa_domain::trace::TraceEvent;
use uuid::Uuid;

use crate::audit_sink::AuditLog;

/// Categories a given sanction kind denies capability checks for. `ban` and
/// `suspend` are full blackouts; `mute` only silences outward communication;
/// `warn` is informational and denies nothing.
pub fn sanction_denies_category(kind: SanctionKind, category: &str) -> bool {
    match kind {
        SanctionKind::Ban | SanctionKind::Suspend => true,
        SanctionKind::Mute => matches!(category, "forum" | "communication"),
        SanctionKind::Warn => false,
    }
}

pub struct Governance {
    cases: RwLock<Vec<ModerationCase>>,
    sanctions: RwLock<Vec<Sanction>>,
    appeals: RwLock<Vec<Appeal>>,
    pending_bans: RwLock<VecDeque<String>>,
    audit: Arc<AuditLog>,
}

impl Governance {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Governance {
            cases: RwLock::new(Vec::new()),
            sanctions: RwLock::new(Vec::new()),
            appeals: RwLock::new(Vec::new()),
            pending_bans: RwLock::new(VecDeque::new()),
            audit,
        }
    }

    pub fn open_case(
        &self,
        subject_agent_id: impl Into<String>,
        policy_id: impl Into<String>,
        rule_index: usize,
        action: impl Into<String>,
        evidence: Vec<String>,
    ) -> ModerationCase {
        let subject_agent_id = subject_agent_id.into();
        let case = ModerationCase {
            id: Uuid::new_v4().to_string(),
            subject_agent_id: subject_agent_id.clone(),
            policy_id: policy_id.into(),
            rule_index,
            action: action.into(),
            status: CaseStatus::Open,
            opened_at: Utc::now(),
            resolved_at: None,
            evidence,
        };
        self.cases.write().push(case.clone());
        self.audit.append(
            AuditEntryBuilder::new("governance.case_opened", AuditCategory::Security, Outcome::Allow)
                .resource("moderation_case", &case.id)
                .actor(&subject_agent_id),
        );
        case
    }

    pub fn resolve_case(&self, case_id: &str, status: CaseStatus) -> Result<ModerationCase> {
        let mut cases = self.cases.write();
        let case = cases
            .iter_mut()
            .find(|c| c.id == case_id)
            .ok_or_else(|| Error::NotFound(format!("moderation case {case_id}")))?;
        case.status = status;
        case.resolved_at = Some(Utc::now());
        Ok(case.clone())
    }

    pub fn list_cases(&self, filter: &CaseFilter) -> Vec<ModerationCase> {
        self.cases
            .read()
            .iter()
            .filter(|c| {
                filter
                    .subject_agent_id
                    .as_ref()
                    .map(|id| &c.subject_agent_id == id)
                    .unwrap_or(true)
                    && filter.status.map(|s| c.status == s).unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Apply a sanction tied to `case_id`. If an active sanction of the
    /// same kind already exists for the subject, it is superseded (lifted)
    /// so the "at most one active sanction per kind" invariant holds.
    pub fn apply_sanction(
        &self,
        case_id: impl Into<String>,
        subject_agent_id: impl Into<String>,
        template: &SanctionTemplate,
    ) -> Sanction {
        let subject_agent_id = subject_agent_id.into();
        let kind = template.kind();
        let now = Utc::now();

        {
            let mut sanctions = self.sanctions.write();
            for existing in sanctions
                .iter_mut()
                .filter(|s| s.subject_agent_id == subject_agent_id && s.kind == kind && s.status == SanctionStatus::Active)
            {
                existing.status = SanctionStatus::Lifted;
            }
        }

        let sanction = Sanction {
            id: Uuid::new_v4().to_string(),
            case_id: case_id.into(),
            subject_agent_id: subject_agent_id.clone(),
            kind,
            applied_at: now,
            expires_at: template.duration_ms().map(|ms| now + chrono::Duration::milliseconds(ms as i64)),
            status: SanctionStatus::Active,
        };
        self.sanctions.write().push(sanction.clone());

        TraceEvent::SanctionApplied {
            sanction_id: sanction.id.clone(),
            subject_agent_id: subject_agent_id.clone(),
            kind: kind.to_string(),
        }
        .emit();
        self.audit.append(
            AuditEntryBuilder::new("governance.sanction_applied", AuditCategory::Security, Outcome::Allow)
                .resource("sanction", &sanction.id)
                .actor(&subject_agent_id),
        );

        if kind == SanctionKind::Ban {
            self.pending_bans.write().push_back(subject_agent_id);
        }

        sanction
    }

    pub fn lift_sanction(&self, sanction_id: &str) -> Result<Sanction> {
        let mut sanctions = self.sanctions.write();
        let sanction = sanctions
            .iter_mut()
            .find(|s| s.id == sanction_id)
            .ok_or_else(|| Error::NotFound(format!("sanction {sanction_id}")))?;
        sanction.status = SanctionStatus::Lifted;
        Ok(sanction.clone())
    }

    pub fn list_sanctions(&self, filter: &SanctionFilter) -> Vec<Sanction> {
        self.sanctions
            .read()
            .iter()
            .filter(|s| {
                filter
                    .subject_agent_id
                    .as_ref()
                    .map(|id| &s.subject_agent_id == id)
                    .unwrap_or(true)
                    && filter.status.map(|st| s.status == st).unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Active, non-expired sanction kinds currently held by `agent_id`,
    /// consulted by the Sandbox on every capability check.
    pub fn active_sanction_kinds(&self, agent_id: &str) -> Vec<SanctionKind> {
        self.sanctions
            .read()
            .iter()
            .filter(|s| s.subject_agent_id == agent_id && s.status == SanctionStatus::Active)
            .map(|s| s.kind)
            .collect()
    }

    /// Move `active` sanctions whose `expires_at` has passed to `expired`.
    /// Intended to run as a 30s scheduler job.
    pub fn sweep_expired_sanctions(&self) -> usize {
        let now = Utc::now();
        let mut sanctions = self.sanctions.write();
        let mut swept = 0;
        for sanction in sanctions.iter_mut() {
            if sanction.status == SanctionStatus::Active && sanction.has_expired(now) {
                sanction.status = SanctionStatus::Expired;
                swept += 1;
                TraceEvent::SanctionExpired {
                    sanction_id: sanction.id.clone(),
                    subject_agent_id: sanction.subject_agent_id.clone(),
                }
                .emit();
            }
        }
        swept
    }

    /// Drain agent ids whose `ban` sanction has not yet forced a state
    /// transition; the Lifecycle Manager calls this on its own scheduling
    /// tick and terminates each one.
    pub fn drain_pending_bans(&self) -> Vec<String> {
        self.pending_bans.write().drain(..).collect()
    }

    pub fn open_appeal(&self, case_id: impl Into<String>, opened_by_agent_id: impl Into<String>, reason: impl Into<String>) -> Result<Appeal> {
        let case_id = case_id.into();
        let dismissed = self
            .cases
            .read()
            .iter()
            .any(|c| c.id == case_id && c.status == CaseStatus::Dismissed);
        if dismissed {
            return Err(Error::InvalidInput(format!(
                "cannot open an appeal on dismissed case {case_id}"
            )));
        }

        let appeal = Appeal {
            id: Uuid::new_v4().to_string(),
            case_id,
            opened_by_agent_id: opened_by_agent_id.into(),
            reason: reason.into(),
            status: AppealStatus::Pending,
            resolution: None,
        };
        self.appeals.write().push(appeal.clone());
        Ok(appeal)
    }

    /// Resolving an appeal as `resolved` lifts any sanctions tied to its
    /// case that are still `active`.
    pub fn resolve_appeal(&self, appeal_id: &str, status: AppealStatus, resolution: Option<String>) -> Result<Appeal> {
        let case_id = {
            let mut appeals = self.appeals.write();
            let appeal = appeals
                .iter_mut()
                .find(|a| a.id == appeal_id)
                .ok_or_else(|| Error::NotFound(format!("appeal {appeal_id}")))?;
            appeal.status = status;
            appeal.resolution = resolution;
            appeal.case_id.clone()
        };

        if status == AppealStatus::Resolved {
            let mut sanctions = self.sanctions.write();
            for sanction in sanctions
                .iter_mut()
                .filter(|s| s.case_id == case_id && s.status == SanctionStatus::Active)
            {
                sanction.status = SanctionStatus::Lifted;
            }
        }

        let appeals = self.appeals.read();
        Ok(appeals.iter().find(|a| a.id == appeal_id).cloned().unwrap())
    }

    pub fn list_appeals(&self, filter: &AppealFilter) -> Vec<Appeal> {
        self.appeals
            .read()
            .iter()
            .filter(|a| {
                filter.case_id.as_ref().map(|id| &a.case_id == id).unwrap_or(true)
                    && filter.status.map(|s| a.status == s).unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governance() -> Governance {
        Governance::new(Arc::new(AuditLog::new()))
    }

    #[test]
    fn s1_rate_limit_sanction_scenario() {
        let gov = governance();
        let case = gov.open_case("agent-social", "policy-1", 0, "forum_post", vec!["second post within 5s".into()]);
        let sanction = gov.apply_sanction(&case.id, "agent-social", &SanctionTemplate::Warn);

        assert_eq!(case.status, CaseStatus::Open);
        assert_eq!(sanction.status, SanctionStatus::Active);
        assert_eq!(sanction.kind, SanctionKind::Warn);
        assert_eq!(
            gov.list_sanctions(&SanctionFilter {
                subject_agent_id: Some("agent-social".into()),
                status: Some(SanctionStatus::Active)
            })
            .len(),
            1
        );
    }

    #[test]
    fn s2_appeal_resolution_lifts_sanction() {
        let gov = governance();
        let case = gov.open_case("agent-social", "policy-1", 0, "forum_post", vec![]);
        gov.apply_sanction(&case.id, "agent-social", &SanctionTemplate::Warn);

        let appeal = gov
            .open_appeal(&case.id, "agent-social", "please reconsider")
            .unwrap();
        let resolved = gov
            .resolve_appeal(&appeal.id, AppealStatus::Resolved, Some("lifted".into()))
            .unwrap();

        assert_eq!(resolved.status, AppealStatus::Resolved);
        let sanctions = gov.list_sanctions(&SanctionFilter {
            subject_agent_id: Some("agent-social".into()),
            status: None,
        });
        assert!(sanctions.iter().all(|s| s.status == SanctionStatus::Lifted));
    }

    #[test]
    fn appeal_on_dismissed_case_fails() {
        let gov = governance();
        let case = gov.open_case("agent-1", "policy-1", 0, "action", vec![]);
        gov.resolve_case(&case.id, CaseStatus::Dismissed).unwrap();

        let result = gov.open_appeal(&case.id, "agent-1", "reason");
        assert!(result.is_err());
    }

    #[test]
    fn at_most_one_active_sanction_per_kind() {
        let gov = governance();
        let case = gov.open_case("agent-1", "policy-1", 0, "action", vec![]);
        let first = gov.apply_sanction(&case.id, "agent-1", &SanctionTemplate::Mute { duration_ms: 1000 });
        let second = gov.apply_sanction(&case.id, "agent-1", &SanctionTemplate::Mute { duration_ms: 2000 });

        let active: Vec<_> = gov
            .list_sanctions(&SanctionFilter {
                subject_agent_id: Some("agent-1".into()),
                status: Some(SanctionStatus::Active),
            });
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn ban_sanction_queues_pending_termination() {
        let gov = governance();
        let case = gov.open_case("agent-1", "policy-1", 0, "action", vec![]);
        gov.apply_sanction(&case.id, "agent-1", &SanctionTemplate::Ban);

        let pending = gov.drain_pending_bans();
        assert_eq!(pending, vec!["agent-1".to_string()]);
        assert!(gov.drain_pending_bans().is_empty());
    }

    #[test]
    fn sweep_expires_past_due_sanctions() {
        let gov = governance();
        let case = gov.open_case("agent-1", "policy-1", 0, "action", vec![]);
        gov.apply_sanction(&case.id, "agent-1", &SanctionTemplate::Mute { duration_ms: 0 });

        std::thread::sleep(std::time::Duration::from_millis(5));
        let swept = gov.sweep_expired_sanctions();
        assert_eq!(swept, 1);
        assert!(gov
            .active_sanction_kinds("agent-1")
            .is_empty());
    }

    #[test]
    fn mute_denies_forum_but_not_memory() {
        assert!(sanction_denies_category(SanctionKind::Mute, "forum"));
        assert!(!sanction_denies_category(SanctionKind::Mute, "memory"));
        assert!(sanction_denies_category(SanctionKind::Ban, "memory"));
    }
}
