//! Capability-based permission sandbox. Grants and revokes tokens, and
//! answers "may agent X do Y" checks by combining the agent's live tokens
//! with any active sanction held by [`Governance`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::audit::{AuditCategory, AuditEntryBuilder, Outcome};
use sa_domain::error::{Error, Result};
use sa_domain::permission::{ActionSet, CapabilityToken, CheckOutcome, Permission};
use sa_domain::trace::TraceEvent;
use uuid::Uuid;

use crate::audit_sink::AuditLog;
use crate::governance::{sanction_denies_category, Governance};

pub struct Sandbox {
    tokens: RwLock<HashMap<String, Vec<CapabilityToken>>>,
    governance: Arc<Governance>,
    audit: Arc<AuditLog>,
    enforce_permissions: bool,
}

impl Sandbox {
    pub fn new(governance: Arc<Governance>, audit: Arc<AuditLog>, enforce_permissions: bool) -> Self {
        Sandbox {
            tokens: RwLock::new(HashMap::new()),
            governance,
            audit,
            enforce_permissions,
        }
    }

    pub fn grant(
        &self,
        agent_id: impl Into<String>,
        permissions: Vec<Permission>,
        purpose: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CapabilityToken {
        let agent_id = agent_id.into();
        let token = CapabilityToken {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.clone(),
            permissions,
            purpose: purpose.clone(),
            issued_at: Utc::now(),
            expires_at,
            revoked: false,
        };
        self.tokens
            .write()
            .entry(agent_id.clone())
            .or_default()
            .push(token.clone());

        TraceEvent::CapabilityGranted {
            token_id: token.id.clone(),
            agent_id: agent_id.clone(),
            purpose,
        }
        .emit();
        self.audit.append(
            AuditEntryBuilder::new("capability.grant", AuditCategory::Permission, Outcome::Allow)
                .resource("capability_token", &token.id)
                .actor(&agent_id),
        );

        token
    }

    /// Grant a single `category.action` permission declared by a manifest's
    /// `required_capabilities` at spawn time. Refused (no token issued, but
    /// audited) when an active sanction on the agent already denies the
    /// category.
    pub fn request_capability(&self, agent_id: &str, category: &str, action: &str) -> Option<CapabilityToken> {
        for kind in self.governance.active_sanction_kinds(agent_id) {
            if sanction_denies_category(kind, category) {
                self.audit.append(
                    AuditEntryBuilder::new("capability.request_denied", AuditCategory::Permission, Outcome::Deny)
                        .resource(category, action)
                        .actor(agent_id)
                        .details(serde_json::json!({ "reason": format!("active {kind} sanction") })),
                );
                return None;
            }
        }
        Some(self.grant(
            agent_id.to_string(),
            vec![Permission {
                category: category.to_string(),
                actions: ActionSet::Named(vec![action.to_string()]),
                resource_pattern: None,
                constraints: None,
            }],
            Some(format!("declared capability {category}.{action}")),
            None,
        ))
    }

    pub fn revoke(&self, agent_id: &str, token_id: &str) -> Result<()> {
        let mut tokens = self.tokens.write();
        let agent_tokens = tokens
            .get_mut(agent_id)
            .ok_or_else(|| Error::NotFound(format!("no tokens for agent {agent_id}")))?;
        let token = agent_tokens
            .iter_mut()
            .find(|t| t.id == token_id)
            .ok_or_else(|| Error::NotFound(format!("capability token {token_id}")))?;
        token.revoked = true;

        TraceEvent::CapabilityRevoked {
            token_id: token_id.to_string(),
            agent_id: agent_id.to_string(),
        }
        .emit();
        self.audit.append(
            AuditEntryBuilder::new("capability.revoke", AuditCategory::Permission, Outcome::Allow)
                .resource("capability_token", token_id)
                .actor(agent_id),
        );
        Ok(())
    }

    pub fn revoke_all(&self, agent_id: &str) {
        if let Some(agent_tokens) = self.tokens.write().get_mut(agent_id) {
            for token in agent_tokens.iter_mut() {
                token.revoked = true;
            }
        }
        self.audit.append(
            AuditEntryBuilder::new("capability.revoke_all", AuditCategory::Permission, Outcome::Allow)
                .actor(agent_id),
        );
    }

    /// Live (non-revoked, non-expired) tokens, newest-issued first. `None`
    /// aggregates across every agent.
    pub fn list_tokens(&self, agent_id: Option<&str>) -> Vec<CapabilityToken> {
        let now = Utc::now();
        let tokens = self.tokens.read();
        let mut live: Vec<CapabilityToken> = match agent_id {
            Some(agent_id) => tokens
                .get(agent_id)
                .map(|v| v.as_slice())
                .unwrap_or(&[])
                .iter()
                .filter(|t| t.is_live(now))
                .cloned()
                .collect(),
            None => tokens
                .values()
                .flatten()
                .filter(|t| t.is_live(now))
                .cloned()
                .collect(),
        };
        live.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        live
    }

    /// Check whether `agent_id` may perform `action` in `category` against
    /// `resource`. Always appends a [`crate::audit_sink::AuditLog`] entry,
    /// allow or deny. When permission enforcement is disabled (development
    /// mode), every check is allowed but still audited.
    pub fn check(&self, agent_id: &str, category: &str, action: &str, resource: Option<&str>) -> CheckOutcome {
        let outcome = self.check_inner(agent_id, category, action, resource);

        TraceEvent::CapabilityChecked {
            agent_id: agent_id.to_string(),
            category: category.to_string(),
            action: action.to_string(),
            allowed: outcome.allowed,
            reason: outcome.reason.clone(),
        }
        .emit();
        self.audit.append(
            AuditEntryBuilder::new(
                "capability.check",
                AuditCategory::Permission,
                if outcome.allowed { Outcome::Allow } else { Outcome::Deny },
            )
            .resource(category, resource.unwrap_or(action))
            .actor(agent_id)
            .details(serde_json::json!({
                "action": action,
                "token_id": outcome.token_id,
                "reason": outcome.reason,
            })),
        );

        outcome
    }

    fn check_inner(&self, agent_id: &str, category: &str, action: &str, resource: Option<&str>) -> CheckOutcome {
        for kind in self.governance.active_sanction_kinds(agent_id) {
            if sanction_denies_category(kind, category) {
                return CheckOutcome {
                    allowed: false,
                    token_id: None,
                    reason: Some(format!("active {kind} sanction denies category {category}")),
                };
            }
        }

        if !self.enforce_permissions {
            return CheckOutcome {
                allowed: true,
                token_id: None,
                reason: Some("permission enforcement disabled".into()),
            };
        }

        let now = Utc::now();
        let tokens = self.tokens.read();
        let candidates = tokens.get(agent_id).map(|v| v.as_slice()).unwrap_or(&[]);

        // Ties across tokens (equal specificity) favor the most recently
        // issued token, per the capability sandbox's tie-break rule.
        let best = candidates
            .iter()
            .filter(|t| t.is_live(now))
            .filter_map(|t| t.narrowest_match(category, action, resource).map(|p| (t, p)))
            .min_by(|(t1, p1), (t2, p2)| p1.specificity().cmp(&p2.specificity()).then(t2.issued_at.cmp(&t1.issued_at)));

        match best {
            Some((token, _)) => CheckOutcome {
                allowed: true,
                token_id: Some(token.id.clone()),
                reason: None,
            },
            None => CheckOutcome {
                allowed: false,
                token_id: None,
                reason: Some(format!("no live token covers {category}.{action}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::permission::ActionSet;

    fn sandbox(enforce: bool) -> Sandbox {
        let audit = Arc::new(AuditLog::new());
        let governance = Arc::new(Governance::new(audit.clone()));
        Sandbox::new(governance, audit, enforce)
    }

    fn perm(category: &str, resource_pattern: Option<&str>) -> Permission {
        Permission {
            category: category.into(),
            actions: ActionSet::All,
            resource_pattern: resource_pattern.map(String::from),
            constraints: None,
        }
    }

    #[test]
    fn s5_capability_scoping_end_to_end() {
        let sandbox = sandbox(true);
        let token = sandbox.grant("agent-1", vec![perm("memory", Some("scratch.*"))], None, None);

        let allowed = sandbox.check("agent-1", "memory", "read", Some("scratch.1"));
        assert!(allowed.allowed);
        assert_eq!(allowed.token_id.as_deref(), Some(token.id.as_str()));

        let denied = sandbox.check("agent-1", "memory", "read", Some("private.1"));
        assert!(!denied.allowed);
    }

    #[test]
    fn revocation_blocks_subsequent_checks() {
        let sandbox = sandbox(true);
        let token = sandbox.grant("agent-1", vec![perm("forum", None)], None, None);
        sandbox.revoke("agent-1", &token.id).unwrap();

        let outcome = sandbox.check("agent-1", "forum", "post", None);
        assert!(!outcome.allowed);
    }

    #[test]
    fn disabled_enforcement_allows_but_still_audits() {
        let sandbox = sandbox(false);
        let outcome = sandbox.check("agent-1", "forum", "post", None);
        assert!(outcome.allowed);
        assert_eq!(sandbox.audit.list().len(), 1);
    }

    #[test]
    fn request_capability_grants_a_token_covering_the_declared_action() {
        let sandbox = sandbox(true);
        let token = sandbox.request_capability("agent-1", "memory", "read").unwrap();
        assert_eq!(token.agent_id, "agent-1");
        assert!(sandbox.check("agent-1", "memory", "read", None).allowed);
        assert!(!sandbox.check("agent-1", "memory", "write", None).allowed);
    }

    #[test]
    fn request_capability_refused_under_an_active_ban() {
        let sandbox = sandbox(true);
        let case = sandbox.governance.open_case("agent-1", "policy-1", 0, "abuse", vec![]);
        sandbox
            .governance
            .apply_sanction(&case.id, "agent-1", &sa_domain::policy::SanctionTemplate::Ban);

        assert!(sandbox.request_capability("agent-1", "memory", "read").is_none());
    }

    #[test]
    fn active_ban_sanction_denies_every_category() {
        let sandbox = sandbox(true);
        sandbox.grant("agent-1", vec![perm("memory", None)], None, None);
        let case = sandbox.governance.open_case("agent-1", "policy-1", 0, "abuse", vec![]);
        sandbox
            .governance
            .apply_sanction(&case.id, "agent-1", &sa_domain::policy::SanctionTemplate::Ban);

        let outcome = sandbox.check("agent-1", "memory", "read", None);
        assert!(!outcome.allowed);
    }

    #[test]
    fn specificity_tie_across_tokens_prefers_most_recently_issued() {
        let sandbox = sandbox(true);
        let older = sandbox.grant("agent-1", vec![perm("memory", Some("scratch.*"))], None, None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let newer = sandbox.grant("agent-1", vec![perm("memory", Some("scratch.*"))], None, None);

        let outcome = sandbox.check("agent-1", "memory", "read", Some("scratch.1"));
        assert_eq!(outcome.token_id.as_deref(), Some(newer.id.as_str()));
        assert_ne!(outcome.token_id.as_deref(), Some(older.id.as_str()));
    }

    #[test]
    fn list_tokens_excludes_revoked_and_sorts_newest_first() {
        let sandbox = sandbox(true);
        let first = sandbox.grant("agent-1", vec![perm("memory", None)], None, None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = sandbox.grant("agent-1", vec![perm("forum", None)], None, None);
        sandbox.revoke("agent-1", &first.id).unwrap();

        let tokens = sandbox.list_tokens(Some("agent-1"));
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].id, second.id);
    }

    #[test]
    fn list_tokens_with_no_agent_aggregates_across_agents() {
        let sandbox = sandbox(true);
        sandbox.grant("agent-1", vec![perm("memory", None)], None, None);
        sandbox.grant("agent-2", vec![perm("forum", None)], None, None);

        assert_eq!(sandbox.list_tokens(None).len(), 2);
    }

    #[test]
    fn active_mute_sanction_only_denies_forum() {
        let sandbox = sandbox(true);
        sandbox.grant("agent-1", vec![perm("forum", None), perm("memory", None)], None, None);
        let case = sandbox.governance.open_case("agent-1", "policy-1", 0, "spam", vec![]);
        sandbox.governance.apply_sanction(
            &case.id,
            "agent-1",
            &sa_domain::policy::SanctionTemplate::Mute { duration_ms: 60_000 },
        );

        assert!(!sandbox.check("agent-1", "forum", "post", None).allowed);
        assert!(sandbox.check("agent-1", "memory", "read", None).allowed);
    }
}
