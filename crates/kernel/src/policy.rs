//! Policy Engine: evaluates an action against a set of [`Policy`] definitions
//! and reports the combined decision, opening a moderation case through
//! [`Governance`] for every violation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use sa_domain::policy::{Decision, EvaluationResult, Policy, Rule, SanctionKind, SanctionTemplate, Violation};
use sa_domain::trace::TraceEvent;

use crate::governance::Governance;

#[derive(Default)]
struct RateState {
    /// Timestamps of recent occurrences within the rule's window, oldest first.
    hits: VecDeque<DateTime<Utc>>,
}

#[derive(Default)]
struct QuotaState {
    /// Bytes consumed so far within the current period.
    bytes: u64,
    period_started_at: Option<DateTime<Utc>>,
}

pub struct PolicyEngine {
    policies: RwLock<Vec<Policy>>,
    rate_state: RwLock<HashMap<(String, usize), RateState>>,
    quota_state: RwLock<HashMap<(String, usize), QuotaState>>,
    governance: Arc<Governance>,
}

impl PolicyEngine {
    pub fn new(governance: Arc<Governance>) -> Self {
        PolicyEngine {
            policies: RwLock::new(Vec::new()),
            rate_state: RwLock::new(HashMap::new()),
            quota_state: RwLock::new(HashMap::new()),
            governance,
        }
    }

    pub fn add_policy(&self, policy: Policy) {
        self.policies.write().push(policy);
    }

    pub fn remove_policy(&self, policy_id: &str) {
        self.policies.write().retain(|p| p.id != policy_id);
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.policies.read().clone()
    }

    /// An engine with no enabled policies can never raise a violation —
    /// every `evaluate` call trivially returns `allow`. Used by the
    /// production hardening gate to refuse a policy engine that would be
    /// permissive by construction.
    pub fn is_permissive(&self) -> bool {
        !self.policies.read().iter().any(|p| p.enabled)
    }

    /// Evaluate `action` performed by `agent_id` against every enabled
    /// policy's rules, in declaration order. All violations are collected;
    /// the overall decision is the worst one seen (`block` > `warn` >
    /// `allow`). Every violation opens a moderation case and applies its
    /// rule's sanction template.
    pub fn evaluate(&self, agent_id: &str, action: &str, content: Option<&str>, bytes: u64) -> EvaluationResult {
        let now = Utc::now();
        let mut violations = Vec::new();

        let policies = self.policies.read().clone();
        for policy in policies.iter().filter(|p| p.enabled) {
            for (rule_index, rule) in policy.rules.iter().enumerate() {
                if rule.action() != action {
                    continue;
                }
                if let Some(violation) = self.evaluate_rule(policy, rule_index, rule, agent_id, content, bytes, now) {
                    violations.push(violation);
                }
            }
        }

        let decision = violations
            .iter()
            .map(|v| v.decision)
            .max()
            .unwrap_or(Decision::Allow);

        for violation in &violations {
            TraceEvent::PolicyViolation {
                policy_id: violation.policy_id.clone(),
                rule_index: violation.rule_index,
                agent_id: agent_id.to_string(),
                decision: format!("{:?}", violation.decision).to_lowercase(),
            }
            .emit();

            let case = self.governance.open_case(
                agent_id,
                &violation.policy_id,
                violation.rule_index,
                action,
                vec![violation.detail.clone()],
            );
            if let Some(sanction) = &violation.sanction {
                self.governance.apply_sanction(&case.id, agent_id, sanction);
            }
        }

        EvaluationResult { decision, violations }
    }

    /// A rule's own sanction template decides the violation's severity:
    /// `warn` sanctions only warn, anything with teeth (`mute`, `suspend`,
    /// `ban`) blocks.
    fn decision_for(sanction: &SanctionTemplate) -> Decision {
        match sanction.kind() {
            SanctionKind::Warn => Decision::Warn,
            SanctionKind::Mute | SanctionKind::Suspend | SanctionKind::Ban => Decision::Block,
        }
    }

    fn evaluate_rule(
        &self,
        policy: &Policy,
        rule_index: usize,
        rule: &Rule,
        agent_id: &str,
        content: Option<&str>,
        bytes: u64,
        now: DateTime<Utc>,
    ) -> Option<Violation> {
        match rule {
            Rule::RateLimit {
                window_seconds,
                max_count,
                sanction,
                ..
            } => {
                let key = (agent_id.to_string(), rule_index);
                let mut states = self.rate_state.write();
                let state = states.entry(key).or_default();
                state.hits.push_back(now);
                let window = chrono::Duration::seconds(*window_seconds as i64);
                while let Some(&oldest) = state.hits.front() {
                    if now - oldest > window {
                        state.hits.pop_front();
                    } else {
                        break;
                    }
                }
                if state.hits.len() as u32 > *max_count {
                    Some(Violation {
                        policy_id: policy.id.clone(),
                        rule_index,
                        action: rule.action().to_string(),
                        decision: Self::decision_for(sanction),
                        sanction: Some(sanction.clone()),
                        detail: format!(
                            "{} occurrences of {} within {}s exceeds max {}",
                            state.hits.len(),
                            rule.action(),
                            window_seconds,
                            max_count
                        ),
                    })
                } else {
                    None
                }
            }
            Rule::Content {
                forbidden_patterns,
                sanction,
                ..
            } => {
                let content = content?;
                for pattern in forbidden_patterns {
                    let matched = Regex::new(pattern)
                        .map(|re| re.is_match(content))
                        .unwrap_or(false);
                    if matched {
                        return Some(Violation {
                            policy_id: policy.id.clone(),
                            rule_index,
                            action: rule.action().to_string(),
                            decision: Self::decision_for(sanction),
                            sanction: Some(sanction.clone()),
                            detail: format!("content matched forbidden pattern {pattern}"),
                        });
                    }
                }
                None
            }
            Rule::Quota {
                period_seconds,
                max_bytes,
                sanction,
                ..
            } => {
                let key = (agent_id.to_string(), rule_index);
                let mut states = self.quota_state.write();
                let state = states.entry(key).or_default();
                let period = chrono::Duration::seconds(*period_seconds as i64);
                let expired = state
                    .period_started_at
                    .map(|start| now - start > period)
                    .unwrap_or(true);
                if expired {
                    state.period_started_at = Some(now);
                    state.bytes = 0;
                }
                state.bytes += bytes;
                if state.bytes > *max_bytes {
                    Some(Violation {
                        policy_id: policy.id.clone(),
                        rule_index,
                        action: rule.action().to_string(),
                        decision: Self::decision_for(sanction),
                        sanction: Some(sanction.clone()),
                        detail: format!(
                            "{} bytes within {}s exceeds quota {}",
                            state.bytes, period_seconds, max_bytes
                        ),
                    })
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_sink::AuditLog;
    use sa_domain::policy::SanctionTemplate;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(Arc::new(Governance::new(Arc::new(AuditLog::new()))))
    }

    fn policy_with(rule: Rule) -> Policy {
        Policy {
            id: "policy-1".into(),
            name: "test policy".into(),
            enabled: true,
            rules: vec![rule],
        }
    }

    #[test]
    fn rate_limit_rule_blocks_after_threshold() {
        let engine = engine();
        engine.add_policy(policy_with(Rule::RateLimit {
            action: "forum_post".into(),
            window_seconds: 5,
            max_count: 1,
            sanction: SanctionTemplate::Warn,
        }));

        let first = engine.evaluate("agent-1", "forum_post", None, 0);
        assert_eq!(first.decision, Decision::Allow);
        let second = engine.evaluate("agent-1", "forum_post", None, 0);
        assert_eq!(second.decision, Decision::Warn);
    }

    #[test]
    fn rate_limit_rule_blocks_when_sanction_has_teeth() {
        let engine = engine();
        engine.add_policy(policy_with(Rule::RateLimit {
            action: "forum_post".into(),
            window_seconds: 5,
            max_count: 1,
            sanction: SanctionTemplate::Suspend { duration_ms: 60_000 },
        }));

        engine.evaluate("agent-1", "forum_post", None, 0);
        let second = engine.evaluate("agent-1", "forum_post", None, 0);
        assert_eq!(second.decision, Decision::Block);
    }

    #[test]
    fn content_rule_warns_on_forbidden_pattern() {
        let engine = engine();
        engine.add_policy(policy_with(Rule::Content {
            action: "forum_post".into(),
            forbidden_patterns: vec!["spam".into()],
            sanction: SanctionTemplate::Warn,
        }));

        let result = engine.evaluate("agent-1", "forum_post", Some("totally not spam"), 0);
        assert_eq!(result.decision, Decision::Warn);
    }

    #[test]
    fn quota_rule_blocks_once_period_total_exceeds_max() {
        let engine = engine();
        engine.add_policy(policy_with(Rule::Quota {
            action: "upload".into(),
            period_seconds: 60,
            max_bytes: 100,
            sanction: SanctionTemplate::Warn,
        }));

        assert_eq!(engine.evaluate("agent-1", "upload", None, 60).decision, Decision::Allow);
        assert_eq!(engine.evaluate("agent-1", "upload", None, 60).decision, Decision::Warn);
    }

    #[test]
    fn decision_is_worst_across_multiple_violated_rules() {
        let engine = engine();
        engine.add_policy(Policy {
            id: "policy-2".into(),
            name: "multi".into(),
            enabled: true,
            rules: vec![
                Rule::Content {
                    action: "forum_post".into(),
                    forbidden_patterns: vec!["bad".into()],
                    sanction: SanctionTemplate::Warn,
                },
                Rule::RateLimit {
                    action: "forum_post".into(),
                    window_seconds: 5,
                    max_count: 0,
                    sanction: SanctionTemplate::Suspend { duration_ms: 1000 },
                },
            ],
        });

        let result = engine.evaluate("agent-1", "forum_post", Some("bad content"), 0);
        assert_eq!(result.decision, Decision::Block);
        assert_eq!(result.violations.len(), 2);
    }

    #[test]
    fn is_permissive_until_an_enabled_policy_exists() {
        let engine = engine();
        assert!(engine.is_permissive());

        let mut policy = policy_with(Rule::RateLimit {
            action: "forum_post".into(),
            window_seconds: 5,
            max_count: 1,
            sanction: SanctionTemplate::Warn,
        });
        policy.enabled = false;
        engine.add_policy(policy);
        assert!(engine.is_permissive());

        engine.add_policy(policy_with(Rule::RateLimit {
            action: "upload".into(),
            window_seconds: 5,
            max_count: 1,
            sanction: SanctionTemplate::Warn,
        }));
        assert!(!engine.is_permissive());
    }

    #[test]
    fn disabled_policy_is_skipped() {
        let engine = engine();
        let mut policy = policy_with(Rule::RateLimit {
            action: "forum_post".into(),
            window_seconds: 5,
            max_count: 0,
            sanction: SanctionTemplate::Warn,
        });
        policy.enabled = false;
        engine.add_policy(policy);

        assert_eq!(engine.evaluate("agent-1", "forum_post", None, 0).decision, Decision::Allow);
    }
}
