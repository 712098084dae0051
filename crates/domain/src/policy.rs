//! Policy and sanction-template types evaluated by the Policy Engine.

use serde::{Deserialize, Serialize};

/// A sanction template carried by a rule; applied by Governance when the
/// rule is violated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SanctionTemplate {
    Warn,
    Mute { duration_ms: u64 },
    Suspend { duration_ms: u64 },
    Ban,
}

impl SanctionTemplate {
    pub fn kind(&self) -> SanctionKind {
        match self {
            SanctionTemplate::Warn => SanctionKind::Warn,
            SanctionTemplate::Mute { .. } => SanctionKind::Mute,
            SanctionTemplate::Suspend { .. } => SanctionKind::Suspend,
            SanctionTemplate::Ban => SanctionKind::Ban,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            SanctionTemplate::Mute { duration_ms } | SanctionTemplate::Suspend { duration_ms } => {
                Some(*duration_ms)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanctionKind {
    Warn,
    Mute,
    Suspend,
    Ban,
}

impl std::fmt::Display for SanctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SanctionKind::Warn => "warn",
            SanctionKind::Mute => "mute",
            SanctionKind::Suspend => "suspend",
            SanctionKind::Ban => "ban",
        };
        f.write_str(s)
    }
}

/// One rule within a [`Policy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    RateLimit {
        action: String,
        window_seconds: u64,
        max_count: u32,
        sanction: SanctionTemplate,
    },
    Content {
        action: String,
        forbidden_patterns: Vec<String>,
        sanction: SanctionTemplate,
    },
    Quota {
        action: String,
        period_seconds: u64,
        max_bytes: u64,
        sanction: SanctionTemplate,
    },
}

impl Rule {
    pub fn action(&self) -> &str {
        match self {
            Rule::RateLimit { action, .. } => action,
            Rule::Content { action, .. } => action,
            Rule::Quota { action, .. } => action,
        }
    }

    pub fn sanction(&self) -> &SanctionTemplate {
        match self {
            Rule::RateLimit { sanction, .. } => sanction,
            Rule::Content { sanction, .. } => sanction,
            Rule::Quota { sanction, .. } => sanction,
        }
    }
}

/// `{id, name, enabled, rules[]}`. Rules are evaluated in declaration
/// order (`Vec` index order); see `sa_kernel::policy` for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub rules: Vec<Rule>,
}

/// The decision returned by `PolicyEngine::evaluate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

/// A single rule violation surfaced by `evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub policy_id: String,
    pub rule_index: usize,
    pub action: String,
    pub decision: Decision,
    pub sanction: Option<SanctionTemplate>,
    pub detail: String,
}

/// The full result of `PolicyEngine::evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub decision: Decision,
    pub violations: Vec<Violation>,
}
