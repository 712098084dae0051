//! Capability-based permission types owned by the Sandbox.
//!
//! Not to be confused with [`crate::capability::LlmCapabilities`], which
//! describes what an LLM model supports. These types describe what an
//! *agent* is authorized to do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A coarse permission bucket.
pub type Category = String;

/// Either a concrete set of actions or the wildcard `*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSet {
    All,
    Named(Vec<String>),
}

impl ActionSet {
    pub fn allows(&self, action: &str) -> bool {
        match self {
            ActionSet::All => true,
            ActionSet::Named(actions) => actions.iter().any(|a| a == action || a == "*"),
        }
    }
}

/// Optional rate/byte constraints attached to a permission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    pub max_calls_per_window: Option<u32>,
    pub window_ms: Option<u64>,
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub allow_list: Vec<String>,
    #[serde(default)]
    pub deny_list: Vec<String>,
}

/// `(category, actionSet, resourcePattern?, constraints?)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub category: Category,
    pub actions: ActionSet,
    /// Glob pattern over resource ids, e.g. `"forum.thread.*"`. `None`
    /// matches any resource.
    #[serde(default)]
    pub resource_pattern: Option<String>,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

impl Permission {
    /// A capability string is `category.action` or `category.action:resource`.
    pub fn covers(&self, category: &str, action: &str, resource: Option<&str>) -> bool {
        if self.category != category {
            return false;
        }
        if !self.actions.allows(action) {
            return false;
        }
        match (&self.resource_pattern, resource) {
            (None, _) => true,
            (Some(pattern), Some(resource)) => glob_match(pattern, resource),
            (Some(_), None) => false,
        }
    }

    /// A coarse specificity score: a resource-scoped permission is narrower
    /// (lower score) than an unscoped one, and a literal pattern narrower
    /// than a wildcard-laden one. Used to pick the "narrowest match wins"
    /// tie-break in `Sandbox::check`.
    pub fn specificity(&self) -> u32 {
        match &self.resource_pattern {
            None => 1000,
            Some(pattern) => pattern.chars().filter(|c| *c == '*').count() as u32 * 10
                + (1000 - pattern.len().min(999) as u32),
        }
    }
}

/// Minimal glob matcher supporting `*` (any run of characters, no segment
/// boundary) used for resource patterns. Dot-separated `*`/`**` channel
/// globbing lives separately in `sa_kernel::event_bus`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                helper(&p[1..], t) || (!t.is_empty() && helper(p, &t[1..]))
            }
            (Some(pc), Some(tc)) if pc == tc => helper(&p[1..], &t[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}

/// Ownership-shared between the issuing Sandbox and the holding Agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub id: String,
    pub agent_id: String,
    pub permissions: Vec<Permission>,
    pub purpose: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl CapabilityToken {
    /// A token is honored iff not revoked AND (no expiry OR expiry in the
    /// future) AND every required action appears in its permission set.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }

    pub fn covers(&self, category: &str, action: &str, resource: Option<&str>) -> bool {
        self.permissions
            .iter()
            .any(|p| p.covers(category, action, resource))
    }

    /// The narrowest permission on this token that covers the capability,
    /// used for the "narrowest match wins" disambiguation across tokens.
    /// Permissions carry no timestamp of their own, so a specificity tie is
    /// broken by declaration order: the permission added last to this
    /// token's list wins, iterating in reverse before `min_by_key` (which
    /// keeps the first minimal element on ties).
    pub fn narrowest_match(&self, category: &str, action: &str, resource: Option<&str>) -> Option<&Permission> {
        self.permissions
            .iter()
            .rev()
            .filter(|p| p.covers(category, action, resource))
            .min_by_key(|p| p.specificity())
    }
}

/// The outcome of `Sandbox::check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub allowed: bool,
    pub token_id: Option<String>,
    pub reason: Option<String>,
}
