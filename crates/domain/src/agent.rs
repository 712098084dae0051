//! Agent and manifest types owned by the Lifecycle Manager.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared lifecycle state of an agent. See `sa_kernel::state_machine` for
/// the transition graph this type participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
    Terminated,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Terminated)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentState::Initializing => "initializing",
            AgentState::Ready => "ready",
            AgentState::Running => "running",
            AgentState::Paused => "paused",
            AgentState::Error => "error",
            AgentState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Immutable declaration loaded before spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub agent_id: String,
    pub name: String,
    pub version: String,
    /// Capability categories/actions this agent requires at spawn time,
    /// expressed as `category.action` strings (e.g. `"memory.read"`).
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Preferred model/role, resolved against `sa_providers::ProviderRegistry`.
    #[serde(default)]
    pub preferred_model: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Resource limits overriding process defaults.
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub policy_tags: Vec<String>,
    /// Hex-encoded signature over the canonical manifest digest, required
    /// when `REQUIRE_MANIFEST_SIGNATURE` is set.
    #[serde(default)]
    pub signature: Option<String>,
}

impl Manifest {
    /// SHA-256 digest over the manifest's stable fields, used to validate
    /// checkpoint compatibility on restore and (optionally) signatures.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.agent_id.as_bytes());
        hasher.update(self.name.as_bytes());
        hasher.update(self.version.as_bytes());
        for cap in &self.required_capabilities {
            hasher.update(cap.as_bytes());
        }
        for dep in &self.dependencies {
            hasher.update(dep.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Verify `self.signature` as an HMAC-SHA256 MAC over the manifest
    /// digest, keyed by `secret`. `false` when there is no signature to
    /// check, the hex decodes, or the MAC doesn't match.
    pub fn verify_signature(&self, secret: &str) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let Some(signature) = &self.signature else {
            return false;
        };
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(self.digest().as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_tokens_per_task: Option<u64>,
    pub max_cost_usd: Option<f64>,
    pub max_wall_time_ms: Option<u64>,
}

/// Cumulative resource consumption tracked per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub wall_time_ms: u64,
    /// Rough estimate of resident memory in bytes; not precise accounting.
    pub memory_estimate_bytes: u64,
}

impl ResourceUsage {
    pub fn add_tokens(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
    }
}

/// An addressable execution context hosted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub version: String,
    pub manifest: Manifest,
    pub state: AgentState,
    pub resource_usage: ResourceUsage,
    pub created_at: DateTime<Utc>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    /// Monotonic per-agent sequence number bumped on every state transition.
    #[serde(default)]
    pub transition_seq: u64,
    /// Free-form bag of user data carried through checkpoints.
    #[serde(default)]
    pub user_data: HashMap<String, serde_json::Value>,
}

impl Agent {
    pub fn new(manifest: Manifest, now: DateTime<Utc>) -> Self {
        Agent {
            id: manifest.agent_id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            manifest,
            state: AgentState::Initializing,
            resource_usage: ResourceUsage::default(),
            created_at: now,
            last_checkpoint: None,
            transition_seq: 0,
            user_data: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest {
            agent_id: "agent-1".into(),
            name: "tester".into(),
            version: "1.0.0".into(),
            required_capabilities: vec!["memory.read".into()],
            preferred_model: None,
            dependencies: vec![],
            resource_limits: ResourceLimits::default(),
            policy_tags: vec![],
            signature: None,
        }
    }

    #[test]
    fn digest_is_stable_for_identical_manifests() {
        let a = manifest();
        let b = manifest();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_changes_with_capabilities() {
        let a = manifest();
        let mut b = manifest();
        b.required_capabilities.push("memory.write".into());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn verify_signature_accepts_matching_hmac_and_rejects_tampering() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let mut m = manifest();
        let mut mac = Hmac::<Sha256>::new_from_slice(b"shared-secret").unwrap();
        mac.update(m.digest().as_bytes());
        m.signature = Some(hex::encode(mac.finalize().into_bytes()));

        assert!(m.verify_signature("shared-secret"));
        assert!(!m.verify_signature("wrong-secret"));

        m.required_capabilities.push("memory.write".into());
        assert!(!m.verify_signature("shared-secret"));
    }

    #[test]
    fn verify_signature_rejects_missing_signature() {
        assert!(!manifest().verify_signature("shared-secret"));
    }

    #[test]
    fn new_agent_starts_initializing() {
        let agent = Agent::new(manifest(), Utc::now());
        assert_eq!(agent.state, AgentState::Initializing);
        assert_eq!(agent.transition_seq, 0);
    }
}
