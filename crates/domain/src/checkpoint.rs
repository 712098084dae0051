//! Checkpoint snapshot type shared by both persistence store implementations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::agent::{AgentState, ResourceUsage};

/// A versioned snapshot of an agent's persisted state.
///
/// `checksum` is computed over the canonical (field-order-stable) JSON
/// serialization of every other field and is verified on load; a mismatch
/// is surfaced as [`crate::error::Error::Corrupt`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub checkpoint_version: u32,
    pub agent_id: String,
    pub state: AgentState,
    pub resource_usage: ResourceUsage,
    pub manifest_digest: String,
    #[serde(default)]
    pub user_data: HashMap<String, serde_json::Value>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// The subset of [`Checkpoint`] that participates in the checksum, kept as
/// a separate type so field order in the checksum input can never drift
/// from what gets serialized as the real record.
#[derive(Serialize)]
struct ChecksumInput<'a> {
    checkpoint_version: u32,
    agent_id: &'a str,
    state: AgentState,
    resource_usage: &'a ResourceUsage,
    manifest_digest: &'a str,
    user_data: &'a HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
}

pub const CHECKPOINT_VERSION: u32 = 1;

impl Checkpoint {
    pub fn new(
        agent_id: String,
        state: AgentState,
        resource_usage: ResourceUsage,
        manifest_digest: String,
        user_data: HashMap<String, serde_json::Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let checksum = compute_checksum(&ChecksumInput {
            checkpoint_version: CHECKPOINT_VERSION,
            agent_id: &agent_id,
            state,
            resource_usage: &resource_usage,
            manifest_digest: &manifest_digest,
            user_data: &user_data,
            created_at,
        });

        Checkpoint {
            checkpoint_version: CHECKPOINT_VERSION,
            agent_id,
            state,
            resource_usage,
            manifest_digest,
            user_data,
            checksum,
            created_at,
        }
    }

    /// Recompute the checksum over this record's fields and compare against
    /// the stored value.
    pub fn verify(&self) -> bool {
        let expected = compute_checksum(&ChecksumInput {
            checkpoint_version: self.checkpoint_version,
            agent_id: &self.agent_id,
            state: self.state,
            resource_usage: &self.resource_usage,
            manifest_digest: &self.manifest_digest,
            user_data: &self.user_data,
            created_at: self.created_at,
        });
        expected == self.checksum
    }
}

fn compute_checksum(input: &ChecksumInput<'_>) -> String {
    let canonical =
        serde_json::to_vec(input).expect("checksum input types always serialize");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies() {
        let ckpt = Checkpoint::new(
            "agent-1".into(),
            AgentState::Ready,
            ResourceUsage {
                input_tokens: 123,
                ..Default::default()
            },
            "digest".into(),
            HashMap::new(),
            Utc::now(),
        );
        assert!(ckpt.verify());

        let serialized = serde_json::to_string(&ckpt).unwrap();
        let deserialized: Checkpoint = serde_json::from_str(&serialized).unwrap();
        assert_eq!(ckpt, deserialized);
        assert!(deserialized.verify());
    }

    #[test]
    fn tampered_field_fails_verification() {
        let mut ckpt = Checkpoint::new(
            "agent-1".into(),
            AgentState::Ready,
            ResourceUsage::default(),
            "digest".into(),
            HashMap::new(),
            Utc::now(),
        );
        ckpt.resource_usage.input_tokens = 999;
        assert!(!ckpt.verify());
    }
}
