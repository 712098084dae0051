use serde::Serialize;

/// Structured trace events emitted across the runtime. Each variant is the
/// audit sink's logging face; the durable [`crate::audit::AuditEntry`] is
/// the same event's data face.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AgentSpawned {
        agent_id: String,
        manifest_digest: String,
        restored_from_checkpoint: bool,
    },
    AgentStateChanged {
        agent_id: String,
        from: String,
        to: String,
        trigger: String,
        seq: u64,
    },
    AgentTerminated {
        agent_id: String,
        forced: bool,
    },
    CapabilityGranted {
        token_id: String,
        agent_id: String,
        purpose: Option<String>,
    },
    CapabilityRevoked {
        token_id: String,
        agent_id: String,
    },
    CapabilityChecked {
        agent_id: String,
        category: String,
        action: String,
        allowed: bool,
        reason: Option<String>,
    },
    PolicyViolation {
        policy_id: String,
        rule_index: usize,
        agent_id: String,
        decision: String,
    },
    SanctionApplied {
        sanction_id: String,
        subject_agent_id: String,
        kind: String,
    },
    SanctionExpired {
        sanction_id: String,
        subject_agent_id: String,
    },
    AppealResolved {
        appeal_id: String,
        case_id: String,
        status: String,
    },
    CircuitStateChanged {
        from: String,
        to: String,
        failure_count: u32,
    },
    JobRunCompleted {
        job_id: String,
        duration_ms: u64,
        outcome: String,
        overlap_skipped: bool,
    },
    CheckpointWritten {
        agent_id: String,
        bytes: usize,
    },
    CheckpointCorrupt {
        agent_id: String,
        reason: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "kernel_event");
    }
}
