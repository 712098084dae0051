//! Agent lifecycle state machine: the transition graph and its validation.
//!
//! Owning the live `Agent` record (and therefore the authority to mutate
//! `state`) belongs to the Lifecycle Manager; this module only knows the
//! graph and how to validate/apply one transition, returning the audit
//! record for the caller to append.

use chrono::{DateTime, Utc};
use sa_domain::agent::AgentState;
use sa_domain::error::{Error, Result};

/// Describes one state-transition attempt, recorded regardless of whether
/// it succeeds (the caller decides what to audit on failure).
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub agent_id: String,
    pub from: AgentState,
    pub to: AgentState,
    pub trigger: String,
    pub seq: u64,
    pub at: DateTime<Utc>,
}

/// Returns `true` iff `to` is reachable from `from` in one hop.
pub fn is_valid_transition(from: AgentState, to: AgentState) -> bool {
    use AgentState::*;
    matches!(
        (from, to),
        (Initializing, Ready)
            | (Initializing, Error)
            | (Initializing, Terminated)
            | (Ready, Running)
            | (Ready, Paused)
            | (Ready, Error)
            | (Ready, Terminated)
            | (Running, Ready)
            | (Running, Paused)
            | (Running, Error)
            | (Running, Terminated)
            | (Paused, Ready)
            | (Paused, Error)
            | (Paused, Terminated)
            | (Error, Ready)
            | (Error, Terminated)
    )
}

/// Validate and describe a transition. Does not mutate any state itself —
/// callers apply `to` to their own record only after this returns `Ok`.
pub fn transition(
    agent_id: &str,
    from: AgentState,
    to: AgentState,
    trigger: impl Into<String>,
    next_seq: u64,
    now: DateTime<Utc>,
) -> Result<TransitionRecord> {
    if !is_valid_transition(from, to) {
        return Err(Error::InvalidTransition(format!(
            "agent {agent_id}: {from} -> {to} is not a valid transition"
        )));
    }
    Ok(TransitionRecord {
        agent_id: agent_id.to_string(),
        from,
        to,
        trigger: trigger.into(),
        seq: next_seq,
        at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentState::*;

    #[test]
    fn initial_state_can_reach_ready_error_or_terminated() {
        assert!(is_valid_transition(Initializing, Ready));
        assert!(is_valid_transition(Initializing, Error));
        assert!(is_valid_transition(Initializing, Terminated));
        assert!(!is_valid_transition(Initializing, Running));
        assert!(!is_valid_transition(Initializing, Paused));
    }

    #[test]
    fn terminated_is_a_sink() {
        for state in [Initializing, Ready, Running, Paused, Error, Terminated] {
            assert!(!is_valid_transition(Terminated, state));
        }
    }

    #[test]
    fn running_and_ready_can_reach_each_other() {
        assert!(is_valid_transition(Ready, Running));
        assert!(is_valid_transition(Running, Ready));
    }

    #[test]
    fn invalid_transition_is_rejected_with_error_kind() {
        let err = transition("agent-1", Initializing, Running, "bad", 1, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "InvalidTransition");
    }

    #[test]
    fn valid_transition_produces_record() {
        let record = transition("agent-1", Ready, Running, "task_started", 3, Utc::now()).unwrap();
        assert_eq!(record.from, Ready);
        assert_eq!(record.to, Running);
        assert_eq!(record.seq, 3);
    }
}
