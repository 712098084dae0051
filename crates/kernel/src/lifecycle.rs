//! Lifecycle Manager: owns the live `Agent` table, drives its state
//! machine, and serializes task execution per agent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock as SyncRwLock;
use sa_domain::agent::{Agent, AgentState, Manifest};
use sa_domain::audit::{AuditCategory, AuditEntryBuilder, Outcome};
use sa_domain::checkpoint::Checkpoint;
use sa_domain::config::ManifestSigningConfig;
use sa_domain::error::{Error, Result};
use sa_domain::trace::TraceEvent;
use tokio::sync::Mutex as AsyncMutex;

use crate::audit_sink::AuditLog;
use crate::event_bus::{new_event, EventBus};
use crate::persistence::PersistenceManager;
use crate::sandbox::Sandbox;
use crate::state_machine;

/// Per-agent execution lock: a `task()` call holds this for its whole
/// duration so two tasks for the same agent never interleave.
type Mailbox = Arc<AsyncMutex<()>>;

pub struct LifecycleManager {
    agents: SyncRwLock<HashMap<String, Arc<SyncRwLock<Agent>>>>,
    mailboxes: SyncRwLock<HashMap<String, Mailbox>>,
    persistence: Arc<PersistenceManager>,
    sandbox: Arc<Sandbox>,
    audit: Arc<AuditLog>,
    event_bus: Arc<EventBus>,
    manifest_signing: ManifestSigningConfig,
}

impl LifecycleManager {
    pub fn new(
        persistence: Arc<PersistenceManager>,
        sandbox: Arc<Sandbox>,
        audit: Arc<AuditLog>,
        event_bus: Arc<EventBus>,
        manifest_signing: ManifestSigningConfig,
    ) -> Self {
        LifecycleManager {
            agents: SyncRwLock::new(HashMap::new()),
            mailboxes: SyncRwLock::new(HashMap::new()),
            persistence,
            sandbox,
            audit,
            event_bus,
            manifest_signing,
        }
    }

    /// Enumerate persisted checkpoints and reconstruct an in-memory `Agent`
    /// record for each, landing successfully-restored agents in `ready`
    /// and emitting `recovered` on the event bus. A checkpoint that fails
    /// to restore (missing manifest, corrupt record already filtered by
    /// [`PersistenceManager`]) lands its agent in `error` instead of
    /// aborting the whole recovery pass.
    pub async fn recover(&self, manifests: &HashMap<String, Manifest>) -> Result<usize> {
        let checkpoints = self.persistence.list().await?;
        let mut restored = 0;

        for checkpoint in checkpoints {
            let agent_id = checkpoint.agent_id.clone();
            let Some(manifest) = manifests.get(&agent_id) else {
                tracing::warn!(agent_id = %agent_id, "checkpoint found with no matching manifest, skipping");
                continue;
            };

            let agent = self.reconstruct(manifest.clone(), &checkpoint);
            let restored_ok = agent.state == AgentState::Ready;
            self.agents
                .write()
                .insert(agent_id.clone(), Arc::new(SyncRwLock::new(agent)));

            if restored_ok {
                restored += 1;
            }

            TraceEvent::AgentSpawned {
                agent_id: agent_id.clone(),
                manifest_digest: manifest.digest(),
                restored_from_checkpoint: true,
            }
            .emit();
            self.event_bus.publish(
                "agent.recovered",
                new_event(
                    "agent.recovered",
                    serde_json::json!({ "agent_id": agent_id, "restored": restored_ok }),
                ),
            );
        }

        Ok(restored)
    }

    fn reconstruct(&self, manifest: Manifest, checkpoint: &Checkpoint) -> Agent {
        let mut agent = Agent::new(manifest.clone(), checkpoint.created_at);
        if checkpoint.manifest_digest != manifest.digest() {
            agent.state = AgentState::Error;
            return agent;
        }
        agent.resource_usage = checkpoint.resource_usage.clone();
        agent.user_data = checkpoint.user_data.clone();
        agent.last_checkpoint = Some(checkpoint.created_at);
        agent.state = AgentState::Ready;
        agent.transition_seq = 1;
        agent
    }

    /// Spawn a brand new agent from `manifest`. Fails if an agent with the
    /// same id is already registered.
    pub async fn spawn(&self, manifest: Manifest) -> Result<Agent> {
        let agent_id = manifest.agent_id.clone();
        if self.agents.read().contains_key(&agent_id) {
            return Err(Error::InvalidInput(format!("agent {agent_id} already spawned")));
        }

        if self.manifest_signing.require_signature {
            let secret = self.manifest_signing.signing_secret.as_deref().unwrap_or("");
            if !manifest.verify_signature(secret) {
                self.audit.append(
                    AuditEntryBuilder::new("agent.spawn_denied", AuditCategory::Lifecycle, Outcome::Deny)
                        .resource("agent", &agent_id)
                        .actor(&agent_id)
                        .details(serde_json::json!({ "reason": "manifest signature missing or invalid" })),
                );
                return Err(Error::PermissionDenied(format!(
                    "manifest signature missing or invalid for agent {agent_id}"
                )));
            }
        }

        let now = Utc::now();
        let mut agent = Agent::new(manifest.clone(), now);
        let record = state_machine::transition(&agent_id, agent.state, AgentState::Ready, "spawn", 1, now)?;
        agent.state = record.to;
        agent.transition_seq = record.seq;

        self.agents
            .write()
            .insert(agent_id.clone(), Arc::new(SyncRwLock::new(agent.clone())));
        self.mailboxes
            .write()
            .insert(agent_id.clone(), Arc::new(AsyncMutex::new(())));

        for capability in &manifest.required_capabilities {
            match capability.split_once('.') {
                Some((category, action)) => {
                    if self.sandbox.request_capability(&agent_id, category, action).is_none() {
                        tracing::warn!(
                            agent_id = %agent_id,
                            capability = %capability,
                            "declared capability refused at spawn"
                        );
                    }
                }
                None => tracing::warn!(
                    agent_id = %agent_id,
                    capability = %capability,
                    "malformed capability string, expected category.action"
                ),
            }
        }

        self.checkpoint(&agent_id).await?;

        TraceEvent::AgentSpawned {
            agent_id: agent_id.clone(),
            manifest_digest: manifest.digest(),
            restored_from_checkpoint: false,
        }
        .emit();
        self.audit.append(
            AuditEntryBuilder::new("agent.spawn", AuditCategory::Lifecycle, Outcome::Allow)
                .resource("agent", &agent_id)
                .actor(&agent_id),
        );
        self.event_bus.publish(
            "agent.spawned",
            new_event("agent.spawned", serde_json::json!({ "agent_id": agent_id })),
        );

        Ok(agent)
    }

    fn handle_of(&self, agent_id: &str) -> Result<Arc<SyncRwLock<Agent>>> {
        self.agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))
    }

    fn mailbox_of(&self, agent_id: &str) -> Mailbox {
        self.mailboxes
            .write()
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Run one unit of work for `agent_id`, serialized against any other
    /// `task` call for the same agent. Transitions `ready -> running`
    /// before invoking `work` and `running -> ready` after, regardless of
    /// whether `work` succeeds; a failing `work` instead lands the agent
    /// in `error`.
    pub async fn task<F, Fut>(&self, agent_id: &str, work: F) -> Result<()>
    where
        F: FnOnce(Agent) -> Fut,
        Fut: std::future::Future<Output = Result<Agent>>,
    {
        let mailbox = self.mailbox_of(agent_id);
        let _guard = mailbox.lock().await;

        let handle = self.handle_of(agent_id)?;
        let before = handle.read().clone();
        self.apply_transition(agent_id, AgentState::Running, "task_started")?;

        let result = work(before).await;

        match result {
            Ok(updated) => {
                *handle.write() = updated;
                self.apply_transition(agent_id, AgentState::Ready, "task_completed")?;
                self.checkpoint(agent_id).await?;
                Ok(())
            }
            Err(err) => {
                self.apply_transition(agent_id, AgentState::Error, "task_failed")?;
                Err(err)
            }
        }
    }

    pub fn pause(&self, agent_id: &str) -> Result<()> {
        self.apply_transition(agent_id, AgentState::Paused, "paused")
    }

    pub fn resume(&self, agent_id: &str) -> Result<()> {
        self.apply_transition(agent_id, AgentState::Ready, "resumed")
    }

    /// Terminate an agent. `forced` distinguishes a ban-driven or
    /// grace-period-exceeded termination from a voluntary one, for audit.
    pub async fn terminate(&self, agent_id: &str, forced: bool) -> Result<()> {
        self.apply_transition(agent_id, AgentState::Terminated, if forced { "forced_terminate" } else { "terminate" })?;
        self.sandbox.revoke_all(agent_id);

        TraceEvent::AgentTerminated {
            agent_id: agent_id.to_string(),
            forced,
        }
        .emit();
        self.audit.append(
            AuditEntryBuilder::new("agent.terminate", AuditCategory::Lifecycle, Outcome::Allow)
                .resource("agent", agent_id)
                .actor(agent_id)
                .details(serde_json::json!({ "forced": forced })),
        );
        self.event_bus.publish(
            "agent.terminated",
            new_event("agent.terminated", serde_json::json!({ "agent_id": agent_id, "forced": forced })),
        );

        Ok(())
    }

    /// Terminate every agent named by a drained `pending_bans` queue.
    /// Intended to run as a scheduler job alongside the sanction sweep.
    pub async fn enforce_pending_bans(&self, agent_ids: Vec<String>) {
        for agent_id in agent_ids {
            if let Err(err) = self.terminate(&agent_id, true).await {
                tracing::warn!(agent_id = %agent_id, error = %err, "failed to enforce ban termination");
            }
        }
    }

    fn apply_transition(&self, agent_id: &str, to: AgentState, trigger: &str) -> Result<()> {
        let handle = self.handle_of(agent_id)?;
        let (from, seq) = {
            let agent = handle.read();
            (agent.state, agent.transition_seq + 1)
        };
        let record = state_machine::transition(agent_id, from, to, trigger, seq, Utc::now())?;
        {
            let mut agent = handle.write();
            agent.state = record.to;
            agent.transition_seq = record.seq;
        }
        TraceEvent::AgentStateChanged {
            agent_id: agent_id.to_string(),
            from: record.from.to_string(),
            to: record.to.to_string(),
            trigger: record.trigger,
            seq: record.seq,
        }
        .emit();
        Ok(())
    }

    async fn checkpoint(&self, agent_id: &str) -> Result<()> {
        let handle = self.handle_of(agent_id)?;
        let agent = handle.read().clone();
        let checkpoint = Checkpoint::new(
            agent.id.clone(),
            agent.state,
            agent.resource_usage.clone(),
            agent.manifest.digest(),
            agent.user_data.clone(),
            Utc::now(),
        );
        self.persistence.save(checkpoint).await?;
        handle.write().last_checkpoint = Some(Utc::now());
        Ok(())
    }

    pub fn agent(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().get(agent_id).map(|h| h.read().clone())
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.agents.read().values().map(|h| h.read().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::governance::Governance;
    use crate::persistence::MemoryCheckpointStore;
    use sa_domain::agent::ResourceLimits;
    use sa_domain::config::CircuitBreakerConfig;

    fn manifest(agent_id: &str) -> Manifest {
        Manifest {
            agent_id: agent_id.into(),
            name: "tester".into(),
            version: "1.0.0".into(),
            required_capabilities: vec![],
            preferred_model: None,
            dependencies: vec![],
            resource_limits: ResourceLimits::default(),
            policy_tags: vec![],
            signature: None,
        }
    }

    fn manager() -> LifecycleManager {
        let audit = Arc::new(AuditLog::new());
        let governance = Arc::new(Governance::new(audit.clone()));
        let sandbox = Arc::new(Sandbox::new(governance, audit.clone(), true));
        let persistence = Arc::new(PersistenceManager::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        ));
        LifecycleManager::new(
            persistence,
            sandbox,
            audit,
            Arc::new(EventBus::new()),
            sa_domain::config::ManifestSigningConfig::default(),
        )
    }

    #[tokio::test]
    async fn spawn_lands_agent_in_ready_and_checkpoints() {
        let manager = manager();
        let agent = manager.spawn(manifest("agent-1")).await.unwrap();
        assert_eq!(agent.state, AgentState::Ready);
        assert!(manager.persistence.load("agent-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn spawning_duplicate_id_fails() {
        let manager = manager();
        manager.spawn(manifest("agent-1")).await.unwrap();
        let result = manager.spawn(manifest("agent-1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn task_round_trips_through_running_back_to_ready() {
        let manager = manager();
        manager.spawn(manifest("agent-1")).await.unwrap();

        manager
            .task("agent-1", |mut agent| async move {
                agent.resource_usage.add_tokens(10, 20);
                Ok(agent)
            })
            .await
            .unwrap();

        let agent = manager.agent("agent-1").unwrap();
        assert_eq!(agent.state, AgentState::Ready);
        assert_eq!(agent.resource_usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn failing_task_lands_agent_in_error() {
        let manager = manager();
        manager.spawn(manifest("agent-1")).await.unwrap();

        let result = manager
            .task("agent-1", |_agent| async move { Err(Error::Internal("boom".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.agent("agent-1").unwrap().state, AgentState::Error);
    }

    #[tokio::test]
    async fn spawn_grants_declared_capabilities() {
        let manager = manager();
        let mut m = manifest("agent-1");
        m.required_capabilities = vec!["memory.read".into()];
        manager.spawn(m).await.unwrap();

        assert!(manager.sandbox.check("agent-1", "memory", "read", None).allowed);
        assert!(!manager.sandbox.check("agent-1", "memory", "write", None).allowed);
    }

    #[tokio::test]
    async fn spawn_rejects_unsigned_manifest_when_signature_required() {
        let audit = Arc::new(AuditLog::new());
        let governance = Arc::new(Governance::new(audit.clone()));
        let sandbox = Arc::new(Sandbox::new(governance, audit.clone(), true));
        let persistence = Arc::new(PersistenceManager::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        ));
        let manager = LifecycleManager::new(
            persistence,
            sandbox,
            audit,
            Arc::new(EventBus::new()),
            sa_domain::config::ManifestSigningConfig {
                require_signature: true,
                signing_secret: Some("shared-secret".into()),
            },
        );

        let result = manager.spawn(manifest("agent-1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn spawn_accepts_correctly_signed_manifest() {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let audit = Arc::new(AuditLog::new());
        let governance = Arc::new(Governance::new(audit.clone()));
        let sandbox = Arc::new(Sandbox::new(governance, audit.clone(), true));
        let persistence = Arc::new(PersistenceManager::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        ));
        let manager = LifecycleManager::new(
            persistence,
            sandbox,
            audit,
            Arc::new(EventBus::new()),
            sa_domain::config::ManifestSigningConfig {
                require_signature: true,
                signing_secret: Some("shared-secret".into()),
            },
        );

        let mut m = manifest("agent-1");
        let mut mac = Hmac::<Sha256>::new_from_slice(b"shared-secret").unwrap();
        mac.update(m.digest().as_bytes());
        m.signature = Some(hex::encode(mac.finalize().into_bytes()));

        let agent = manager.spawn(m).await.unwrap();
        assert_eq!(agent.state, AgentState::Ready);
    }

    #[tokio::test]
    async fn terminate_revokes_tokens_and_marks_terminated() {
        let manager = manager();
        manager.spawn(manifest("agent-1")).await.unwrap();
        manager.terminate("agent-1", false).await.unwrap();
        assert_eq!(manager.agent("agent-1").unwrap().state, AgentState::Terminated);
    }

    #[tokio::test]
    async fn s3_checkpoint_round_trip_through_recovery() {
        let manager = manager();
        manager.spawn(manifest("agent-1")).await.unwrap();
        manager
            .task("agent-1", |mut agent| async move {
                agent.resource_usage.add_tokens(5, 5);
                Ok(agent)
            })
            .await
            .unwrap();

        let mut manifests = HashMap::new();
        manifests.insert("agent-1".to_string(), manifest("agent-1"));

        let fresh = LifecycleManager::new(
            manager.persistence.clone(),
            manager.sandbox.clone(),
            manager.audit.clone(),
            Arc::new(EventBus::new()),
            sa_domain::config::ManifestSigningConfig::default(),
        );
        let restored = fresh.recover(&manifests).await.unwrap();
        assert_eq!(restored, 1);
        let agent = fresh.agent("agent-1").unwrap();
        assert_eq!(agent.state, AgentState::Ready);
        assert_eq!(agent.resource_usage.input_tokens, 5);
    }
}
