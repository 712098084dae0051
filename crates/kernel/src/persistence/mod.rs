//! Persistence Manager: checkpoint write/read for agent state snapshots.
//!
//! Two storage implementations are required and must behave identically
//! under the same operations: [`file_store::FileCheckpointStore`] (one file
//! per agent, atomic replace via temp+rename) and
//! [`memory_store::MemoryCheckpointStore`] (test-only).

mod file_store;
mod memory_store;

pub use file_store::FileCheckpointStore;
pub use memory_store::MemoryCheckpointStore;

use std::sync::Arc;

use sa_domain::checkpoint::Checkpoint;
use sa_domain::error::Result;
use sa_domain::trace::TraceEvent;

use crate::circuit_breaker::CircuitBreaker;

/// Raw storage contract. Implementations do not verify checksums; checksum
/// verification and `Corrupt` recovery live in [`PersistenceManager`] so
/// both backends get it for free and identically.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_raw(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn load_raw(&self, agent_id: &str) -> Result<Option<Checkpoint>>;
    async fn list_raw(&self) -> Result<Vec<Checkpoint>>;
    async fn delete_raw(&self, agent_id: &str) -> Result<()>;
}

pub struct PersistenceManager {
    store: Arc<dyn CheckpointStore>,
    breaker: Arc<CircuitBreaker>,
}

impl PersistenceManager {
    pub fn new(store: Arc<dyn CheckpointStore>, breaker: Arc<CircuitBreaker>) -> Self {
        PersistenceManager { store, breaker }
    }

    pub async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let store = self.store.clone();
        let bytes = serde_json::to_vec(&checkpoint).map(|b| b.len()).unwrap_or(0);
        let agent_id = checkpoint.agent_id.clone();
        self.breaker
            .execute(move || {
                let store = store.clone();
                let checkpoint = checkpoint.clone();
                async move { store.save_raw(&checkpoint).await }
            })
            .await?;
        TraceEvent::CheckpointWritten { agent_id, bytes }.emit();
        Ok(())
    }

    /// Load and verify a checkpoint. A checksum mismatch is treated as
    /// `Corrupt`: recovered locally as a missing checkpoint (`Ok(None)`)
    /// rather than propagated as an error, with a warn-level audit trace.
    pub async fn load(&self, agent_id: &str) -> Result<Option<Checkpoint>> {
        let store = self.store.clone();
        let id = agent_id.to_string();
        let raw = self
            .breaker
            .execute(move || {
                let store = store.clone();
                let id = id.clone();
                async move { store.load_raw(&id).await }
            })
            .await?;

        match raw {
            None => Ok(None),
            Some(checkpoint) if checkpoint.verify() => Ok(Some(checkpoint)),
            Some(_) => {
                TraceEvent::CheckpointCorrupt {
                    agent_id: agent_id.to_string(),
                    reason: "checksum mismatch".into(),
                }
                .emit();
                Ok(None)
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<Checkpoint>> {
        let store = self.store.clone();
        self.breaker
            .execute(move || {
                let store = store.clone();
                async move { store.list_raw().await }
            })
            .await
    }

    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        let store = self.store.clone();
        let id = agent_id.to_string();
        self.breaker
            .execute(move || {
                let store = store.clone();
                let id = id.clone();
                async move { store.delete_raw(&id).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::agent::{AgentState, ResourceUsage};
    use sa_domain::config::CircuitBreakerConfig;

    fn sample(agent_id: &str) -> Checkpoint {
        Checkpoint::new(
            agent_id.into(),
            AgentState::Ready,
            ResourceUsage {
                input_tokens: 123,
                ..Default::default()
            },
            "digest".into(),
            Default::default(),
            chrono::Utc::now(),
        )
    }

    async fn manager_over(store: Arc<dyn CheckpointStore>) -> PersistenceManager {
        PersistenceManager::new(store, Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())))
    }

    #[tokio::test]
    async fn memory_store_round_trip_matches_written_snapshot() {
        let manager = manager_over(Arc::new(MemoryCheckpointStore::new())).await;
        let ckpt = sample("agent-1");
        manager.save(ckpt.clone()).await.unwrap();
        let loaded = manager.load("agent-1").await.unwrap().unwrap();
        assert_eq!(loaded, ckpt);
    }

    #[tokio::test]
    async fn file_store_round_trip_matches_written_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_over(Arc::new(FileCheckpointStore::new(dir.path().to_path_buf()))).await;
        let ckpt = sample("agent-2");
        manager.save(ckpt.clone()).await.unwrap();
        let loaded = manager.load("agent-2").await.unwrap().unwrap();
        assert_eq!(loaded, ckpt);
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_treated_as_missing() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut ckpt = sample("agent-3");
        ckpt.checksum = "deadbeef".into();
        store.save_raw(&ckpt).await.unwrap();

        let manager = manager_over(store).await;
        let loaded = manager.load("agent-3").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn missing_agent_returns_none_not_error() {
        let manager = manager_over(Arc::new(MemoryCheckpointStore::new())).await;
        assert!(manager.load("no-such-agent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_and_delete_behave_identically_across_backends() {
        for store in [
            Arc::new(MemoryCheckpointStore::new()) as Arc<dyn CheckpointStore>,
        ] {
            let manager = manager_over(store).await;
            manager.save(sample("agent-a")).await.unwrap();
            manager.save(sample("agent-b")).await.unwrap();
            assert_eq!(manager.list().await.unwrap().len(), 2);
            manager.delete("agent-a").await.unwrap();
            assert_eq!(manager.list().await.unwrap().len(), 1);
        }
    }
}
