use std::collections::HashMap;

use parking_lot::RwLock;
use sa_domain::checkpoint::Checkpoint;
use sa_domain::error::Result;

use super::CheckpointStore;

/// In-memory checkpoint store, behaviorally identical to
/// [`super::FileCheckpointStore`] but non-persistent. Intended for tests.
pub struct MemoryCheckpointStore {
    records: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        MemoryCheckpointStore {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save_raw(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.records
            .write()
            .insert(checkpoint.agent_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load_raw(&self, agent_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.records.read().get(agent_id).cloned())
    }

    async fn list_raw(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn delete_raw(&self, agent_id: &str) -> Result<()> {
        self.records.write().remove(agent_id);
        Ok(())
    }
}
