use std::path::PathBuf;

use sa_domain::checkpoint::Checkpoint;
use sa_domain::error::{Error, Result};

use super::CheckpointStore;

/// One file per agent under `dir`, named `<agentId>.ckpt`. Writes are
/// atomic: serialize to `<agentId>.ckpt.tmp`, then rename over the final
/// path, matching the gateway's own atomic-config-write pattern.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: PathBuf) -> Self {
        FileCheckpointStore { dir }
    }

    fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.ckpt"))
    }

    fn tmp_path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.ckpt.tmp"))
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_raw(&self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut line = serde_json::to_string(checkpoint)?;
        line.push('\n');

        let tmp_path = self.tmp_path_for(&checkpoint.agent_id);
        tokio::fs::write(&tmp_path, line.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, self.path_for(&checkpoint.agent_id)).await?;
        Ok(())
    }

    async fn load_raw(&self, agent_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(agent_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let line = raw.lines().next().unwrap_or("");
                let checkpoint: Checkpoint = serde_json::from_str(line)
                    .map_err(|e| Error::Corrupt(format!("malformed checkpoint for {agent_id}: {e}")))?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list_raw(&self) -> Result<Vec<Checkpoint>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path
                .extension()
                .map(|ext| ext == "ckpt")
                .unwrap_or(false);
            if !is_checkpoint {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            let line = raw.lines().next().unwrap_or("");
            match serde_json::from_str::<Checkpoint>(line) {
                Ok(checkpoint) => out.push(checkpoint),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unparsable checkpoint file"),
            }
        }
        Ok(out)
    }

    async fn delete_raw(&self, agent_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(agent_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
