//! Checkpoints — durable cursors for crash recovery.
//!
//! Two independent cursors exist: the last scanned block and the last
//! replayed raw-event sequence. A cursor is saved only after the work it
//! covers is durable, so on restart a pass resumes at the first unit of work
//! that may not have been completed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Which pipeline a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    /// Last block whose logs are fully stored.
    Scan,
    /// Sequence of the last raw event applied by the replay engine.
    Replay,
}

impl CursorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Replay => "replay",
        }
    }
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted cursor position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub kind: CursorKind,
    pub position: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore`, `InMemoryStorage` and
/// `SqliteStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, kind: CursorKind) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting a pipeline).
    async fn delete(&self, kind: CursorKind) -> Result<(), IndexerError>;
}

/// Binds a checkpoint store to one cursor.
pub struct CheckpointManager {
    store: std::sync::Arc<dyn CheckpointStore>,
    kind: CursorKind,
}

impl CheckpointManager {
    pub fn new(store: std::sync::Arc<dyn CheckpointStore>, kind: CursorKind) -> Self {
        Self { store, kind }
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    /// Load the saved position (`None` if the cursor was never saved).
    pub async fn load(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.store.load(self.kind).await?.map(|cp| cp.position))
    }

    /// Persist `position`. Cursors never move backwards.
    pub async fn advance(&self, position: u64) -> Result<(), IndexerError> {
        if let Some(current) = self.load().await? {
            if position < current {
                return Err(IndexerError::Other(format!(
                    "{} cursor cannot move back from {current} to {position}",
                    self.kind
                )));
            }
        }
        self.save_unchecked(position).await
    }

    async fn save_unchecked(&self, position: u64) -> Result<(), IndexerError> {
        let cp = Checkpoint {
            kind: self.kind,
            position,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await?;
        tracing::debug!(cursor = %self.kind, position, "checkpoint saved");
        Ok(())
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral pipelines.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<CursorKind, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<CursorKind, Checkpoint>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("checkpoint store lock poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, kind: CursorKind) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.data()?.get(&kind).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        self.data()?.insert(checkpoint.kind, checkpoint);
        Ok(())
    }

    async fn delete(&self, kind: CursorKind) -> Result<(), IndexerError> {
        self.data()?.remove(&kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store, CursorKind::Scan);

        assert!(mgr.load().await.unwrap().is_none());

        mgr.advance(1000).await.unwrap();
        assert_eq!(mgr.load().await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn cursors_are_independent() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let scan = CheckpointManager::new(store.clone(), CursorKind::Scan);
        let replay = CheckpointManager::new(store, CursorKind::Replay);

        scan.advance(2_000_000).await.unwrap();
        replay.advance(42).await.unwrap();

        assert_eq!(scan.load().await.unwrap(), Some(2_000_000));
        assert_eq!(replay.load().await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn cursor_never_moves_back() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mgr = CheckpointManager::new(store, CursorKind::Replay);

        mgr.advance(10).await.unwrap();
        mgr.advance(10).await.unwrap();
        assert!(mgr.advance(9).await.is_err());
        assert_eq!(mgr.load().await.unwrap(), Some(10));
    }
}
