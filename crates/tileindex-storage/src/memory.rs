//! In-memory storage backend.
//!
//! Stores raw events, tiles, history and checkpoints in RAM.
//! Useful for testing and short-lived pipelines that don't need persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use tileindex_core::checkpoint::{Checkpoint, CheckpointStore, CursorKind};
use tileindex_core::error::IndexerError;
use tileindex_core::store::{RawEventStore, TileStore};
use tileindex_core::types::{
    AppendOutcome, ApplyOutcome, HistoryEntry, HistoryKey, HistoryKind, NewRawEvent, RawEvent,
    Tile,
};

#[derive(Default)]
struct State {
    raw: Vec<RawEvent>,
    raw_keys: HashSet<(String, u32)>,
    tiles: BTreeMap<u32, Tile>,
    history: Vec<HistoryEntry>,
    history_keys: HashSet<HistoryKey>,
    checkpoints: HashMap<CursorKind, Checkpoint>,
}

/// In-memory pipeline storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, IndexerError> {
        self.state
            .lock()
            .map_err(|_| IndexerError::Storage("in-memory storage lock poisoned".into()))
    }

    /// Every history row, in application order.
    pub fn all_history(&self) -> Result<Vec<HistoryEntry>, IndexerError> {
        Ok(self.state()?.history.clone())
    }
}

#[async_trait]
impl RawEventStore for InMemoryStorage {
    async fn append(&self, event: NewRawEvent) -> Result<AppendOutcome, IndexerError> {
        let mut state = self.state()?;
        let key = (event.tx_hash.clone(), event.log_index);
        if !state.raw_keys.insert(key) {
            tracing::warn!(
                tx_hash = %event.tx_hash,
                log_index = event.log_index,
                "raw event already stored"
            );
            return Ok(AppendOutcome::Duplicate);
        }
        let sequence = state.raw.len() as u64 + 1;
        state.raw.push(RawEvent {
            sequence,
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
            log: event.log,
            transaction: event.transaction,
        });
        Ok(AppendOutcome::Inserted { sequence })
    }

    async fn get(&self, sequence: u64) -> Result<Option<RawEvent>, IndexerError> {
        let state = self.state()?;
        Ok(sequence
            .checked_sub(1)
            .and_then(|i| state.raw.get(i as usize))
            .cloned())
    }

    async fn events_after(
        &self,
        sequence: u64,
        limit: usize,
    ) -> Result<Vec<RawEvent>, IndexerError> {
        let state = self.state()?;
        Ok(state
            .raw
            .iter()
            .skip(sequence as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        Ok(self.state()?.raw.len() as u64)
    }
}

#[async_trait]
impl TileStore for InMemoryStorage {
    async fn bootstrap(&self, tiles: Vec<Tile>) -> Result<u64, IndexerError> {
        let mut state = self.state()?;
        let mut created = 0;
        for tile in tiles {
            if let std::collections::btree_map::Entry::Vacant(slot) = state.tiles.entry(tile.id) {
                slot.insert(tile);
                created += 1;
            }
        }
        Ok(created)
    }

    async fn tile(&self, id: u32) -> Result<Option<Tile>, IndexerError> {
        Ok(self.state()?.tiles.get(&id).cloned())
    }

    async fn tile_count(&self) -> Result<u64, IndexerError> {
        Ok(self.state()?.tiles.len() as u64)
    }

    async fn has_history(&self, key: &HistoryKey) -> Result<bool, IndexerError> {
        Ok(self.state()?.history_keys.contains(key))
    }

    async fn apply(&self, tile: &Tile, entry: HistoryEntry) -> Result<ApplyOutcome, IndexerError> {
        let mut state = self.state()?;
        if !state.tiles.contains_key(&tile.id) {
            return Err(IndexerError::Storage(format!("tile {} does not exist", tile.id)));
        }
        if !state.history_keys.insert(entry.key()) {
            return Ok(ApplyOutcome::Duplicate);
        }
        state.history.push(entry);
        state.tiles.insert(tile.id, tile.clone());
        Ok(ApplyOutcome::Applied)
    }

    async fn history(
        &self,
        tile_id: u32,
        kind: HistoryKind,
    ) -> Result<Vec<HistoryEntry>, IndexerError> {
        Ok(self
            .state()?
            .history
            .iter()
            .filter(|h| h.kind() == kind && h.meta().tile_id == tile_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, kind: CursorKind) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.state()?.checkpoints.get(&kind).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        self.state()?.checkpoints.insert(checkpoint.kind, checkpoint);
        Ok(())
    }

    async fn delete(&self, kind: CursorKind) -> Result<(), IndexerError> {
        self.state()?.checkpoints.remove(&kind);
        Ok(())
    }
}
