//! Persistence traits for raw events, tiles and history.
//!
//! Backends live in `tileindex-storage`. Each backend must enforce the
//! uniqueness of `(tx_hash, log_index)` for raw events and of every
//! `HistoryKey` itself, not rely on callers checking first.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{
    AppendOutcome, ApplyOutcome, HistoryEntry, HistoryKey, HistoryKind, NewRawEvent, RawEvent,
    Tile,
};

/// Write-once, read-many store of raw ledger events.
#[async_trait]
pub trait RawEventStore: Send + Sync {
    /// Append one event. A second append of the same `(tx_hash, log_index)`
    /// is a no-op reported as `AppendOutcome::Duplicate`.
    async fn append(&self, event: NewRawEvent) -> Result<AppendOutcome, IndexerError>;

    /// Append events in the given order.
    async fn append_batch(
        &self,
        events: Vec<NewRawEvent>,
    ) -> Result<Vec<AppendOutcome>, IndexerError> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            outcomes.push(self.append(event).await?);
        }
        Ok(outcomes)
    }

    async fn get(&self, sequence: u64) -> Result<Option<RawEvent>, IndexerError>;

    /// Up to `limit` events with a sequence greater than `sequence`, ascending.
    async fn events_after(&self, sequence: u64, limit: usize)
        -> Result<Vec<RawEvent>, IndexerError>;

    async fn count(&self) -> Result<u64, IndexerError>;
}

/// Current tile state plus the four append-only history tables.
#[async_trait]
pub trait TileStore: Send + Sync {
    /// Insert tiles that do not exist yet; existing tiles are left untouched.
    async fn bootstrap(&self, tiles: Vec<Tile>) -> Result<u64, IndexerError>;

    async fn tile(&self, id: u32) -> Result<Option<Tile>, IndexerError>;

    async fn tile_count(&self) -> Result<u64, IndexerError>;

    async fn has_history(&self, key: &HistoryKey) -> Result<bool, IndexerError>;

    /// Atomically append `entry` and overwrite the tile with `tile`.
    /// If the entry's key already exists nothing is written.
    async fn apply(&self, tile: &Tile, entry: HistoryEntry) -> Result<ApplyOutcome, IndexerError>;

    /// History rows of one kind for a tile, in application order.
    async fn history(&self, tile_id: u32, kind: HistoryKind)
        -> Result<Vec<HistoryEntry>, IndexerError>;
}
