//! Replay engine — applies decoded events, in ledger order, to tile state.
//!
//! # Pass
//! 1. Take the replay lease (skip if another pass holds it).
//! 2. On a fresh cursor, materialize every tile with its genesis state.
//! 3. Read raw events after the cursor in sequence order, decode each, apply
//!    it, then advance the cursor to its sequence.
//!
//! The history row and tile update of one event are written atomically by
//! the store; the cursor is advanced afterwards. A crash in between replays
//! the event again and the history key turns it into a skip.

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointManager, CheckpointStore, CursorKind};
use crate::config::IndexerConfig;
use crate::decoded::DecodedEvent;
use crate::error::IndexerError;
use crate::lease::{PassLease, PassOutcome, PassStats};
use crate::store::{RawEventStore, TileStore};
use crate::types::{
    address_hex, ApplyOutcome, DataHistory, Ether, HistoryEntry, LedgerPosition, PurchaseHistory,
    RawEvent, Tile, TransferHistory, WrapHistory,
};

/// Maps one raw event to its decoded form.
#[async_trait]
pub trait TransactionDecoder: Send + Sync {
    async fn decode(&self, raw: &RawEvent) -> Result<DecodedEvent, IndexerError>;
}

/// The new state of a tile and the history row recording the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub tile: Tile,
    pub entry: HistoryEntry,
}

/// Compute the effect of `event` on `tile`.
///
/// Returns `Ok(None)` for events that carry no mutation. Domain invariant
/// violations are returned as `IndexerError::InvariantViolation`.
pub fn transition(tile: &Tile, event: &DecodedEvent) -> Result<Option<Transition>, IndexerError> {
    let mut next = tile.clone();
    let entry = match event {
        DecodedEvent::SetTile {
            meta,
            image,
            url,
            price,
            owner,
        } => {
            if let Some(image) = image {
                next.image = image.clone();
            }
            if let Some(price) = price {
                next.price = *price;
            }
            if let Some(url) = url {
                next.url = url.clone();
            }
            if let Some(owner) = owner {
                next.owner = *owner;
            }
            HistoryEntry::Data(DataHistory {
                meta: meta.history_meta(),
                updated_by: meta.from,
                image: next.image.clone(),
                url: next.url.clone(),
                price: next.price,
            })
        }
        DecodedEvent::BuyTile {
            meta,
            seller,
            price,
        } => {
            if price.is_zero() {
                return Err(violation(tile, &meta.tx_hash, "purchase price must be positive"));
            }
            if *seller != tile.owner {
                return Err(violation(
                    tile,
                    &meta.tx_hash,
                    &format!(
                        "seller {} does not match current owner {}",
                        address_hex(seller),
                        address_hex(&tile.owner)
                    ),
                ));
            }
            next.owner = meta.from;
            next.price = Ether::ZERO;
            HistoryEntry::Purchase(PurchaseHistory {
                meta: meta.history_meta(),
                sold_by: tile.owner,
                purchased_by: meta.from,
                price: *price,
            })
        }
        DecodedEvent::Wrap { meta } | DecodedEvent::Unwrap { meta } => {
            let wrapped = matches!(event, DecodedEvent::Wrap { .. });
            next.wrapped = wrapped;
            next.owner = meta.from;
            HistoryEntry::Wrap(WrapHistory {
                meta: meta.history_meta(),
                wrapped,
                updated_by: meta.from,
            })
        }
        DecodedEvent::Transfer { meta, to } => {
            next.owner = meta.from;
            HistoryEntry::Transfer(TransferHistory {
                meta: meta.history_meta(),
                transferred_from: *to,
                transferred_to: meta.from,
            })
        }
        DecodedEvent::ContractCreation { .. } | DecodedEvent::NotImportant { .. } => {
            return Ok(None)
        }
    };
    Ok(Some(Transition { tile: next, entry }))
}

fn violation(tile: &Tile, tx_hash: &str, reason: &str) -> IndexerError {
    IndexerError::InvariantViolation {
        tile_id: tile.id,
        tx_hash: tx_hash.to_string(),
        reason: reason.to_string(),
    }
}

/// What applying one decoded event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A tile changed and a history row was appended.
    Mutated,
    /// The history key was already present.
    Duplicate,
    /// The event carries no tile mutation.
    NoOp,
}

/// Replay parameters, usually derived from `IndexerConfig`.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub tile_count: u32,
    pub deployer: Address,
    pub initial_price: Ether,
    pub batch_size: usize,
}

impl From<&IndexerConfig> for ReplaySettings {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            tile_count: config.tile_count,
            deployer: config.contracts.deployer,
            initial_price: config.initial_price,
            batch_size: config.replay_batch_size,
        }
    }
}

/// Replays raw events into tile state and history.
pub struct ReplayEngine {
    decoder: Arc<dyn TransactionDecoder>,
    events: Arc<dyn RawEventStore>,
    tiles: Arc<dyn TileStore>,
    checkpoint: CheckpointManager,
    settings: ReplaySettings,
    lease: PassLease,
}

impl ReplayEngine {
    pub fn new(
        decoder: Arc<dyn TransactionDecoder>,
        events: Arc<dyn RawEventStore>,
        tiles: Arc<dyn TileStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: ReplaySettings,
    ) -> Self {
        Self {
            decoder,
            events,
            tiles,
            checkpoint: CheckpointManager::new(checkpoints, CursorKind::Replay),
            settings,
            lease: PassLease::new(),
        }
    }

    pub fn lease(&self) -> &PassLease {
        &self.lease
    }

    /// Run one replay pass over every raw event stored after the cursor.
    pub async fn run_pass(&self) -> Result<PassOutcome, IndexerError> {
        let Some(_guard) = self.lease.try_acquire() else {
            info!("replay pass already in progress, skipping");
            return Ok(PassOutcome::Skipped);
        };

        let mut cursor = self.checkpoint.load().await?.unwrap_or(0);
        if cursor == 0 {
            self.bootstrap().await?;
        }

        let mut previous = match cursor {
            0 => None,
            seq => self.events.get(seq).await?.map(|e| e.position()),
        };
        let mut stats = PassStats {
            cursor,
            ..Default::default()
        };

        loop {
            let batch = self.events.events_after(cursor, self.settings.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            for raw in batch {
                check_order(&raw, previous)?;

                let decoded = self.decoder.decode(&raw).await.map_err(|e| {
                    if e.is_fatal() {
                        error!(
                            sequence = raw.sequence,
                            tx_hash = %raw.tx_hash,
                            error = %e,
                            "replay halted: decode failed"
                        );
                    }
                    e
                })?;

                match self.apply(&decoded).await? {
                    Applied::Mutated => stats.applied += 1,
                    Applied::Duplicate => stats.duplicates += 1,
                    Applied::NoOp => {}
                }

                self.checkpoint.advance(raw.sequence).await?;
                cursor = raw.sequence;
                previous = Some(raw.position());
                stats.units += 1;
            }
            stats.cursor = cursor;
        }

        info!(
            events = stats.units,
            applied = stats.applied,
            duplicates = stats.duplicates,
            cursor = stats.cursor,
            "replay pass complete"
        );
        Ok(PassOutcome::Completed(stats))
    }

    /// Create every tile that does not exist yet with its genesis state.
    pub async fn bootstrap(&self) -> Result<(), IndexerError> {
        let existing = self.tiles.tile_count().await?;
        if existing >= u64::from(self.settings.tile_count) {
            return Ok(());
        }
        let tiles: Vec<Tile> = (0..self.settings.tile_count)
            .map(|id| Tile::genesis(id, self.settings.deployer, self.settings.initial_price))
            .collect();
        let created = self.tiles.bootstrap(tiles).await?;
        info!(created, total = self.settings.tile_count, "tiles bootstrapped");
        Ok(())
    }

    /// Apply one decoded event to its tile.
    pub async fn apply(&self, event: &DecodedEvent) -> Result<Applied, IndexerError> {
        let Some(key) = event.history_key() else {
            debug!(kind = event.name(), tx_hash = event.tx_hash(), "no tile mutation");
            return Ok(Applied::NoOp);
        };

        if self.tiles.has_history(&key).await? {
            warn!(
                kind = event.name(),
                tile = key.tile_id,
                tx_hash = %key.tx_hash,
                "event already applied, skipping"
            );
            return Ok(Applied::Duplicate);
        }

        let tile = self.tiles.tile(key.tile_id).await?.ok_or_else(|| {
            IndexerError::InvariantViolation {
                tile_id: key.tile_id,
                tx_hash: key.tx_hash.clone(),
                reason: "tile does not exist".into(),
            }
        })?;

        let Some(next) = transition(&tile, event).map_err(|e| {
            error!(tile = tile.id, tx_hash = event.tx_hash(), error = %e, "replay halted");
            e
        })?
        else {
            return Ok(Applied::NoOp);
        };

        match self.tiles.apply(&next.tile, next.entry).await? {
            ApplyOutcome::Applied => {
                debug!(
                    kind = event.name(),
                    tile = tile.id,
                    owner = %address_hex(&next.tile.owner),
                    tx_hash = event.tx_hash(),
                    "event applied"
                );
                Ok(Applied::Mutated)
            }
            ApplyOutcome::Duplicate => {
                warn!(
                    kind = event.name(),
                    tile = tile.id,
                    tx_hash = event.tx_hash(),
                    "duplicate history row, skipping"
                );
                Ok(Applied::Duplicate)
            }
        }
    }
}

fn check_order(raw: &RawEvent, previous: Option<LedgerPosition>) -> Result<(), IndexerError> {
    let Some(prev) = previous else {
        return Ok(());
    };
    if raw.position() > prev {
        return Ok(());
    }
    let err = IndexerError::OutOfOrder {
        sequence: raw.sequence,
        block_number: raw.block_number,
        log_index: raw.log_index,
        prev_block: prev.block_number,
        prev_log_index: prev.log_index,
    };
    error!(error = %err, "replay halted");
    Err(err)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
