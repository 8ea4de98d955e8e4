//! Typed interpretation of one raw ledger transaction.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Ether, HistoryKey, HistoryKind, HistoryMeta, LedgerPosition};

/// Fields shared by every event that mutates a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Tile id the event targets.
    pub location: u32,
    /// Acting address.
    pub from: Address,
    pub timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

impl EventMeta {
    pub fn history_meta(&self) -> HistoryMeta {
        HistoryMeta {
            tile_id: self.location,
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
            block_number: self.block_number,
            timestamp: self.timestamp,
        }
    }
}

/// The source of an event that carries no tile mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

/// A decoded ledger event. Produced fresh from each raw event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DecodedEvent {
    /// Tile data changed. Absent fields leave the tile unchanged.
    SetTile {
        meta: EventMeta,
        image: Option<String>,
        url: Option<String>,
        price: Option<Ether>,
        owner: Option<Address>,
    },
    /// `meta.from` bought the tile from `seller` for `price`.
    BuyTile {
        meta: EventMeta,
        seller: Address,
        price: Ether,
    },
    Wrap {
        meta: EventMeta,
    },
    Unwrap {
        meta: EventMeta,
    },
    /// Token transfer. `meta.from` is the receiving party and `to` the
    /// previous holder, matching the labels the history rows are built from.
    Transfer {
        meta: EventMeta,
        to: Address,
    },
    ContractCreation {
        source: EventSource,
    },
    NotImportant {
        source: EventSource,
        method: String,
    },
}

impl DecodedEvent {
    /// Short variant name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTile { .. } => "SetTile",
            Self::BuyTile { .. } => "BuyTile",
            Self::Wrap { .. } => "Wrap",
            Self::Unwrap { .. } => "Unwrap",
            Self::Transfer { .. } => "Transfer",
            Self::ContractCreation { .. } => "ContractCreation",
            Self::NotImportant { .. } => "NotImportant",
        }
    }

    /// Metadata of tile-mutating events; `None` for markers.
    pub fn meta(&self) -> Option<&EventMeta> {
        match self {
            Self::SetTile { meta, .. }
            | Self::BuyTile { meta, .. }
            | Self::Wrap { meta }
            | Self::Unwrap { meta }
            | Self::Transfer { meta, .. } => Some(meta),
            Self::ContractCreation { .. } | Self::NotImportant { .. } => None,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            Self::ContractCreation { source } | Self::NotImportant { source, .. } => {
                &source.tx_hash
            }
            Self::SetTile { meta, .. }
            | Self::BuyTile { meta, .. }
            | Self::Wrap { meta }
            | Self::Unwrap { meta }
            | Self::Transfer { meta, .. } => &meta.tx_hash,
        }
    }

    pub fn position(&self) -> LedgerPosition {
        let (block_number, log_index) = match self {
            Self::ContractCreation { source } | Self::NotImportant { source, .. } => {
                (source.block_number, source.log_index)
            }
            Self::SetTile { meta, .. }
            | Self::BuyTile { meta, .. }
            | Self::Wrap { meta }
            | Self::Unwrap { meta }
            | Self::Transfer { meta, .. } => (meta.block_number, meta.log_index),
        };
        LedgerPosition {
            block_number,
            log_index,
        }
    }

    /// The idempotency key guarding this event's history row.
    pub fn history_key(&self) -> Option<HistoryKey> {
        let (kind, meta) = match self {
            Self::SetTile { meta, .. } => (HistoryKind::Data, meta),
            Self::BuyTile { meta, .. } => (HistoryKind::Purchase, meta),
            Self::Wrap { meta } | Self::Unwrap { meta } => (HistoryKind::Wrap, meta),
            Self::Transfer { meta, .. } => (HistoryKind::Transfer, meta),
            Self::ContractCreation { .. } | Self::NotImportant { .. } => return None,
        };
        Some(HistoryKey {
            kind,
            tile_id: meta.location,
            tx_hash: meta.tx_hash.clone(),
            log_index: (kind == HistoryKind::Purchase).then_some(meta.log_index),
        })
    }
}
