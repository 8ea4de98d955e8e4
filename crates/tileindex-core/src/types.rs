//! Shared types for the ingestion and replay pipeline.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::utils::{format_ether, parse_ether};
use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Ether ────────────────────────────────────────────────────────────────────

/// An exact wei amount rendered as decimal ether (`"1.5"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ether(U256);

impl Ether {
    pub const ZERO: Ether = Ether(U256::ZERO);

    pub fn from_wei(wei: U256) -> Self {
        Self(wei)
    }

    /// Whole ether, e.g. the default starting price of a tile.
    pub fn from_ether(whole: u64) -> Self {
        Self(U256::from(whole) * U256::from(10u64).pow(U256::from(18u64)))
    }

    pub fn wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Ether {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = format_ether(self.0);
        if full.contains('.') {
            f.write_str(full.trim_end_matches('0').trim_end_matches('.'))
        } else {
            f.write_str(&full)
        }
    }
}

impl FromStr for Ether {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_ether(s.trim())
            .map(Self)
            .map_err(|e| format!("invalid ether amount '{s}': {e}"))
    }
}

impl TryFrom<String> for Ether {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ether> for String {
    fn from(value: Ether) -> Self {
        value.to_string()
    }
}

/// Lowercase `0x…` rendering used for storage keys and logs.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

/// Normalizes a transaction hash to lowercase `0x…` form.
pub fn normalize_hash(hash: &str) -> String {
    let lower = hash.trim().to_ascii_lowercase();
    if lower.starts_with("0x") {
        lower
    } else {
        format!("0x{lower}")
    }
}

// ─── Raw events ───────────────────────────────────────────────────────────────

/// A position in the ledger. Ordering is block first, then log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerPosition {
    pub block_number: u64,
    pub log_index: u32,
}

/// A raw log occurrence ready to be appended to the raw event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawEvent {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    /// The log as returned by the node.
    pub log: serde_json::Value,
    /// The parent transaction, with the block timestamp under `"timestamp"`.
    pub transaction: serde_json::Value,
}

/// A stored raw event. `sequence` is assigned by the store on insert and
/// increases strictly in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub sequence: u64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub log: serde_json::Value,
    pub transaction: serde_json::Value,
}

impl RawEvent {
    pub fn position(&self) -> LedgerPosition {
        LedgerPosition {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

/// Result of appending a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted { sequence: u64 },
    /// `(tx_hash, log_index)` was already stored; nothing was written.
    Duplicate,
}

// ─── Tiles ────────────────────────────────────────────────────────────────────

/// Current state of one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub id: u32,
    pub image: String,
    pub price: Ether,
    pub url: String,
    pub owner: Address,
    pub wrapped: bool,
}

impl Tile {
    /// A tile as it exists before any event touched it.
    pub fn genesis(id: u32, owner: Address, price: Ether) -> Self {
        Self {
            id,
            image: String::new(),
            price,
            url: String::new(),
            owner,
            wrapped: false,
        }
    }
}

// ─── History ──────────────────────────────────────────────────────────────────

/// Which history table a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Data,
    Purchase,
    Wrap,
    Transfer,
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Purchase => write!(f, "purchase"),
            Self::Wrap => write!(f, "wrap"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

/// The idempotency key of a history row. `log_index` is only part of the key
/// for purchases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryKey {
    pub kind: HistoryKind,
    pub tile_id: u32,
    pub tx_hash: String,
    pub log_index: Option<u32>,
}

/// Columns shared by every history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub tile_id: u32,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataHistory {
    #[serde(flatten)]
    pub meta: HistoryMeta,
    pub updated_by: Address,
    pub image: String,
    pub url: String,
    pub price: Ether,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseHistory {
    #[serde(flatten)]
    pub meta: HistoryMeta,
    pub sold_by: Address,
    pub purchased_by: Address,
    pub price: Ether,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapHistory {
    #[serde(flatten)]
    pub meta: HistoryMeta,
    pub wrapped: bool,
    pub updated_by: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHistory {
    #[serde(flatten)]
    pub meta: HistoryMeta,
    pub transferred_from: Address,
    pub transferred_to: Address,
}

/// One append-only history row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Data(DataHistory),
    Purchase(PurchaseHistory),
    Wrap(WrapHistory),
    Transfer(TransferHistory),
}

impl HistoryEntry {
    pub fn kind(&self) -> HistoryKind {
        match self {
            Self::Data(_) => HistoryKind::Data,
            Self::Purchase(_) => HistoryKind::Purchase,
            Self::Wrap(_) => HistoryKind::Wrap,
            Self::Transfer(_) => HistoryKind::Transfer,
        }
    }

    pub fn meta(&self) -> &HistoryMeta {
        match self {
            Self::Data(h) => &h.meta,
            Self::Purchase(h) => &h.meta,
            Self::Wrap(h) => &h.meta,
            Self::Transfer(h) => &h.meta,
        }
    }

    pub fn key(&self) -> HistoryKey {
        let meta = self.meta();
        let kind = self.kind();
        HistoryKey {
            kind,
            tile_id: meta.tile_id,
            tx_hash: meta.tx_hash.clone(),
            log_index: (kind == HistoryKind::Purchase).then_some(meta.log_index),
        }
    }
}

/// Result of writing a history row together with its tile update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The history key already existed; neither the row nor the tile changed.
    Duplicate,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
