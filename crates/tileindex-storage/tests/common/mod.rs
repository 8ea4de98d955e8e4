//! Shared replay fixtures.
//!
//! Raw events carry their decoded form in the transaction JSON so the
//! decoder under test is a plain deserializer.

#![allow(dead_code)]

use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use tileindex_core::checkpoint::{CheckpointStore, CursorKind};
use tileindex_core::decoded::{DecodedEvent, EventMeta};
use tileindex_core::error::IndexerError;
use tileindex_core::lease::{PassOutcome, PassStats};
use tileindex_core::replay::{ReplayEngine, ReplaySettings, TransactionDecoder};
use tileindex_core::store::{RawEventStore, TileStore};
use tileindex_core::types::{Ether, HistoryEntry, HistoryKind, NewRawEvent, RawEvent};

pub const TILE: u32 = 1984;

pub struct ScriptedDecoder;

#[async_trait]
impl TransactionDecoder for ScriptedDecoder {
    async fn decode(&self, raw: &RawEvent) -> Result<DecodedEvent, IndexerError> {
        serde_json::from_value(raw.transaction["decoded"].clone()).map_err(|e| {
            IndexerError::Decode {
                tx_hash: raw.tx_hash.clone(),
                reason: e.to_string(),
            }
        })
    }
}

pub fn addr_a() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn addr_b() -> Address {
    Address::repeat_byte(0xbb)
}

pub fn meta(from: Address, tx: &str, block: u64, log_index: u32) -> EventMeta {
    EventMeta {
        location: TILE,
        from,
        timestamp: DateTime::<Utc>::from_timestamp(1_640_000_000 + block as i64, 0).unwrap(),
        tx_hash: tx.into(),
        block_number: block,
        log_index,
    }
}

pub fn raw(event: &DecodedEvent) -> NewRawEvent {
    let position = event.position();
    NewRawEvent {
        block_number: position.block_number,
        tx_hash: event.tx_hash().to_string(),
        log_index: position.log_index,
        log: json!({ "logIndex": position.log_index }),
        transaction: json!({ "decoded": event }),
    }
}

pub fn set_tile(tx: &str, block: u64, image: &str, url: &str) -> DecodedEvent {
    DecodedEvent::SetTile {
        meta: meta(addr_a(), tx, block, 0),
        image: Some(image.into()),
        url: Some(url.into()),
        price: None,
        owner: None,
    }
}

/// `setTile` that only touches the image.
pub fn set_image(tx: &str, block: u64, image: &str) -> DecodedEvent {
    DecodedEvent::SetTile {
        meta: meta(addr_a(), tx, block, 0),
        image: Some(image.into()),
        url: None,
        price: None,
        owner: None,
    }
}

pub fn buy(buyer: Address, seller: Address, tx: &str, block: u64) -> DecodedEvent {
    DecodedEvent::BuyTile {
        meta: meta(buyer, tx, block, 1),
        seller,
        price: "1.5".parse().unwrap(),
    }
}

pub fn transfer(to: Address, tx: &str, block: u64) -> DecodedEvent {
    DecodedEvent::Transfer {
        meta: meta(Address::repeat_byte(0xdd), tx, block, 0),
        to,
    }
}

pub struct Harness<S> {
    pub store: Arc<S>,
    pub engine: ReplayEngine,
}

impl<S> Harness<S>
where
    S: RawEventStore + TileStore + CheckpointStore + 'static,
{
    pub fn with_store(store: S) -> Self {
        let store = Arc::new(store);
        let engine = ReplayEngine::new(
            Arc::new(ScriptedDecoder),
            store.clone(),
            store.clone(),
            store.clone(),
            ReplaySettings {
                tile_count: 2000,
                deployer: addr_a(),
                initial_price: Ether::from_ether(2),
                batch_size: 2,
            },
        );
        Self { store, engine }
    }

    pub async fn append(&self, events: &[DecodedEvent]) {
        for event in events {
            self.store.append(raw(event)).await.unwrap();
        }
    }

    pub async fn cursor(&self) -> Option<u64> {
        self.store
            .load(CursorKind::Replay)
            .await
            .unwrap()
            .map(|cp| cp.position)
    }

    pub async fn rows(&self, kind: HistoryKind) -> Vec<HistoryEntry> {
        self.store.history(TILE, kind).await.unwrap()
    }

    /// Every history row of the test tile, grouped by kind.
    pub async fn all_rows(&self) -> Vec<HistoryEntry> {
        let mut rows = Vec::new();
        for kind in [
            HistoryKind::Data,
            HistoryKind::Purchase,
            HistoryKind::Wrap,
            HistoryKind::Transfer,
        ] {
            rows.extend(self.rows(kind).await);
        }
        rows
    }
}

pub fn completed(outcome: PassOutcome) -> PassStats {
    match outcome {
        PassOutcome::Completed(stats) => stats,
        PassOutcome::Skipped => panic!("pass was skipped"),
    }
}
