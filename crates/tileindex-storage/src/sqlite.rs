//! SQLite storage backend for TileIndex.
//!
//! Persists raw events, tiles, the four history tables and both cursors to a
//! single SQLite file. Uniqueness of `(tx_hash, log_index)` and of every
//! history idempotency key is enforced by `UNIQUE` constraints.
//!
//! # Usage
//! ```rust,no_run
//! use tileindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./tiles.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, warn};

use tileindex_core::checkpoint::{Checkpoint, CheckpointStore, CursorKind};
use tileindex_core::error::IndexerError;
use tileindex_core::store::{RawEventStore, TileStore};
use tileindex_core::types::{
    address_hex, AppendOutcome, ApplyOutcome, DataHistory, Ether, HistoryEntry, HistoryKey,
    HistoryKind, HistoryMeta, NewRawEvent, PurchaseHistory, RawEvent, Tile, TransferHistory,
    WrapHistory,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS raw_events (
        sequence     INTEGER PRIMARY KEY AUTOINCREMENT,
        block_number INTEGER NOT NULL,
        tx_hash      TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        log_json     TEXT    NOT NULL,
        tx_json      TEXT    NOT NULL,
        UNIQUE (tx_hash, log_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_raw_events_block ON raw_events (block_number, log_index);",
    "CREATE TABLE IF NOT EXISTS tiles (
        id        INTEGER PRIMARY KEY,
        image     TEXT    NOT NULL,
        price_wei TEXT    NOT NULL,
        url       TEXT    NOT NULL,
        owner     TEXT    NOT NULL,
        wrapped   INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS data_history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        tile_id      INTEGER NOT NULL REFERENCES tiles (id),
        tx_hash      TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        timestamp    INTEGER NOT NULL,
        updated_by   TEXT    NOT NULL,
        image        TEXT    NOT NULL,
        url          TEXT    NOT NULL,
        price_wei    TEXT    NOT NULL,
        UNIQUE (tile_id, tx_hash)
    );",
    "CREATE TABLE IF NOT EXISTS purchase_history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        tile_id      INTEGER NOT NULL REFERENCES tiles (id),
        tx_hash      TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        timestamp    INTEGER NOT NULL,
        sold_by      TEXT    NOT NULL,
        purchased_by TEXT    NOT NULL,
        price_wei    TEXT    NOT NULL,
        UNIQUE (tile_id, tx_hash, log_index)
    );",
    "CREATE TABLE IF NOT EXISTS wrap_history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        tile_id      INTEGER NOT NULL REFERENCES tiles (id),
        tx_hash      TEXT    NOT NULL,
        log_index    INTEGER NOT NULL,
        block_number INTEGER NOT NULL,
        timestamp    INTEGER NOT NULL,
        wrapped      INTEGER NOT NULL,
        updated_by   TEXT    NOT NULL,
        UNIQUE (tile_id, tx_hash)
    );",
    "CREATE TABLE IF NOT EXISTS transfer_history (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        tile_id          INTEGER NOT NULL REFERENCES tiles (id),
        tx_hash          TEXT    NOT NULL,
        log_index        INTEGER NOT NULL,
        block_number     INTEGER NOT NULL,
        timestamp        INTEGER NOT NULL,
        transferred_from TEXT    NOT NULL,
        transferred_to   TEXT    NOT NULL,
        UNIQUE (tile_id, tx_hash)
    );",
    "CREATE TABLE IF NOT EXISTS cursors (
        name       TEXT    PRIMARY KEY,
        position   INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );",
];

fn db(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn table(kind: HistoryKind) -> &'static str {
    match kind {
        HistoryKind::Data => "data_history",
        HistoryKind::Purchase => "purchase_history",
        HistoryKind::Wrap => "wrap_history",
        HistoryKind::Transfer => "transfer_history",
    }
}

/// SQLite-backed storage for the whole pipeline.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./tiles.db"`) or a full
    /// SQLite URL (`"sqlite:./tiles.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db)?;

        let storage = Self { pool };
        storage.init_schema(true).await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Each connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db)?;

        let storage = Self { pool };
        storage.init_schema(false).await?;
        Ok(storage)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(db)?;
        }
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await.map_err(db)?;
        }
        Ok(())
    }

    async fn insert_raw<'e, E>(exec: E, event: &NewRawEvent) -> Result<AppendOutcome, IndexerError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let log_json = serde_json::to_string(&event.log)
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        let tx_json = serde_json::to_string(&event.transaction)
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO raw_events (block_number, tx_hash, log_index, log_json, tx_json)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(event.block_number as i64)
        .bind(&event.tx_hash)
        .bind(i64::from(event.log_index))
        .bind(&log_json)
        .bind(&tx_json)
        .execute(exec)
        .await
        .map_err(db)?;

        if result.rows_affected() == 0 {
            warn!(
                tx_hash = %event.tx_hash,
                log_index = event.log_index,
                "raw event already stored"
            );
            return Ok(AppendOutcome::Duplicate);
        }
        Ok(AppendOutcome::Inserted {
            sequence: result.last_insert_rowid() as u64,
        })
    }

    async fn insert_history(
        conn: &mut sqlx::SqliteConnection,
        entry: &HistoryEntry,
    ) -> Result<bool, IndexerError> {
        let meta = entry.meta();
        let query = match entry {
            HistoryEntry::Data(h) => sqlx::query(
                "INSERT INTO data_history
                 (tile_id, tx_hash, log_index, block_number, timestamp,
                  updated_by, image, url, price_wei)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tile_id, tx_hash) DO NOTHING",
            )
            .bind(i64::from(meta.tile_id))
            .bind(&meta.tx_hash)
            .bind(i64::from(meta.log_index))
            .bind(meta.block_number as i64)
            .bind(meta.timestamp.timestamp())
            .bind(address_hex(&h.updated_by))
            .bind(&h.image)
            .bind(&h.url)
            .bind(h.price.wei().to_string()),
            HistoryEntry::Purchase(h) => sqlx::query(
                "INSERT INTO purchase_history
                 (tile_id, tx_hash, log_index, block_number, timestamp,
                  sold_by, purchased_by, price_wei)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tile_id, tx_hash, log_index) DO NOTHING",
            )
            .bind(i64::from(meta.tile_id))
            .bind(&meta.tx_hash)
            .bind(i64::from(meta.log_index))
            .bind(meta.block_number as i64)
            .bind(meta.timestamp.timestamp())
            .bind(address_hex(&h.sold_by))
            .bind(address_hex(&h.purchased_by))
            .bind(h.price.wei().to_string()),
            HistoryEntry::Wrap(h) => sqlx::query(
                "INSERT INTO wrap_history
                 (tile_id, tx_hash, log_index, block_number, timestamp, wrapped, updated_by)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tile_id, tx_hash) DO NOTHING",
            )
            .bind(i64::from(meta.tile_id))
            .bind(&meta.tx_hash)
            .bind(i64::from(meta.log_index))
            .bind(meta.block_number as i64)
            .bind(meta.timestamp.timestamp())
            .bind(h.wrapped)
            .bind(address_hex(&h.updated_by)),
            HistoryEntry::Transfer(h) => sqlx::query(
                "INSERT INTO transfer_history
                 (tile_id, tx_hash, log_index, block_number, timestamp,
                  transferred_from, transferred_to)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tile_id, tx_hash) DO NOTHING",
            )
            .bind(i64::from(meta.tile_id))
            .bind(&meta.tx_hash)
            .bind(i64::from(meta.log_index))
            .bind(meta.block_number as i64)
            .bind(meta.timestamp.timestamp())
            .bind(address_hex(&h.transferred_from))
            .bind(address_hex(&h.transferred_to)),
        };
        let result = query.execute(&mut *conn).await.map_err(db)?;
        Ok(result.rows_affected() == 1)
    }
}

// ─── Row decoding ────────────────────────────────────────────────────────────

fn parse_address(s: &str) -> Result<Address, IndexerError> {
    Address::from_str(s).map_err(|e| IndexerError::Storage(format!("bad address '{s}': {e}")))
}

fn parse_ether(s: &str) -> Result<Ether, IndexerError> {
    U256::from_str_radix(s, 10)
        .map(Ether::from_wei)
        .map_err(|e| IndexerError::Storage(format!("bad wei amount '{s}': {e}")))
}

fn parse_timestamp(secs: i64) -> Result<DateTime<Utc>, IndexerError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| IndexerError::Storage(format!("bad timestamp {secs}")))
}

fn raw_from_row(row: &SqliteRow) -> Result<RawEvent, IndexerError> {
    let log: String = row.get("log_json");
    let tx: String = row.get("tx_json");
    Ok(RawEvent {
        sequence: row.get::<i64, _>("sequence") as u64,
        block_number: row.get::<i64, _>("block_number") as u64,
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i64, _>("log_index") as u32,
        log: serde_json::from_str(&log).map_err(|e| IndexerError::Storage(e.to_string()))?,
        transaction: serde_json::from_str(&tx).map_err(|e| IndexerError::Storage(e.to_string()))?,
    })
}

fn tile_from_row(row: &SqliteRow) -> Result<Tile, IndexerError> {
    Ok(Tile {
        id: row.get::<i64, _>("id") as u32,
        image: row.get("image"),
        price: parse_ether(row.get("price_wei"))?,
        url: row.get("url"),
        owner: parse_address(row.get("owner"))?,
        wrapped: row.get("wrapped"),
    })
}

fn history_from_row(kind: HistoryKind, row: &SqliteRow) -> Result<HistoryEntry, IndexerError> {
    let meta = HistoryMeta {
        tile_id: row.get::<i64, _>("tile_id") as u32,
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i64, _>("log_index") as u32,
        block_number: row.get::<i64, _>("block_number") as u64,
        timestamp: parse_timestamp(row.get("timestamp"))?,
    };
    Ok(match kind {
        HistoryKind::Data => HistoryEntry::Data(DataHistory {
            meta,
            updated_by: parse_address(row.get("updated_by"))?,
            image: row.get("image"),
            url: row.get("url"),
            price: parse_ether(row.get("price_wei"))?,
        }),
        HistoryKind::Purchase => HistoryEntry::Purchase(PurchaseHistory {
            meta,
            sold_by: parse_address(row.get("sold_by"))?,
            purchased_by: parse_address(row.get("purchased_by"))?,
            price: parse_ether(row.get("price_wei"))?,
        }),
        HistoryKind::Wrap => HistoryEntry::Wrap(WrapHistory {
            meta,
            wrapped: row.get("wrapped"),
            updated_by: parse_address(row.get("updated_by"))?,
        }),
        HistoryKind::Transfer => HistoryEntry::Transfer(TransferHistory {
            meta,
            transferred_from: parse_address(row.get("transferred_from"))?,
            transferred_to: parse_address(row.get("transferred_to"))?,
        }),
    })
}

// ─── RawEventStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl RawEventStore for SqliteStorage {
    async fn append(&self, event: NewRawEvent) -> Result<AppendOutcome, IndexerError> {
        Self::insert_raw(&self.pool, &event).await
    }

    /// The whole batch is committed in one transaction.
    async fn append_batch(
        &self,
        events: Vec<NewRawEvent>,
    ) -> Result<Vec<AppendOutcome>, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            outcomes.push(Self::insert_raw(&mut *tx, event).await?);
        }
        tx.commit().await.map_err(db)?;
        debug!(count = events.len(), "raw event batch stored");
        Ok(outcomes)
    }

    async fn get(&self, sequence: u64) -> Result<Option<RawEvent>, IndexerError> {
        let row = sqlx::query(
            "SELECT sequence, block_number, tx_hash, log_index, log_json, tx_json
             FROM raw_events WHERE sequence = ?",
        )
        .bind(sequence as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;

        row.as_ref().map(raw_from_row).transpose()
    }

    async fn events_after(
        &self,
        sequence: u64,
        limit: usize,
    ) -> Result<Vec<RawEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT sequence, block_number, tx_hash, log_index, log_json, tx_json
             FROM raw_events WHERE sequence > ? ORDER BY sequence LIMIT ?",
        )
        .bind(sequence as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter().map(raw_from_row).collect()
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM raw_events")
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── TileStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl TileStore for SqliteStorage {
    async fn bootstrap(&self, tiles: Vec<Tile>) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut created = 0;
        for tile in &tiles {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO tiles (id, image, price_wei, url, owner, wrapped)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(i64::from(tile.id))
            .bind(&tile.image)
            .bind(tile.price.wei().to_string())
            .bind(&tile.url)
            .bind(address_hex(&tile.owner))
            .bind(tile.wrapped)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            created += result.rows_affected();
        }
        tx.commit().await.map_err(db)?;
        Ok(created)
    }

    async fn tile(&self, id: u32) -> Result<Option<Tile>, IndexerError> {
        let row =
            sqlx::query("SELECT id, image, price_wei, url, owner, wrapped FROM tiles WHERE id = ?")
                .bind(i64::from(id))
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

        row.as_ref().map(tile_from_row).transpose()
    }

    async fn tile_count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM tiles")
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    async fn has_history(&self, key: &HistoryKey) -> Result<bool, IndexerError> {
        let row = match key.log_index {
            Some(log_index) => {
                let sql = format!(
                    "SELECT 1 FROM {} WHERE tile_id = ? AND tx_hash = ? AND log_index = ?",
                    table(key.kind)
                );
                sqlx::query(&sql)
                    .bind(i64::from(key.tile_id))
                    .bind(&key.tx_hash)
                    .bind(i64::from(log_index))
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT 1 FROM {} WHERE tile_id = ? AND tx_hash = ?",
                    table(key.kind)
                );
                sqlx::query(&sql)
                    .bind(i64::from(key.tile_id))
                    .bind(&key.tx_hash)
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(db)?;

        Ok(row.is_some())
    }

    async fn apply(&self, tile: &Tile, entry: HistoryEntry) -> Result<ApplyOutcome, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        if !Self::insert_history(&mut *tx, &entry).await? {
            // Dropping the transaction rolls it back.
            return Ok(ApplyOutcome::Duplicate);
        }

        let result = sqlx::query(
            "UPDATE tiles SET image = ?, price_wei = ?, url = ?, owner = ?, wrapped = ?
             WHERE id = ?",
        )
        .bind(&tile.image)
        .bind(tile.price.wei().to_string())
        .bind(&tile.url)
        .bind(address_hex(&tile.owner))
        .bind(tile.wrapped)
        .bind(i64::from(tile.id))
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        if result.rows_affected() != 1 {
            return Err(IndexerError::Storage(format!("tile {} does not exist", tile.id)));
        }

        tx.commit().await.map_err(db)?;
        debug!(tile = tile.id, kind = %entry.kind(), "history row stored");
        Ok(ApplyOutcome::Applied)
    }

    async fn history(
        &self,
        tile_id: u32,
        kind: HistoryKind,
    ) -> Result<Vec<HistoryEntry>, IndexerError> {
        let sql = format!("SELECT * FROM {} WHERE tile_id = ? ORDER BY id", table(kind));
        let rows = sqlx::query(&sql)
            .bind(i64::from(tile_id))
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

        rows.iter().map(|row| history_from_row(kind, row)).collect()
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, kind: CursorKind) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query("SELECT position, updated_at FROM cursors WHERE name = ?")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        Ok(row.map(|r| Checkpoint {
            kind,
            position: r.get::<i64, _>("position") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cursors (name, position, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(checkpoint.kind.as_str())
        .bind(checkpoint.position as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn delete(&self, kind: CursorKind) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM cursors WHERE name = ?")
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(tx: &str, log_index: u32, block: u64) -> NewRawEvent {
        NewRawEvent {
            block_number: block,
            tx_hash: tx.into(),
            log_index,
            log: serde_json::json!({ "topics": ["0x01"], "data": "0x" }),
            transaction: serde_json::json!({ "hash": tx, "timestamp": 1_600_000_000 }),
        }
    }

    fn meta(tile_id: u32, tx: &str, log_index: u32) -> HistoryMeta {
        HistoryMeta {
            tile_id,
            tx_hash: tx.into(),
            log_index,
            block_number: 12_000_000,
            timestamp: parse_timestamp(1_600_000_000).unwrap(),
        }
    }

    async fn store_with_tiles(n: u32) -> SqliteStorage {
        let store = SqliteStorage::in_memory().await.unwrap();
        let owner = Address::repeat_byte(0x0d);
        store
            .bootstrap((0..n).map(|id| Tile::genesis(id, owner, Ether::from_ether(2))).collect())
            .await
            .unwrap();
        store
    }

    // ── RawEventStore ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn raw_event_dedup() {
        let store = SqliteStorage::in_memory().await.unwrap();

        let first = store.append(raw("0xaa", 3, 100)).await.unwrap();
        let second = store.append(raw("0xaa", 3, 100)).await.unwrap();

        assert!(matches!(first, AppendOutcome::Inserted { .. }));
        assert_eq!(second, AppendOutcome::Duplicate);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn raw_event_batch_preserves_order() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let outcomes = store
            .append_batch(vec![raw("0x01", 0, 100), raw("0x02", 1, 100), raw("0x01", 0, 100)])
            .await
            .unwrap();
        assert_eq!(outcomes[2], AppendOutcome::Duplicate);

        let events = store.events_after(0, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tx_hash, "0x01");
        assert_eq!(events[1].tx_hash, "0x02");
        assert!(events[0].sequence < events[1].sequence);
        assert_eq!(events[0].transaction["timestamp"], 1_600_000_000);

        let again = store.get(events[1].sequence).await.unwrap().unwrap();
        assert_eq!(again, events[1]);
    }

    // ── TileStore ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tile_roundtrip_and_bootstrap_idempotent() {
        let store = store_with_tiles(4).await;
        assert_eq!(store.tile_count().await.unwrap(), 4);

        let again = store
            .bootstrap(vec![Tile::genesis(0, Address::ZERO, Ether::ZERO)])
            .await
            .unwrap();
        assert_eq!(again, 0);

        let tile = store.tile(0).await.unwrap().unwrap();
        assert_eq!(tile.owner, Address::repeat_byte(0x0d));
        assert_eq!(tile.price.to_string(), "2");
        assert!(!tile.wrapped);
        assert!(store.tile(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_writes_row_and_tile_once() {
        let store = store_with_tiles(2).await;
        let buyer = Address::repeat_byte(0x0b);
        let mut tile = store.tile(1).await.unwrap().unwrap();
        let entry = HistoryEntry::Purchase(PurchaseHistory {
            meta: meta(1, "0xbuy", 2),
            sold_by: tile.owner,
            purchased_by: buyer,
            price: "1.5".parse().unwrap(),
        });
        tile.owner = buyer;
        tile.price = Ether::ZERO;

        assert!(!store.has_history(&entry.key()).await.unwrap());
        assert_eq!(store.apply(&tile, entry.clone()).await.unwrap(), ApplyOutcome::Applied);
        assert!(store.has_history(&entry.key()).await.unwrap());
        assert_eq!(store.apply(&tile, entry).await.unwrap(), ApplyOutcome::Duplicate);

        let rows = store.history(1, HistoryKind::Purchase).await.unwrap();
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            HistoryEntry::Purchase(row) => {
                assert_eq!(row.purchased_by, buyer);
                assert_eq!(row.price.to_string(), "1.5");
                assert_eq!(row.meta.timestamp.timestamp(), 1_600_000_000);
            }
            other => panic!("unexpected row {other:?}"),
        }
        let stored = store.tile(1).await.unwrap().unwrap();
        assert_eq!(stored.owner, buyer);
        assert!(stored.price.is_zero());
    }

    #[tokio::test]
    async fn purchase_key_distinguishes_log_index() {
        let store = store_with_tiles(1).await;
        let tile = store.tile(0).await.unwrap().unwrap();
        for log_index in [0, 1] {
            let entry = HistoryEntry::Purchase(PurchaseHistory {
                meta: meta(0, "0xsame", log_index),
                sold_by: tile.owner,
                purchased_by: tile.owner,
                price: Ether::from_ether(1),
            });
            assert_eq!(store.apply(&tile, entry).await.unwrap(), ApplyOutcome::Applied);
        }
        assert_eq!(store.history(0, HistoryKind::Purchase).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wrap_and_transfer_rows_roundtrip() {
        let store = store_with_tiles(1).await;
        let mut tile = store.tile(0).await.unwrap().unwrap();
        let holder = Address::repeat_byte(0x0e);
        tile.wrapped = true;
        tile.owner = holder;

        let wrap = HistoryEntry::Wrap(WrapHistory {
            meta: meta(0, "0xwrap", 0),
            wrapped: true,
            updated_by: holder,
        });
        store.apply(&tile, wrap).await.unwrap();

        let transfer = HistoryEntry::Transfer(TransferHistory {
            meta: meta(0, "0xxfer", 1),
            transferred_from: holder,
            transferred_to: Address::repeat_byte(0x0f),
        });
        tile.owner = Address::repeat_byte(0x0f);
        store.apply(&tile, transfer).await.unwrap();

        let wraps = store.history(0, HistoryKind::Wrap).await.unwrap();
        assert!(matches!(&wraps[0], HistoryEntry::Wrap(w) if w.wrapped && w.updated_by == holder));
        let transfers = store.history(0, HistoryKind::Transfer).await.unwrap();
        assert!(matches!(&transfers[0], HistoryEntry::Transfer(t) if t.transferred_from == holder));
        let stored = store.tile(0).await.unwrap().unwrap();
        assert!(stored.wrapped);
        assert_eq!(stored.owner, Address::repeat_byte(0x0f));
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();

        for position in [100, 200] {
            store
                .save(Checkpoint {
                    kind: CursorKind::Scan,
                    position,
                    updated_at: 1,
                })
                .await
                .unwrap();
        }

        let loaded = store.load(CursorKind::Scan).await.unwrap().unwrap();
        assert_eq!(loaded.position, 200);
        assert!(store.load(CursorKind::Replay).await.unwrap().is_none());

        store.delete(CursorKind::Scan).await.unwrap();
        assert!(store.load(CursorKind::Scan).await.unwrap().is_none());
    }
}
