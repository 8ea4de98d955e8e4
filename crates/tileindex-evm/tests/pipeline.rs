mod common;

use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};

use common::{calldata, tile_record, token_owner, tx, uint, MockLedger};
use tileindex_core::config::RetrySettings;
use tileindex_core::lease::PassOutcome;
use tileindex_core::store::TileStore;
use tileindex_core::types::{Ether, HistoryEntry, HistoryKind};
use tileindex_evm::{IndexerBuilder, Pipeline};
use tileindex_storage::InMemoryStorage;

const LOCATION: u64 = 3;

fn primary() -> Address {
    Address::repeat_byte(0x01)
}

fn wrapper() -> Address {
    Address::repeat_byte(0x02)
}

fn deployer() -> Address {
    Address::repeat_byte(0x0d)
}

fn alice() -> Address {
    Address::repeat_byte(0xaa)
}

fn bob() -> Address {
    Address::repeat_byte(0xbb)
}

fn pipeline(ledger: Arc<MockLedger>, store: Arc<InMemoryStorage>) -> Pipeline {
    IndexerBuilder::new()
        .contracts(primary(), wrapper())
        .deployer(deployer())
        .start_block(100)
        .confirmation_depth(0)
        .batch_size(50)
        .dead_zone(None)
        .tiles(10, Ether::from_ether(2))
        .retry(RetrySettings {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
        })
        .build(ledger, store)
        .unwrap()
}

/// Bob buys tile 3 from the deployer, decorates it and wraps it; Alice then
/// buys it out of the wrapper.
fn script(ledger: &MockLedger) {
    let two = Ether::from_ether(2).wei();

    ledger.add_log(primary(), 101, 0, "0xb1");
    ledger.add_transaction(
        "0xb1",
        tx("0xb1", bob(), primary(), two, calldata(true, "buyTile", vec![uint(LOCATION)])),
    );
    ledger.set_call(primary(), 100, tile_record(Address::ZERO));

    ledger.add_log(primary(), 102, 0, "0xa2");
    ledger.add_transaction(
        "0xa2",
        tx(
            "0xa2",
            bob(),
            primary(),
            U256::ZERO,
            calldata(
                true,
                "setTile",
                vec![
                    uint(LOCATION),
                    DynSolValue::String("ipfs://tile".into()),
                    DynSolValue::String("https://bob.example".into()),
                    DynSolValue::Uint(Ether::from_ether(5).wei(), 256),
                ],
            ),
        ),
    );

    // A wrap emits both `Transfer` and `Wrapped`.
    ledger.add_log(wrapper(), 103, 0, "0xd3");
    ledger.add_log(wrapper(), 103, 1, "0xd3");
    ledger.add_transaction(
        "0xd3",
        tx("0xd3", bob(), wrapper(), U256::ZERO, calldata(false, "wrap", vec![uint(LOCATION)])),
    );

    ledger.add_log(primary(), 104, 0, "0xe4");
    ledger.add_transaction(
        "0xe4",
        tx("0xe4", alice(), primary(), two, calldata(true, "buyTile", vec![uint(LOCATION)])),
    );
    ledger.set_call(primary(), 103, tile_record(wrapper()));
    ledger.set_call(wrapper(), 103, token_owner(bob()));
}

#[tokio::test]
async fn scan_then_replay_builds_tile_history() {
    let ledger = Arc::new(MockLedger::new(110));
    let store = Arc::new(InMemoryStorage::new());
    script(&ledger);
    let pipeline = pipeline(ledger.clone(), store.clone());

    let PassOutcome::Completed(scan) = pipeline.run_scan_pass().await.unwrap() else {
        panic!("scan skipped");
    };
    assert_eq!(scan.applied, 5);
    assert_eq!(scan.cursor, 110);

    let PassOutcome::Completed(replay) = pipeline.run_replay_pass().await.unwrap() else {
        panic!("replay skipped");
    };
    assert_eq!(replay.units, 5);
    assert_eq!(replay.applied, 4);
    assert_eq!(replay.duplicates, 1);

    let tile = store.tile(LOCATION as u32).await.unwrap().unwrap();
    assert_eq!(tile.owner, alice());
    assert!(tile.wrapped);
    assert_eq!(tile.image, "ipfs://tile");
    assert_eq!(tile.price, Ether::ZERO);

    let purchases = store.history(LOCATION as u32, HistoryKind::Purchase).await.unwrap();
    let sellers: Vec<_> = purchases
        .iter()
        .map(|entry| match entry {
            HistoryEntry::Purchase(p) => (p.sold_by, p.purchased_by),
            other => panic!("unexpected row {other:?}"),
        })
        .collect();
    assert_eq!(sellers, vec![(deployer(), bob()), (bob(), alice())]);

    assert_eq!(store.history(LOCATION as u32, HistoryKind::Wrap).await.unwrap().len(), 1);
    assert_eq!(store.history(LOCATION as u32, HistoryKind::Data).await.unwrap().len(), 1);

    // Untouched tiles keep their genesis state.
    let untouched = store.tile(4).await.unwrap().unwrap();
    assert_eq!(untouched.owner, deployer());
    assert_eq!(untouched.price, Ether::from_ether(2));
}

#[tokio::test]
async fn second_round_only_processes_new_work() {
    let ledger = Arc::new(MockLedger::new(110));
    let store = Arc::new(InMemoryStorage::new());
    script(&ledger);
    let pipeline = pipeline(ledger.clone(), store.clone());

    pipeline.run_scan_pass().await.unwrap();
    pipeline.run_replay_pass().await.unwrap();

    let PassOutcome::Completed(scan) = pipeline.run_scan_pass().await.unwrap() else {
        panic!("scan skipped");
    };
    let PassOutcome::Completed(replay) = pipeline.run_replay_pass().await.unwrap() else {
        panic!("replay skipped");
    };
    assert_eq!(scan.units, 0);
    assert_eq!(replay.units, 0);
    assert_eq!(replay.cursor, 5);
}
