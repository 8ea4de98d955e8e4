//! Scripted `LedgerClient` shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};

use tileindex_core::error::IndexerError;
use tileindex_core::types::address_hex;
use tileindex_evm::abi::{function_named, ContractAbis};
use tileindex_evm::client::{LedgerClient, RawLog};

pub const BASE_TIME: u64 = 1_600_000_000;

/// What a scripted `eth_call` answers.
#[derive(Debug, Clone)]
pub enum CallReply {
    Return(Bytes),
    Revert,
    /// A node-side failure that is not an execution revert.
    NodeError(&'static str),
}

#[derive(Default)]
pub struct MockLedger {
    pub tip: Mutex<u64>,
    pub logs: Mutex<Vec<RawLog>>,
    pub transactions: Mutex<HashMap<String, Value>>,
    pub calls: Mutex<HashMap<(Address, u64), CallReply>>,
    pub log_requests: Mutex<Vec<(u64, u64)>>,
    /// Number of upcoming `logs` calls that fail with a transport error.
    pub failing_log_calls: AtomicU32,
}

impl MockLedger {
    pub fn new(tip: u64) -> Self {
        Self {
            tip: Mutex::new(tip),
            ..Default::default()
        }
    }

    pub fn set_tip(&self, tip: u64) {
        *self.tip.lock().unwrap() = tip;
    }

    pub fn add_log(&self, contract: Address, block: u64, log_index: u32, tx_hash: &str) {
        self.logs.lock().unwrap().push(RawLog {
            address: address_hex(&contract),
            topics: vec![format!("{:#x}", B256::repeat_byte(0x11))],
            data: "0x".into(),
            block_number: format!("0x{block:x}"),
            block_hash: Some(format!("{:#x}", B256::with_last_byte(block as u8))),
            tx_hash: tx_hash.into(),
            log_index: format!("0x{log_index:x}"),
            removed: None,
        });
    }

    pub fn add_transaction(&self, hash: &str, tx: Value) {
        self.transactions.lock().unwrap().insert(hash.into(), tx);
    }

    pub fn set_call(&self, contract: Address, block: u64, reply: CallReply) {
        self.calls.lock().unwrap().insert((contract, block), reply);
    }

    pub fn requested_windows(&self) -> Vec<(u64, u64)> {
        self.log_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        Ok(*self.tip.lock().unwrap())
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64, IndexerError> {
        Ok(BASE_TIME + number)
    }

    async fn logs(
        &self,
        _addresses: &[Address],
        _topics: &[B256],
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        self.log_requests.lock().unwrap().push((from, to));
        if self
            .failing_log_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(IndexerError::Rpc("connection reset".into()));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| {
                let block = l.block_number_u64().unwrap();
                block >= from && block <= to
            })
            .cloned()
            .collect())
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Value>, IndexerError> {
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }

    async fn call(&self, to: Address, _data: Bytes, at_block: u64) -> Result<Bytes, IndexerError> {
        match self.calls.lock().unwrap().get(&(to, at_block)).cloned() {
            Some(CallReply::Return(bytes)) => Ok(bytes),
            Some(CallReply::NodeError(message)) => {
                Err(IndexerError::Rpc(format!("eth_call: {message}")))
            }
            Some(CallReply::Revert) | None => {
                Err(IndexerError::CallReverted("execution reverted".into()))
            }
        }
    }
}

// ─── Transaction builders ─────────────────────────────────────────────────────

/// Calldata for `name` on the primary (`primary = true`) or wrapper interface.
pub fn calldata(primary: bool, name: &str, args: Vec<DynSolValue>) -> String {
    let abis = ContractAbis::load().unwrap();
    let abi = if primary { &abis.primary } else { &abis.wrapper };
    let func = function_named(abi, name).unwrap();
    let mut data = func.selector().to_vec();
    data.extend(DynSolValue::Tuple(args).abi_encode_params());
    format!("0x{}", hex::encode(data))
}

pub fn uint(n: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(n), 256)
}

pub fn tx(hash: &str, from: Address, to: Address, value_wei: U256, input: String) -> Value {
    json!({
        "hash": hash,
        "from": address_hex(&from),
        "to": address_hex(&to),
        "value": format!("0x{value_wei:x}"),
        "input": input,
    })
}

/// Return data of `tiles(location)`.
pub fn tile_record(owner: Address) -> CallReply {
    CallReply::Return(Bytes::from(
        DynSolValue::Tuple(vec![
            DynSolValue::Address(owner),
            DynSolValue::String(String::new()),
            DynSolValue::String(String::new()),
            uint(0),
        ])
        .abi_encode_params(),
    ))
}

/// Return data of `ownerOf(tokenId)`.
pub fn token_owner(owner: Address) -> CallReply {
    CallReply::Return(Bytes::from(
        DynSolValue::Tuple(vec![DynSolValue::Address(owner)]).abi_encode_params(),
    ))
}
