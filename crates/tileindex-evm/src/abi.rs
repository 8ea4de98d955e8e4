//! Interfaces of the two tracked contracts.
//!
//! The primary contract sells and stores tiles directly. The wrapper is an
//! ERC-721 that takes custody of a tile on `wrap` and hands it back on
//! `unwrap`.

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Function, JsonAbi, Param};
use alloy_primitives::B256;

use tileindex_core::error::IndexerError;

pub const PRIMARY_ABI: &str = r#"[
  {"type":"function","name":"buyTile","stateMutability":"payable",
   "inputs":[{"name":"location","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"setTile","stateMutability":"nonpayable",
   "inputs":[{"name":"location","type":"uint256"},{"name":"image","type":"string"},
             {"name":"url","type":"string"},{"name":"price","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"setTileData","stateMutability":"nonpayable",
   "inputs":[{"name":"location","type":"uint256"},{"name":"image","type":"string"},
             {"name":"url","type":"string"}],"outputs":[]},
  {"type":"function","name":"getTile","stateMutability":"view",
   "inputs":[{"name":"location","type":"uint256"}],
   "outputs":[{"name":"owner","type":"address"},{"name":"image","type":"string"},
              {"name":"url","type":"string"},{"name":"price","type":"uint256"}]},
  {"type":"function","name":"tiles","stateMutability":"view",
   "inputs":[{"name":"","type":"uint256"}],
   "outputs":[{"name":"owner","type":"address"},{"name":"image","type":"string"},
              {"name":"url","type":"string"},{"name":"price","type":"uint256"}]},
  {"type":"function","name":"transferOwnership","stateMutability":"nonpayable",
   "inputs":[{"name":"newOwner","type":"address"}],"outputs":[]},
  {"type":"function","name":"withdraw","stateMutability":"nonpayable",
   "inputs":[],"outputs":[]},
  {"type":"event","name":"TileUpdated","anonymous":false,
   "inputs":[{"name":"location","type":"uint256","indexed":false}]}
]"#;

pub const WRAPPER_ABI: &str = r#"[
  {"type":"function","name":"wrap","stateMutability":"nonpayable",
   "inputs":[{"name":"location","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"unwrap","stateMutability":"nonpayable",
   "inputs":[{"name":"location","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"transferFrom","stateMutability":"nonpayable",
   "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},
             {"name":"tokenId","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"safeTransferFrom","stateMutability":"nonpayable",
   "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},
             {"name":"tokenId","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"safeTransferFrom","stateMutability":"nonpayable",
   "inputs":[{"name":"from","type":"address"},{"name":"to","type":"address"},
             {"name":"tokenId","type":"uint256"},{"name":"data","type":"bytes"}],"outputs":[]},
  {"type":"function","name":"approve","stateMutability":"nonpayable",
   "inputs":[{"name":"to","type":"address"},{"name":"tokenId","type":"uint256"}],"outputs":[]},
  {"type":"function","name":"setApprovalForAll","stateMutability":"nonpayable",
   "inputs":[{"name":"operator","type":"address"},{"name":"approved","type":"bool"}],"outputs":[]},
  {"type":"function","name":"ownerOf","stateMutability":"view",
   "inputs":[{"name":"tokenId","type":"uint256"}],
   "outputs":[{"name":"","type":"address"}]},
  {"type":"function","name":"setBaseURI","stateMutability":"nonpayable",
   "inputs":[{"name":"baseURI","type":"string"}],"outputs":[]},
  {"type":"function","name":"transferOwnership","stateMutability":"nonpayable",
   "inputs":[{"name":"newOwner","type":"address"}],"outputs":[]},
  {"type":"function","name":"renounceOwnership","stateMutability":"nonpayable",
   "inputs":[],"outputs":[]},
  {"type":"event","name":"Transfer","anonymous":false,
   "inputs":[{"name":"from","type":"address","indexed":true},
             {"name":"to","type":"address","indexed":true},
             {"name":"tokenId","type":"uint256","indexed":true}]},
  {"type":"event","name":"Approval","anonymous":false,
   "inputs":[{"name":"owner","type":"address","indexed":true},
             {"name":"approved","type":"address","indexed":true},
             {"name":"tokenId","type":"uint256","indexed":true}]},
  {"type":"event","name":"Wrapped","anonymous":false,
   "inputs":[{"name":"location","type":"uint256","indexed":true},
             {"name":"owner","type":"address","indexed":true}]},
  {"type":"event","name":"Unwrapped","anonymous":false,
   "inputs":[{"name":"location","type":"uint256","indexed":true},
             {"name":"owner","type":"address","indexed":true}]}
]"#;

/// Events whose logs are scanned. `Approval` is not tracked.
pub const TRACKED_EVENTS: &[&str] = &["TileUpdated", "Transfer", "Wrapped", "Unwrapped"];

/// Parsed interfaces of both contracts.
#[derive(Debug, Clone)]
pub struct ContractAbis {
    pub primary: JsonAbi,
    pub wrapper: JsonAbi,
}

impl ContractAbis {
    pub fn load() -> Result<Self, IndexerError> {
        Ok(Self {
            primary: parse(PRIMARY_ABI)?,
            wrapper: parse(WRAPPER_ABI)?,
        })
    }

    /// topic0 of every tracked event on either contract.
    pub fn tracked_topics(&self) -> Vec<B256> {
        self.primary
            .events()
            .chain(self.wrapper.events())
            .filter(|e| TRACKED_EVENTS.contains(&e.name.as_str()))
            .map(|e| e.selector())
            .collect()
    }
}

fn parse(json: &str) -> Result<JsonAbi, IndexerError> {
    serde_json::from_str(json).map_err(|e| IndexerError::Config(format!("invalid ABI JSON: {e}")))
}

/// Find the function whose selector prefixes `calldata`.
pub fn function_for<'a>(abi: &'a JsonAbi, calldata: &[u8]) -> Option<&'a Function> {
    let selector = calldata.get(..4)?;
    abi.functions().find(|f| f.selector().as_slice() == selector)
}

/// The only function called `name`.
pub fn function_named<'a>(abi: &'a JsonAbi, name: &str) -> Result<&'a Function, IndexerError> {
    abi.function(name)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| IndexerError::Config(format!("function '{name}' missing from ABI")))
}

/// ABI-decode a parameter list (no selector prefix).
pub fn decode_params(params: &[Param], data: &[u8]) -> Result<Vec<DynSolValue>, String> {
    let types = params
        .iter()
        .map(|p| p.resolve().map_err(|e| e.to_string()))
        .collect::<Result<Vec<DynSolType>, _>>()?;

    match DynSolType::Tuple(types).abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(other) => Ok(vec![other]),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_interfaces_parse() {
        let abis = ContractAbis::load().unwrap();
        assert!(abis.primary.function("buyTile").is_some());
        assert_eq!(abis.wrapper.function("safeTransferFrom").unwrap().len(), 2);
    }

    #[test]
    fn tracked_topics_skip_approval() {
        let abis = ContractAbis::load().unwrap();
        let topics = abis.tracked_topics();
        assert_eq!(topics.len(), 4);

        let approval = abis.wrapper.event("Approval").unwrap()[0].selector();
        assert!(!topics.contains(&approval));
    }

    #[test]
    fn selector_lookup() {
        let abis = ContractAbis::load().unwrap();
        let buy = function_named(&abis.primary, "buyTile").unwrap();
        let mut calldata = buy.selector().to_vec();
        calldata.extend_from_slice(&[0u8; 32]);

        assert_eq!(function_for(&abis.primary, &calldata).unwrap().name, "buyTile");
        assert!(function_for(&abis.wrapper, &calldata).is_none());
        assert!(function_for(&abis.primary, &[0x01, 0x02]).is_none());
    }
}
