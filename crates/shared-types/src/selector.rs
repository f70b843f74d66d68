//! # ABI Selector Schema
//!
//! `SelectorEntry` is the decoding schema resolved at runtime for a given
//! 4-byte function selector — either globally or scoped to a contract
//! address. Decoding is dynamic (`alloy-dyn-abi`) since selectors arrive
//! as data, not as compile-time `sol!` bindings.

use serde::{Deserialize, Serialize};

/// One ABI input parameter's name and Solidity type string (e.g. `"uint256"`,
/// `"address"`, `"tuple(address,uint256)"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// The decoding schema for one function selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorEntry {
    /// `0x`-prefixed 4-byte selector, lowercase.
    pub selector: String,
    pub name: String,
    pub inputs: Vec<SelectorParam>,
}

impl SelectorEntry {
    /// KV key for a global (address-agnostic) lookup: `sel:{chain}:{selector}`.
    pub fn global_kv_key(chain: &str, selector: &str) -> String {
        format!("sel:{}:{}", chain.to_lowercase(), selector.to_lowercase())
    }

    /// KV key for an address-scoped lookup: `sel:{chain}:{address}:{selector}`.
    pub fn scoped_kv_key(chain: &str, address: &str, selector: &str) -> String {
        format!(
            "sel:{}:{}:{}",
            chain.to_lowercase(),
            address.to_lowercase(),
            selector.to_lowercase()
        )
    }

    /// The Solidity function signature, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.inputs.iter().map(|p| p.ty.as_str()).collect();
        format!("{}({})", self.name, types.join(","))
    }
}
