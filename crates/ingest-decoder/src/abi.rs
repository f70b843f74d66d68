//! ABI decoding of raw calldata against a `SelectorEntry` schema.

use std::collections::BTreeMap;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use shared_types::{ParamValue, SelectorEntry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AbiDecodeError {
    #[error("unsupported or malformed solidity type {0:?}: {1}")]
    BadType(String, String),

    #[error("calldata does not match entry {0}: {1}")]
    Mismatch(String, String),
}

/// Decode the calldata following a 4-byte selector against `entry`'s
/// declared inputs, producing a name -> value map in declaration order.
pub fn decode_params(entry: &SelectorEntry, calldata: &[u8]) -> Result<BTreeMap<String, ParamValue>, AbiDecodeError> {
    let mut types = Vec::with_capacity(entry.inputs.len());
    for input in &entry.inputs {
        let ty = DynSolType::parse(&input.ty)
            .map_err(|e| AbiDecodeError::BadType(input.ty.clone(), e.to_string()))?;
        types.push(ty);
    }

    if types.is_empty() {
        // Invariant 6 (SPEC_FULL.md §8): a selector with no declared inputs
        // never yields a DecodedCall — it's reported as a miss upstream.
        return Err(AbiDecodeError::Mismatch(
            entry.selector.clone(),
            "no declared inputs".to_string(),
        ));
    }

    let tuple = DynSolType::Tuple(types);
    let decoded = tuple
        .abi_decode_params(calldata)
        .map_err(|e| AbiDecodeError::Mismatch(entry.selector.clone(), e.to_string()))?;

    let values = match decoded {
        DynSolValue::Tuple(values) => values,
        other => vec![other],
    };

    if values.len() != entry.inputs.len() {
        return Err(AbiDecodeError::Mismatch(
            entry.selector.clone(),
            format!("decoded {} values, expected {}", values.len(), entry.inputs.len()),
        ));
    }

    let mut params = BTreeMap::new();
    for (input, value) in entry.inputs.iter().zip(values.into_iter()) {
        params.insert(input.name.clone(), to_param_value(&value));
    }
    Ok(params)
}

fn to_param_value(value: &DynSolValue) -> ParamValue {
    match value {
        DynSolValue::Address(addr) => ParamValue::Address(format!("{addr:#x}").to_lowercase()),
        DynSolValue::Uint(v, _) => ParamValue::Uint(v.to_string()),
        DynSolValue::Int(v, _) => ParamValue::Int(v.to_string()),
        DynSolValue::Bool(b) => ParamValue::Bool(*b),
        DynSolValue::Bytes(b) => ParamValue::Bytes(format!("0x{}", hex::encode(b))),
        DynSolValue::FixedBytes(b, size) => ParamValue::Bytes(format!("0x{}", hex::encode(&b[..*size]))),
        DynSolValue::String(s) => ParamValue::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            ParamValue::Array(items.iter().map(to_param_value).collect())
        }
        DynSolValue::Tuple(items) => ParamValue::Tuple(items.iter().map(to_param_value).collect()),
        other => ParamValue::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_dyn_abi::DynSolValue;
    use shared_types::SelectorParam;

    fn transfer_entry() -> SelectorEntry {
        SelectorEntry {
            selector: "0xa9059cbb".into(),
            name: "transfer".into(),
            inputs: vec![
                SelectorParam { name: "_to".into(), ty: "address".into() },
                SelectorParam { name: "_value".into(), ty: "uint256".into() },
            ],
        }
    }

    #[test]
    fn decodes_erc20_transfer_params() {
        let to = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e"
            .parse::<alloy_primitives::Address>()
            .unwrap();
        let encoded = DynSolValue::Tuple(vec![
            DynSolValue::Address(to),
            DynSolValue::Uint(alloy_primitives::U256::from(1_000_000u64), 256),
        ])
        .abi_encode_params();

        let params = decode_params(&transfer_entry(), &encoded).unwrap();
        assert_eq!(
            params.get("_to"),
            Some(&ParamValue::Address(format!("{to:#x}").to_lowercase()))
        );
        assert_eq!(params.get("_value"), Some(&ParamValue::Uint("1000000".to_string())));
    }

    #[test]
    fn entry_with_no_inputs_is_rejected() {
        let entry = SelectorEntry {
            selector: "0x00000000".into(),
            name: "noop".into(),
            inputs: vec![],
        };
        assert!(decode_params(&entry, &[]).is_err());
    }

    #[test]
    fn mismatched_calldata_length_is_an_error() {
        let short = vec![0u8; 4];
        assert!(decode_params(&transfer_entry(), &short).is_err());
    }
}
