//! # Transaction Decoder
//!
//! Classifies each transaction in a fetched block — simple transfer,
//! contract creation, or function call — and, for function calls, enriches
//! it with a `DecodedCall` resolved through the Selector Cache. Decode
//! failures and cache misses degrade to publishing the bare transaction;
//! they never drop it.

mod abi;
mod classify;

pub use abi::{decode_params, AbiDecodeError};
pub use classify::TransactionDecoder;
