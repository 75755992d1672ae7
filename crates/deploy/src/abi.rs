//! ABI encoding for constructor arguments and configuration calls.
//!
//! Plan arguments are mapped onto alloy's dynamic ABI values; call signatures
//! such as `grantRole(bytes32,address)` are parsed and type-checked against the
//! arguments before encoding.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt},
    json_abi::Function,
    primitives::{B256, Selector},
};
use anyhow::Context;

use crate::ArgValue;

impl From<&ArgValue> for DynSolValue {
    fn from(value: &ArgValue) -> Self {
        match value {
            ArgValue::Address(address) => DynSolValue::Address(*address),
            ArgValue::Uint(value) => DynSolValue::Uint(*value, 256),
            ArgValue::Bytes32(value) => DynSolValue::FixedBytes(*value, 32),
            ArgValue::String(value) => DynSolValue::String(value.clone()),
        }
    }
}

fn parse_function(signature: &str) -> anyhow::Result<Function> {
    Function::parse(signature).with_context(|| format!("Invalid function signature {}", signature))
}

/// The 4-byte selector of a function signature.
pub fn selector(signature: &str) -> anyhow::Result<Selector> {
    Ok(parse_function(signature)?.selector())
}

/// ABI-encode a list of values as constructor parameters.
pub fn encode_params(values: &[ArgValue]) -> Vec<u8> {
    DynSolValue::Tuple(values.iter().map(DynSolValue::from).collect()).abi_encode_params()
}

/// Encode a call: selector followed by the encoded parameters.
///
/// Fails if the arguments do not match the parameter types of `signature`.
pub fn encode_call(signature: &str, args: &[ArgValue]) -> anyhow::Result<Vec<u8>> {
    let function = parse_function(signature)?;
    let values: Vec<DynSolValue> = args.iter().map(DynSolValue::from).collect();
    function
        .abi_encode_input(&values)
        .with_context(|| format!("Arguments do not match {}", signature))
}

/// Decode a single `bytes32` return value.
pub fn decode_bytes32(data: &[u8]) -> anyhow::Result<B256> {
    match DynSolType::FixedBytes(32)
        .abi_decode(data)
        .context("Failed to decode bytes32 return data")?
    {
        DynSolValue::FixedBytes(word, 32) => Ok(word),
        other => anyhow::bail!("Expected bytes32 return data, got {:?}", other),
    }
}
