//! Minimal contract-ABI support for call-data encoding.
//!
//! The orchestrator only ever encodes calls against a small set of parameter
//! kinds (the Safe management surface plus whatever an explorer-resolved ABI
//! describes), so this module implements standard head/tail ABI encoding for
//! that subset rather than pulling in a full ABI compiler. Unsupported
//! parameter kinds are rejected as invalid input, never silently skipped.

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// A typed argument value ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    FixedBytes(B256),
    Bytes(Bytes),
    String(String),
    AddressArray(Vec<Address>),
}

impl AbiValue {
    fn is_dynamic(&self) -> bool {
        matches!(
            self,
            Self::Bytes(_) | Self::String(_) | Self::AddressArray(_)
        )
    }

    /// Encode the static head word for this value.
    fn head_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            Self::Address(addr) => word[12..].copy_from_slice(addr.as_slice()),
            Self::Uint(value) => word = value.to_be_bytes::<32>(),
            Self::Bool(value) => word[31] = u8::from(*value),
            Self::FixedBytes(bytes) => word.copy_from_slice(bytes.as_slice()),
            // Dynamic values never use head_word directly; the offset is
            // written by the caller.
            Self::Bytes(_) | Self::String(_) | Self::AddressArray(_) => {}
        }
        word
    }

    /// Encode the tail section for dynamic values.
    fn tail(&self) -> Vec<u8> {
        match self {
            Self::Bytes(data) => encode_length_prefixed(data),
            Self::String(data) => encode_length_prefixed(data.as_bytes()),
            Self::AddressArray(addrs) => {
                let mut out = Vec::with_capacity(32 + addrs.len() * 32);
                out.extend_from_slice(&U256::from(addrs.len()).to_be_bytes::<32>());
                for addr in addrs {
                    out.extend_from_slice(&Self::Address(*addr).head_word());
                }
                out
            }
            _ => Vec::new(),
        }
    }
}

fn encode_length_prefixed(data: &[u8]) -> Vec<u8> {
    let padded_len = data.len().div_ceil(32) * 32;
    let mut out = Vec::with_capacity(32 + padded_len);
    out.extend_from_slice(&U256::from(data.len()).to_be_bytes::<32>());
    out.extend_from_slice(data);
    out.resize(32 + padded_len, 0);
    out
}

/// Standard head/tail encoding of an argument list (no selector).
pub fn encode_args(args: &[AbiValue]) -> Vec<u8> {
    let head_size = args.len() * 32;
    let mut head = Vec::with_capacity(head_size);
    let mut tail: Vec<u8> = Vec::new();

    for arg in args {
        if arg.is_dynamic() {
            let offset = U256::from(head_size + tail.len());
            head.extend_from_slice(&offset.to_be_bytes::<32>());
            tail.extend_from_slice(&arg.tail());
        } else {
            head.extend_from_slice(&arg.head_word());
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Compute the 4-byte selector for a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a full call: selector of `signature` followed by encoded `args`.
///
/// `signature` must already be canonical, e.g. `addOwnerWithThreshold(address,uint256)`.
pub fn encode_call(signature: &str, args: &[AbiValue]) -> Bytes {
    let mut out = Vec::with_capacity(4 + args.len() * 32);
    out.extend_from_slice(&selector(signature));
    out.extend_from_slice(&encode_args(args));
    Bytes::from(out)
}

// =============================================================================
// JSON ABI fragments (explorer-resolved)
// =============================================================================

/// One parameter of an ABI fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// One fragment of a standard JSON ABI. Non-function fragments are carried
/// but never encoded against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiFragment {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
}

/// A parsed contract ABI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractAbi(pub Vec<AbiFragment>);

impl ContractAbi {
    /// Parse a JSON ABI document (the array form returned by explorers).
    pub fn parse(json: &serde_json::Value) -> OrchestratorResult<Self> {
        serde_json::from_value(json.clone()).map_err(|e| {
            OrchestratorError::Deserialization(format!("Malformed contract ABI: {e}"))
        })
    }

    /// Find a function fragment by name.
    pub fn function(&self, name: &str) -> OrchestratorResult<&AbiFragment> {
        self.0
            .iter()
            .find(|f| f.kind == "function" && f.name == name)
            .ok_or_else(|| {
                OrchestratorError::InvalidInput(format!("Function {name} not present in ABI"))
            })
    }
}

impl AbiFragment {
    /// Canonical signature, e.g. `transfer(address,uint256)`.
    pub fn signature(&self) -> String {
        let kinds: Vec<&str> = self.inputs.iter().map(|p| p.kind.as_str()).collect();
        format!("{}({})", self.name, kinds.join(","))
    }

    /// Encode a call to this function from loosely-typed JSON arguments.
    pub fn encode_call_json(&self, args: &[serde_json::Value]) -> OrchestratorResult<Bytes> {
        if args.len() != self.inputs.len() {
            return Err(OrchestratorError::InvalidInput(format!(
                "Function {} expects {} arguments, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }

        let values: Vec<AbiValue> = self
            .inputs
            .iter()
            .zip(args)
            .map(|(param, value)| coerce_json(&param.kind, value))
            .collect::<OrchestratorResult<_>>()?;

        Ok(encode_call(&self.signature(), &values))
    }
}

/// Coerce a JSON argument into a typed value guided by the ABI parameter kind.
fn coerce_json(kind: &str, value: &serde_json::Value) -> OrchestratorResult<AbiValue> {
    let type_error = |expected: &str| {
        OrchestratorError::InvalidInput(format!(
            "Argument {value} is not a valid {expected} for ABI type {kind}"
        ))
    };

    match kind {
        "address" => {
            let s = value.as_str().ok_or_else(|| type_error("address"))?;
            let addr: Address = s.parse().map_err(|_| type_error("address"))?;
            Ok(AbiValue::Address(addr))
        }
        k if k.starts_with("uint") || k.starts_with("int") => {
            let parsed = match value {
                serde_json::Value::Number(n) => n.as_u64().map(U256::from),
                serde_json::Value::String(s) => parse_uint(s),
                _ => None,
            };
            parsed
                .map(AbiValue::Uint)
                .ok_or_else(|| type_error("unsigned integer"))
        }
        "bool" => value
            .as_bool()
            .map(AbiValue::Bool)
            .ok_or_else(|| type_error("bool")),
        "bytes32" => {
            let s = value.as_str().ok_or_else(|| type_error("bytes32"))?;
            let bytes: B256 = s.parse().map_err(|_| type_error("bytes32"))?;
            Ok(AbiValue::FixedBytes(bytes))
        }
        "bytes" => {
            let s = value.as_str().ok_or_else(|| type_error("bytes"))?;
            let bytes: Bytes = s.parse().map_err(|_| type_error("bytes"))?;
            Ok(AbiValue::Bytes(bytes))
        }
        "string" => value
            .as_str()
            .map(|s| AbiValue::String(s.to_string()))
            .ok_or_else(|| type_error("string")),
        "address[]" => {
            let items = value.as_array().ok_or_else(|| type_error("address[]"))?;
            let addrs: Vec<Address> = items
                .iter()
                .map(|item| {
                    item.as_str()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| type_error("address[]"))
                })
                .collect::<OrchestratorResult<_>>()?;
            Ok(AbiValue::AddressArray(addrs))
        }
        other => Err(OrchestratorError::InvalidInput(format!(
            "Unsupported ABI parameter type {other}"
        ))),
    }
}

/// Parse a decimal or 0x-prefixed hexadecimal unsigned integer.
pub fn parse_uint(s: &str) -> Option<U256> {
    if let Some(hex_part) = s.strip_prefix("0x") {
        U256::from_str_radix(hex_part, 16).ok()
    } else {
        U256::from_str_radix(s, 10).ok()
    }
}

// =============================================================================
// Return-data decoding
// =============================================================================

fn read_word(data: &[u8], offset: usize) -> OrchestratorResult<&[u8]> {
    offset
        .checked_add(32)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| OrchestratorError::Deserialization("Return data truncated".to_string()))
}

fn read_usize(data: &[u8], offset: usize) -> OrchestratorResult<usize> {
    let word = read_word(data, offset)?;
    let value = U256::from_be_slice(word);
    usize::try_from(value).map_err(|_| {
        OrchestratorError::Deserialization("Return data offset out of range".to_string())
    })
}

/// Decode a single `uint256` return value.
pub fn decode_uint(data: &[u8]) -> OrchestratorResult<U256> {
    Ok(U256::from_be_slice(read_word(data, 0)?))
}

/// Decode a single `address[]` return value (e.g. Safe `getOwners()`).
pub fn decode_address_array(data: &[u8]) -> OrchestratorResult<Vec<Address>> {
    let offset = read_usize(data, 0)?;
    let len = read_usize(data, offset)?;
    if len > data.len() / 32 {
        return Err(OrchestratorError::Deserialization(
            "Return data length out of range".to_string(),
        ));
    }

    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let word = read_word(data, offset + 32 + i * 32)?;
        out.push(Address::from_slice(&word[12..]));
    }
    Ok(out)
}
