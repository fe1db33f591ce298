//! Safe and ERC-4337 domain types.
//!
//! This module defines the call model, the v0.7 user-operation shape, the
//! canonical user-operation hash, and the ERC-7579 execution encodings the
//! protocols build on. Everything hashes and packs exactly the way the
//! EntryPoint 0.7 contract does; tests below pin the derived constants.

use std::time::Instant;

use alloy_primitives::{Address, B256, Bytes, U256, address, keccak256};
use serde::{Deserialize, Serialize};

use crate::abi::{self, AbiValue, ContractAbi};
use crate::error::{OrchestratorError, OrchestratorResult};

/// ERC-4337 EntryPoint v0.7.
pub const ENTRY_POINT_07: Address = address!("0000000071727de22e5e9d8baf0edac6f37da032");

/// Safe ERC-7579 adapter module (Safe7579).
pub const SAFE_4337_MODULE: Address = address!("7579ee8307284f293b1927136486880611f20002");

/// Rhinestone ownable validator module.
pub const OWNABLE_VALIDATOR: Address = address!("2483da3a338895199e5e538530213157e931bf06");

/// Rhinestone WebAuthn validator module.
pub const WEBAUTHN_VALIDATOR: Address = address!("2f167e55d42584f65e2e30a748f41ee75a311414");

/// Rhinestone smart sessions validator module.
pub const SMART_SESSIONS_VALIDATOR: Address = address!("00000000002b0ecfbd0496ee71e01257da0e37de");

/// Sentinel head of the Safe owner linked list.
pub const SENTINEL_OWNER: Address = address!("0000000000000000000000000000000000000001");

/// ERC-7579 module type id for validators.
pub const MODULE_TYPE_VALIDATOR: u64 = 1;

/// Balance injected via state override during gas estimation so the
/// account's real balance never causes a false insufficient-funds failure.
pub const ESTIMATION_BALANCE_OVERRIDE: u128 = 1_000_000_000_000_000_000_000; // 1000 ether

/// The deterministic owner no key can ever control: the first twenty bytes
/// of `keccak256` of the zero address. Installed as the sole remaining
/// legacy owner once bootstrap completes.
pub fn unspendable_owner() -> Address {
    let hash = keccak256([0u8; 20]);
    Address::from_slice(&hash[..20])
}

/// Encode a validator module address into an ERC-4337 nonce key.
///
/// The EntryPoint nonce is `key (192 bits) || sequence (64 bits)`; the Safe
/// adapter routes validation to the module packed into the key's high bits.
pub fn validator_nonce_key(validator: Address) -> U256 {
    U256::from_be_slice(validator.as_slice()) << 32
}

/// Well-formed placeholder signature used only to pass gas estimation.
pub fn mock_ecdsa_signature() -> Bytes {
    let mut sig = vec![0xff_u8; 65];
    sig[64] = 0x1c;
    Bytes::from(sig)
}

// =============================================================================
// Calls
// =============================================================================

/// One call requested by a client, before ABI resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Call {
    /// Raw call data supplied directly.
    #[serde(rename = "call", rename_all = "camelCase")]
    Raw {
        to: Address,
        #[serde(default)]
        value: U256,
        data: Bytes,
    },
    /// Contract call to be encoded from an ABI (supplied or resolved).
    #[serde(rename = "contractCall", rename_all = "camelCase")]
    Contract {
        to: Address,
        #[serde(default)]
        value: U256,
        function_name: String,
        args: Vec<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        abi: Option<serde_json::Value>,
    },
}

impl Call {
    pub fn to(&self) -> Address {
        match self {
            Self::Raw { to, .. } | Self::Contract { to, .. } => *to,
        }
    }
}

/// A call with its executable payload resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl ResolvedCall {
    /// Resolve a raw call as-is, or encode a contract call against the given ABI.
    pub fn from_call(call: &Call, resolved_abi: Option<&ContractAbi>) -> OrchestratorResult<Self> {
        match call {
            Call::Raw { to, value, data } => Ok(Self {
                to: *to,
                value: *value,
                data: data.clone(),
            }),
            Call::Contract {
                to,
                value,
                function_name,
                args,
                ..
            } => {
                let abi = resolved_abi.ok_or_else(|| {
                    OrchestratorError::AbiUnavailable(to.to_string())
                })?;
                let function = abi.function(function_name)?;
                Ok(Self {
                    to: *to,
                    value: *value,
                    data: function.encode_call_json(args)?,
                })
            }
        }
    }
}

// =============================================================================
// ERC-7579 execution encoding
// =============================================================================

/// Encode calldata for the adapter's `execute(bytes32 mode, bytes executionCalldata)`.
///
/// Single calls use the packed `target || value || data` form (call type
/// `0x00`), batches the `Execution[]` tuple-array form (call type `0x01`).
pub fn encode_execute(calls: &[ResolvedCall]) -> OrchestratorResult<Bytes> {
    if calls.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "At least one call is required".to_string(),
        ));
    }

    let mut mode = [0u8; 32];
    let execution = if calls.len() == 1 {
        let call = &calls[0];
        let mut packed = Vec::with_capacity(52 + call.data.len());
        packed.extend_from_slice(call.to.as_slice());
        packed.extend_from_slice(&call.value.to_be_bytes::<32>());
        packed.extend_from_slice(&call.data);
        packed
    } else {
        mode[0] = 0x01;
        encode_execution_batch(calls)
    };

    Ok(abi::encode_call(
        "execute(bytes32,bytes)",
        &[
            AbiValue::FixedBytes(B256::from(mode)),
            AbiValue::Bytes(Bytes::from(execution)),
        ],
    ))
}

/// `abi.encode(Execution[])` where `Execution = (address, uint256, bytes)`.
fn encode_execution_batch(calls: &[ResolvedCall]) -> Vec<u8> {
    let head_size = calls.len() * 32;
    let mut heads = Vec::with_capacity(head_size);
    let mut tails: Vec<u8> = Vec::new();

    for call in calls {
        let offset = U256::from(head_size + tails.len());
        heads.extend_from_slice(&offset.to_be_bytes::<32>());
        // Each tuple encodes like an argument list
        tails.extend_from_slice(&abi::encode_args(&[
            AbiValue::Address(call.to),
            AbiValue::Uint(call.value),
            AbiValue::Bytes(call.data.clone()),
        ]));
    }

    let mut out = Vec::with_capacity(64 + heads.len() + tails.len());
    out.extend_from_slice(&U256::from(32).to_be_bytes::<32>()); // offset to array
    out.extend_from_slice(&U256::from(calls.len()).to_be_bytes::<32>());
    out.extend_from_slice(&heads);
    out.extend_from_slice(&tails);
    out
}

// =============================================================================
// User operations (EntryPoint v0.7)
// =============================================================================

/// An unsigned ERC-4337 v0.7 user operation in its unpacked wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_data: Option<Bytes>,
}

impl UnsignedUserOperation {
    fn init_code(&self) -> Vec<u8> {
        match self.factory {
            Some(factory) => {
                let mut out = factory.to_vec();
                if let Some(data) = &self.factory_data {
                    out.extend_from_slice(data);
                }
                out
            }
            None => Vec::new(),
        }
    }

    fn paymaster_and_data(&self) -> Vec<u8> {
        match self.paymaster {
            Some(paymaster) => {
                let mut out = paymaster.to_vec();
                out.extend_from_slice(&low_16(
                    self.paymaster_verification_gas_limit.unwrap_or_default(),
                ));
                out.extend_from_slice(&low_16(
                    self.paymaster_post_op_gas_limit.unwrap_or_default(),
                ));
                if let Some(data) = &self.paymaster_data {
                    out.extend_from_slice(data);
                }
                out
            }
            None => Vec::new(),
        }
    }

    /// The canonical v0.7 operation hash: the only value an external signer
    /// needs to sign.
    ///
    /// `keccak256(abi.encode(keccak256(packedFields), entryPoint, chainId))`
    /// with gas limits and fee fields packed pairwise into single words.
    pub fn hash(&self, chain_id: u64, entry_point: Address) -> B256 {
        let mut account_gas_limits = [0u8; 32];
        account_gas_limits[..16].copy_from_slice(&low_16(self.verification_gas_limit));
        account_gas_limits[16..].copy_from_slice(&low_16(self.call_gas_limit));

        let mut gas_fees = [0u8; 32];
        gas_fees[..16].copy_from_slice(&low_16(self.max_priority_fee_per_gas));
        gas_fees[16..].copy_from_slice(&low_16(self.max_fee_per_gas));

        let mut packed = Vec::with_capacity(8 * 32);
        packed.extend_from_slice(&address_word(self.sender));
        packed.extend_from_slice(&self.nonce.to_be_bytes::<32>());
        packed.extend_from_slice(keccak256(self.init_code()).as_slice());
        packed.extend_from_slice(keccak256(&self.call_data).as_slice());
        packed.extend_from_slice(&account_gas_limits);
        packed.extend_from_slice(&self.pre_verification_gas.to_be_bytes::<32>());
        packed.extend_from_slice(&gas_fees);
        packed.extend_from_slice(keccak256(self.paymaster_and_data()).as_slice());

        let inner = keccak256(&packed);

        let mut outer = Vec::with_capacity(3 * 32);
        outer.extend_from_slice(inner.as_slice());
        outer.extend_from_slice(&address_word(entry_point));
        outer.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());

        keccak256(&outer)
    }
}

/// An address right-aligned in a 32-byte word.
fn address_word(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

/// The lower sixteen big-endian bytes of a gas quantity.
fn low_16(value: U256) -> [u8; 16] {
    let bytes = value.to_be_bytes::<32>();
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[16..]);
    out
}

/// A user operation with its signature attached, ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUserOperation {
    #[serde(flatten)]
    pub operation: UnsignedUserOperation,
    pub signature: Bytes,
}

/// A prepared operation awaiting its external signature, keyed by hash.
#[derive(Debug, Clone)]
pub struct PendingUserOperation {
    pub chain_id: u64,
    pub operation: UnsignedUserOperation,
    pub created_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_operation() -> UnsignedUserOperation {
        UnsignedUserOperation {
            sender: address!("1111111111111111111111111111111111111111"),
            nonce: U256::from(5),
            factory: None,
            factory_data: None,
            call_data: Bytes::from(vec![0x12, 0x34]),
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(200_000),
            pre_verification_gas: U256::from(50_000),
            max_fee_per_gas: U256::from(2_000_000_000_u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000_u64),
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
        }
    }

    #[test]
    fn test_unspendable_owner_derivation() {
        // First 20 bytes of keccak256 of the 20-byte zero address
        assert_eq!(
            unspendable_owner(),
            address!("5380c7b7ae81a58eb98d9c78de4a1fd7fd9535fc")
        );
    }

    #[test]
    fn test_validator_nonce_key_layout() {
        let key = validator_nonce_key(OWNABLE_VALIDATOR);
        // Address occupies bits 32..192 of the 192-bit key
        assert_eq!(key >> 32, U256::from_be_slice(OWNABLE_VALIDATOR.as_slice()));
        assert_eq!(key & U256::from(u32::MAX), U256::ZERO);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let op = sample_operation();
        assert_eq!(
            op.hash(11_155_111, ENTRY_POINT_07),
            op.hash(11_155_111, ENTRY_POINT_07)
        );
    }

    #[test]
    fn test_hash_differs_on_nonce_and_chain() {
        let op = sample_operation();
        let mut other = sample_operation();
        other.nonce = U256::from(6);

        assert_ne!(
            op.hash(11_155_111, ENTRY_POINT_07),
            other.hash(11_155_111, ENTRY_POINT_07)
        );
        assert_ne!(
            op.hash(11_155_111, ENTRY_POINT_07),
            op.hash(1, ENTRY_POINT_07)
        );
    }

    #[test]
    fn test_single_execute_encoding() {
        let call = ResolvedCall {
            to: address!("2222222222222222222222222222222222222222"),
            value: U256::from(7),
            data: Bytes::from(vec![0xAB, 0xCD]),
        };
        let encoded = encode_execute(std::slice::from_ref(&call)).unwrap();

        // ERC-7579 execute selector
        assert_eq!(&encoded[..4], &[0xe9, 0xae, 0x5c, 0x53]);
        // Mode word call type 0x00 (single)
        assert_eq!(encoded[4], 0x00);
        // Packed execution starts with the target address
        let body_start = 4 + 32 + 32 + 32; // selector + mode + offset + length
        assert_eq!(&encoded[body_start..body_start + 20], call.to.as_slice());
    }

    #[test]
    fn test_batch_execute_encoding() {
        let calls = vec![
            ResolvedCall {
                to: address!("2222222222222222222222222222222222222222"),
                value: U256::ZERO,
                data: Bytes::from(vec![0x01]),
            },
            ResolvedCall {
                to: address!("3333333333333333333333333333333333333333"),
                value: U256::from(1),
                data: Bytes::new(),
            },
        ];
        let encoded = encode_execute(&calls).unwrap();

        // Mode word call type 0x01 (batch)
        assert_eq!(encoded[4], 0x01);
        // Execution calldata begins with the outer array offset word (0x20)
        let body_start = 4 + 32 + 32 + 32;
        assert_eq!(
            U256::from_be_slice(&encoded[body_start..body_start + 32]),
            U256::from(32)
        );
        // Followed by the element count
        assert_eq!(
            U256::from_be_slice(&encoded[body_start + 32..body_start + 64]),
            U256::from(2)
        );
    }

    #[test]
    fn test_empty_calls_rejected() {
        assert!(matches!(
            encode_execute(&[]),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolved_call_without_abi_fails() {
        let call = Call::Contract {
            to: address!("4444444444444444444444444444444444444444"),
            value: U256::ZERO,
            function_name: "transfer".to_string(),
            args: vec![],
            abi: None,
        };
        assert!(matches!(
            ResolvedCall::from_call(&call, None),
            Err(OrchestratorError::AbiUnavailable(_))
        ));
    }

    #[test]
    fn test_operation_serde_camel_case() {
        let op = sample_operation();
        let json = serde_json::to_value(&op).unwrap();
        assert!(json.get("callData").is_some());
        assert!(json.get("maxFeePerGas").is_some());
        // Absent optional fields are omitted from the wire form
        assert!(json.get("paymaster").is_none());
    }
}
