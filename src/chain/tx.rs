//! Minimal EIP-1559 transaction encoding.
//!
//! The orchestrator only sends one shape of direct transaction (the Safe
//! owner-management calls that cannot be gas-sponsored), so this module
//! carries just enough RLP to produce an EIP-1559 signing hash and the signed
//! raw bytes for `eth_sendRawTransaction`.

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};

/// EIP-1559 transaction type byte.
const TX_TYPE: u8 = 0x02;

/// An EIP-1559 dynamic-fee transaction with an empty access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Eip1559Transaction {
    /// The hash the sender's key signs: `keccak256(0x02 || rlp(payload))`.
    pub fn signing_hash(&self) -> B256 {
        let mut out = vec![TX_TYPE];
        out.extend_from_slice(&rlp_list(&self.payload_items(None)));
        keccak256(&out)
    }

    /// The signed raw transaction bytes for `eth_sendRawTransaction`.
    pub fn encode_signed(&self, y_parity: bool, r: &B256, s: &B256) -> Bytes {
        let mut out = vec![TX_TYPE];
        out.extend_from_slice(&rlp_list(&self.payload_items(Some((y_parity, r, s)))));
        Bytes::from(out)
    }

    fn payload_items(&self, signature: Option<(bool, &B256, &B256)>) -> Vec<Vec<u8>> {
        let mut items = vec![
            rlp_uint(U256::from(self.chain_id)),
            rlp_uint(U256::from(self.nonce)),
            rlp_uint(self.max_priority_fee_per_gas),
            rlp_uint(self.max_fee_per_gas),
            rlp_uint(U256::from(self.gas_limit)),
            rlp_bytes(self.to.as_slice()),
            rlp_uint(self.value),
            rlp_bytes(&self.data),
            rlp_empty_list(),
        ];
        if let Some((y_parity, r, s)) = signature {
            items.push(rlp_uint(U256::from(u8::from(y_parity))));
            items.push(rlp_uint(U256::from_be_slice(r.as_slice())));
            items.push(rlp_uint(U256::from_be_slice(s.as_slice())));
        }
        items
    }
}

/// RLP-encode an unsigned integer as its minimal big-endian byte string.
fn rlp_uint(value: U256) -> Vec<u8> {
    if value.is_zero() {
        return vec![0x80];
    }
    let bytes = value.to_be_bytes::<32>();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(31);
    rlp_bytes(&bytes[first..])
}

/// RLP-encode a byte string.
fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    match data.len() {
        1 if data[0] < 0x80 => data.to_vec(),
        len if len <= 55 => {
            let mut out = Vec::with_capacity(1 + len);
            out.push(0x80 + len as u8);
            out.extend_from_slice(data);
            out
        }
        len => {
            let len_bytes = minimal_be(len as u64);
            let mut out = Vec::with_capacity(1 + len_bytes.len() + len);
            out.push(0xb7 + len_bytes.len() as u8);
            out.extend_from_slice(&len_bytes);
            out.extend_from_slice(data);
            out
        }
    }
}

/// RLP-encode a list of already-encoded items.
fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(9 + payload_len);
    if payload_len <= 55 {
        out.push(0xc0 + payload_len as u8);
    } else {
        let len_bytes = minimal_be(payload_len as u64);
        out.push(0xf7 + len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn rlp_empty_list() -> Vec<u8> {
    vec![0xc0]
}

fn minimal_be(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn sample_tx() -> Eip1559Transaction {
        Eip1559Transaction {
            chain_id: 11_155_111,
            nonce: 3,
            max_priority_fee_per_gas: U256::from(1_000_000_000_u64),
            max_fee_per_gas: U256::from(20_000_000_000_u64),
            gas_limit: 120_000,
            to: address!("2222222222222222222222222222222222222222"),
            value: U256::ZERO,
            data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
        }
    }

    #[test]
    fn test_rlp_scalar_forms() {
        assert_eq!(rlp_uint(U256::ZERO), vec![0x80]);
        assert_eq!(rlp_uint(U256::from(0x7f)), vec![0x7f]);
        assert_eq!(rlp_uint(U256::from(0x80)), vec![0x81, 0x80]);
        assert_eq!(rlp_uint(U256::from(0x0400)), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn test_rlp_long_string() {
        let data = vec![0xAA; 60];
        let encoded = rlp_bytes(&data);
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 60);
        assert_eq!(&encoded[2..], data.as_slice());
    }

    #[test]
    fn test_signing_hash_prefixed_and_stable() {
        let tx = sample_tx();
        assert_eq!(tx.signing_hash(), tx.signing_hash());

        let mut other = sample_tx();
        other.nonce = 4;
        assert_ne!(tx.signing_hash(), other.signing_hash());
    }

    #[test]
    fn test_signed_encoding_starts_with_type_byte() {
        let tx = sample_tx();
        let raw = tx.encode_signed(true, &B256::repeat_byte(0x11), &B256::repeat_byte(0x22));
        assert_eq!(raw[0], TX_TYPE);
        // Signed payload is strictly longer than the unsigned one
        let mut unsigned = vec![TX_TYPE];
        unsigned.extend_from_slice(&rlp_list(&tx.payload_items(None)));
        assert!(raw.len() > unsigned.len());
    }
}
