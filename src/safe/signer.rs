//! secp256k1 EOA signing.
//!
//! Used for the bootstrap deployer key and the ephemeral smart-session keys.
//! Key material is zeroized on drop and is never serialized or logged.

use alloy_primitives::{Address, B256, Bytes, keccak256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use k256::elliptic_curve::rand_core::OsRng;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroizing;

use crate::error::{OrchestratorError, OrchestratorResult};

/// A secp256k1 signer with its derived Ethereum address.
pub struct EoaSigner {
    key: SigningKey,
    address: Address,
}

impl EoaSigner {
    /// Generate a fresh random keypair.
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Load a signer from a hex-encoded private key (with or without 0x).
    pub fn from_hex(hex_key: &str) -> OrchestratorResult<Self> {
        let stripped = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = Zeroizing::new(hex::decode(stripped).map_err(|_| {
            OrchestratorError::InvalidInput("Private key is not valid hex".to_string())
        })?);
        let key = SigningKey::from_slice(&bytes).map_err(|_| {
            OrchestratorError::InvalidInput("Private key is not a valid secp256k1 scalar".to_string())
        })?;
        Ok(Self::from_signing_key(key))
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let address = derive_address(&key);
        Self { key, address }
    }

    /// The signer's Ethereum address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte prehash, returning `(signature, y_parity)`.
    pub fn sign_prehash(&self, hash: &B256) -> OrchestratorResult<(Signature, bool)> {
        let (signature, recovery_id): (Signature, RecoveryId) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| OrchestratorError::Internal(format!("Signing failed: {e}")))?;
        Ok((signature, recovery_id.is_y_odd()))
    }

    /// Sign a prehash into the 65-byte `r || s || v` form with `v` 27/28.
    pub fn sign_hash(&self, hash: &B256) -> OrchestratorResult<Bytes> {
        let (signature, y_odd) = self.sign_prehash(hash)?;
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.r().to_bytes());
        out.extend_from_slice(&signature.s().to_bytes());
        out.push(27 + u8::from(y_odd));
        Ok(Bytes::from(out))
    }

    /// Sign a 32-byte value as an Ethereum personal message
    /// (`"\x19Ethereum Signed Message:\n32" || value`).
    pub fn sign_personal(&self, value: &B256) -> OrchestratorResult<Bytes> {
        let mut message = b"\x19Ethereum Signed Message:\n32".to_vec();
        message.extend_from_slice(value.as_slice());
        self.sign_hash(&keccak256(&message))
    }
}

impl std::fmt::Debug for EoaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material
        f.debug_struct("EoaSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Ethereum address: last twenty bytes of keccak256 of the uncompressed
/// public key (without the 0x04 marker).
fn derive_address(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_address_derivation() {
        // First anvil development account
        let signer = EoaSigner::from_hex(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        assert_eq!(
            signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn test_signature_shape() {
        let signer = EoaSigner::random();
        let sig = signer.sign_hash(&B256::repeat_byte(0x42)).unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] == 27 || sig[64] == 28);
    }

    #[test]
    fn test_personal_sign_differs_from_raw() {
        let signer = EoaSigner::random();
        let hash = B256::repeat_byte(0x42);
        assert_ne!(
            signer.sign_hash(&hash).unwrap(),
            signer.sign_personal(&hash).unwrap()
        );
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(EoaSigner::from_hex("zz").is_err());
        assert!(EoaSigner::from_hex("0x00").is_err());
    }
}
