//! WebAuthn P-256 assertion verification.
//!
//! The client submits `authenticatorData || clientDataJSON` plus the raw
//! P-256 signature components. Verification checks the ceremony type, the
//! challenge echo, the user-presence flag, optionally the relying-party id
//! hash, and finally the signature over
//! `sha256(authenticatorData || sha256(clientDataJSON))`.

use alloy_primitives::B256;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::{
    EncodedPoint,
    ecdsa::{Signature as P256Signature, VerifyingKey, signature::hazmat::PrehashVerifier},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Minimum authenticatorData length: 32-byte rpIdHash + flags + signCount.
const MIN_AUTH_DATA_LEN: usize = 37;

/// An uncompressed P-256 public key as affine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct P256PublicKey {
    pub x: B256,
    pub y: B256,
}

/// Which WebAuthn ceremony a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceremony {
    /// Registration (attestation).
    Create,
    /// Login (assertion).
    Get,
}

impl Ceremony {
    fn expected_type(self) -> &'static str {
        match self {
            Self::Create => "\"type\":\"webauthn.create\"",
            Self::Get => "\"type\":\"webauthn.get\"",
        }
    }
}

/// Verify a WebAuthn payload against a challenge and public key.
pub fn verify(
    webauthn_data: &[u8],
    r: &B256,
    s: &B256,
    public_key: &P256PublicKey,
    challenge: &B256,
    ceremony: Ceremony,
    rp_id: Option<&str>,
) -> OrchestratorResult<()> {
    let message_hash = validate_payload(webauthn_data, challenge, ceremony, rp_id)?;
    verify_p256_signature(r, s, public_key, &message_hash)
}

/// Parse and validate the WebAuthn payload, returning the hash the P-256
/// signature must cover.
fn validate_payload(
    webauthn_data: &[u8],
    challenge: &B256,
    ceremony: Ceremony,
    rp_id: Option<&str>,
) -> OrchestratorResult<B256> {
    let invalid = |msg: &str| OrchestratorError::SignatureInvalid(msg.to_string());

    if webauthn_data.len() < MIN_AUTH_DATA_LEN {
        return Err(invalid("WebAuthn payload too short"));
    }

    // Find the split between authenticatorData and clientDataJSON. When the
    // AT flag (bit 6) is set the authenticator appended attested credential
    // data of variable length, so the split is located by scanning for the
    // JSON document.
    let flags = webauthn_data[32];
    let at_flag_set = (flags & 0x40) != 0;

    let mut split = None;
    if at_flag_set {
        for candidate in MIN_AUTH_DATA_LEN..webauthn_data.len().saturating_sub(20) {
            if looks_like_client_data(&webauthn_data[candidate..]) {
                split = Some(candidate);
                break;
            }
        }
    } else if webauthn_data.len() > MIN_AUTH_DATA_LEN
        && looks_like_client_data(&webauthn_data[MIN_AUTH_DATA_LEN..])
    {
        split = Some(MIN_AUTH_DATA_LEN);
    }

    let split = split.ok_or_else(|| invalid("Failed to locate clientDataJSON"))?;
    let authenticator_data = &webauthn_data[..split];
    let client_data_json = &webauthn_data[split..];

    // User Presence (UP) flag must be set
    if (authenticator_data[32] & 0x01) == 0 {
        return Err(invalid("User presence flag not set"));
    }

    if let Some(rp_id) = rp_id {
        let rp_id_hash = Sha256::digest(rp_id.as_bytes());
        if &authenticator_data[..32] != rp_id_hash.as_slice() {
            return Err(invalid("Relying-party id mismatch"));
        }
    }

    let json_str = core::str::from_utf8(client_data_json)
        .map_err(|_| invalid("clientDataJSON is not valid UTF-8"))?;

    if !json_str.contains(ceremony.expected_type()) {
        return Err(invalid("Unexpected WebAuthn ceremony type"));
    }

    // The authenticator echoes the challenge Base64URL-encoded
    let challenge_b64url = URL_SAFE_NO_PAD.encode(challenge.as_slice());
    let challenge_property = format!("\"challenge\":\"{challenge_b64url}\"");
    if !json_str.contains(&challenge_property) {
        return Err(invalid("Challenge echo mismatch"));
    }

    // messageHash = sha256(authenticatorData || sha256(clientDataJSON))
    let client_data_hash = Sha256::digest(client_data_json);
    let mut hasher = Sha256::new();
    hasher.update(authenticator_data);
    hasher.update(client_data_hash);
    Ok(B256::from_slice(hasher.finalize().as_slice()))
}

fn looks_like_client_data(candidate: &[u8]) -> bool {
    match core::str::from_utf8(candidate) {
        Ok(json) => {
            json.starts_with('{')
                && json.ends_with('}')
                && json.contains("\"type\"")
                && json.contains("\"challenge\"")
        }
        Err(_) => false,
    }
}

fn verify_p256_signature(
    r: &B256,
    s: &B256,
    public_key: &P256PublicKey,
    message_hash: &B256,
) -> OrchestratorResult<()> {
    let invalid = |msg: &str| OrchestratorError::SignatureInvalid(msg.to_string());

    // Uncompressed point: 0x04 || x || y
    let mut point_bytes = [0u8; 65];
    point_bytes[0] = 0x04;
    point_bytes[1..33].copy_from_slice(public_key.x.as_slice());
    point_bytes[33..65].copy_from_slice(public_key.y.as_slice());

    let encoded_point = EncodedPoint::from_bytes(point_bytes)
        .map_err(|_| invalid("Invalid P-256 public key encoding"))?;
    let verifying_key = VerifyingKey::from_encoded_point(&encoded_point)
        .map_err(|_| invalid("Invalid P-256 public key"))?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(r.as_slice());
    sig_bytes[32..].copy_from_slice(s.as_slice());
    let signature = P256Signature::from_bytes(&sig_bytes.into())
        .map_err(|_| invalid("Invalid P-256 signature encoding"))?;

    // The authenticator signs the prehash sha256(authData || clientDataHash)
    verifying_key
        .verify_prehash(message_hash.as_slice(), &signature)
        .map_err(|_| invalid("P-256 signature verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{test_keypair, webauthn_proof};

    #[test]
    fn test_valid_assertion_roundtrip() {
        let (signing_key, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0xAA);
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);

        verify(&data, &r, &s, &public_key, &challenge, Ceremony::Get, None).unwrap();
    }

    #[test]
    fn test_valid_attestation_with_at_flag() {
        let (signing_key, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0x42);
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Create);

        verify(
            &data,
            &r,
            &s,
            &public_key,
            &challenge,
            Ceremony::Create,
            None,
        )
        .unwrap();
    }

    #[test]
    fn test_wrong_ceremony_rejected() {
        let (signing_key, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0xAA);
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);

        let err = verify(
            &data,
            &r,
            &s,
            &public_key,
            &challenge,
            Ceremony::Create,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::SignatureInvalid(_)));
    }

    #[test]
    fn test_challenge_mismatch_rejected() {
        let (signing_key, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0xAA);
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);

        let other_challenge = B256::repeat_byte(0xBB);
        let err = verify(
            &data,
            &r,
            &s,
            &public_key,
            &other_challenge,
            Ceremony::Get,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::SignatureInvalid(_)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (signing_key, _) = test_keypair();
        let (_, other_public) = test_keypair();
        let challenge = B256::repeat_byte(0xAA);
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);

        let err = verify(&data, &r, &s, &other_public, &challenge, Ceremony::Get, None)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SignatureInvalid(_)));
    }

    #[test]
    fn test_missing_up_flag_rejected() {
        let (_, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0xAA);

        let mut data = vec![0u8; MIN_AUTH_DATA_LEN];
        data[32] = 0x00; // UP not set
        let challenge_b64 = URL_SAFE_NO_PAD.encode(challenge.as_slice());
        data.extend_from_slice(
            format!("{{\"type\":\"webauthn.get\",\"challenge\":\"{challenge_b64}\"}}").as_bytes(),
        );

        let err = verify(
            &data,
            &B256::ZERO,
            &B256::ZERO,
            &public_key,
            &challenge,
            Ceremony::Get,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::SignatureInvalid(_)));
    }

    #[test]
    fn test_short_payload_rejected() {
        let (_, public_key) = test_keypair();
        let err = verify(
            &[0u8; 20],
            &B256::ZERO,
            &B256::ZERO,
            &public_key,
            &B256::ZERO,
            Ceremony::Get,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::SignatureInvalid(_)));
    }

    #[test]
    fn test_rp_id_binding() {
        let (signing_key, public_key) = test_keypair();
        let challenge = B256::repeat_byte(0xAA);
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);

        // The test payload carries a zeroed rpIdHash, so any rp_id mismatches
        let err = verify(
            &data,
            &r,
            &s,
            &public_key,
            &challenge,
            Ceremony::Get,
            Some("example.com"),
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::SignatureInvalid(_)));
    }
}
