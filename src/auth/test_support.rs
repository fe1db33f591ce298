//! Helpers for constructing valid WebAuthn payloads in tests.
//!
//! Kept out of `#[cfg(test)]` so integration tests can drive the full
//! registration and login flows without a real authenticator.

use alloy_primitives::B256;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::ecdsa::{Signature, SigningKey, signature::hazmat::PrehashSigner};
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};

use super::webauthn::{Ceremony, P256PublicKey};

/// Generate a fresh P-256 keypair.
pub fn test_keypair() -> (SigningKey, P256PublicKey) {
    let signing_key = SigningKey::random(&mut OsRng);
    let point = signing_key.verifying_key().to_encoded_point(false);
    let public_key = P256PublicKey {
        x: B256::from_slice(point.x().expect("uncompressed point")),
        y: B256::from_slice(point.y().expect("uncompressed point")),
    };
    (signing_key, public_key)
}

/// Build a signed WebAuthn payload for the given challenge and ceremony.
///
/// Returns `(authenticatorData || clientDataJSON, r, s)` the way a browser
/// authenticator would produce them. Attestations carry the AT flag and a
/// dummy attested-credential block to exercise the payload-splitting path.
pub fn webauthn_proof(
    signing_key: &SigningKey,
    challenge: &B256,
    ceremony: Ceremony,
) -> (Vec<u8>, B256, B256) {
    let mut authenticator_data = vec![0u8; 37];
    authenticator_data[32] = match ceremony {
        Ceremony::Create => 0x41, // UP + AT
        Ceremony::Get => 0x01,    // UP
    };
    if ceremony == Ceremony::Create {
        // Dummy attested credential data of arbitrary length
        authenticator_data.extend_from_slice(&[0xCB; 24]);
    }

    let type_str = match ceremony {
        Ceremony::Create => "webauthn.create",
        Ceremony::Get => "webauthn.get",
    };
    let challenge_b64 = URL_SAFE_NO_PAD.encode(challenge.as_slice());
    let client_data_json =
        format!("{{\"type\":\"{type_str}\",\"challenge\":\"{challenge_b64}\",\"origin\":\"http://localhost:3000\"}}");

    let client_data_hash = Sha256::digest(client_data_json.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(&authenticator_data);
    hasher.update(client_data_hash);
    let message_hash = hasher.finalize();

    let signature: Signature = signing_key
        .sign_prehash(message_hash.as_slice())
        .expect("prehash signing");
    let sig_bytes = signature.to_bytes();

    let mut payload = authenticator_data;
    payload.extend_from_slice(client_data_json.as_bytes());

    (
        payload,
        B256::from_slice(&sig_bytes[..32]),
        B256::from_slice(&sig_bytes[32..]),
    )
}
