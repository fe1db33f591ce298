//! Passkey authentication.
//!
//! This module contains:
//! - `challenge`: short-lived WebAuthn challenge store
//! - `webauthn`: P-256 assertion/attestation verification
//! - `passkey`: the register/login protocol and session binding
//! - `session`: opaque login-session store
//! - `test_support`: payload builders for tests without a real authenticator

pub mod challenge;
pub mod passkey;
pub mod session;
pub mod test_support;
pub mod webauthn;

// Re-export key types
pub use challenge::ChallengeStore;
pub use passkey::{AuthenticatedSession, PasskeyAuthProtocol};
pub use session::SessionStore;
pub use webauthn::P256PublicKey;
