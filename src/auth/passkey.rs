//! Passkey authentication protocol.
//!
//! State machine: `Unauthenticated -> ChallengeIssued -> {Registered | LoggedIn}`.
//! The branch is an explicit request discriminator — register challenges are
//! bound to a freshly generated custom id plus the proposed username, login
//! challenges are unbound. A challenge feeds at most one verify call either
//! way; replays fail with `ChallengeInvalid`.

use alloy_primitives::{B256, Bytes};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::challenge::{ChallengeStore, RegistrationClaim};
use super::session::SessionStore;
use super::webauthn::{self, Ceremony, P256PublicKey};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::user::store::UserStore;
use crate::user::types::{PasskeyCredential, User};

/// Challenge request: the caller states up front which branch it is on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ChallengeRequest {
    /// New identity: bind the challenge to a proposed username.
    Register { username: String },
    /// Existing credential: no user binding until the assertion resolves it.
    Login,
}

/// Issued challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge: B256,
}

/// The signed WebAuthn payload accompanying a verify call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebAuthnProof {
    /// `authenticatorData || clientDataJSON` as produced by the authenticator.
    pub webauthn_data: Bytes,
    pub signature_r: B256,
    pub signature_s: B256,
}

/// Registration verify call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub challenge: B256,
    pub credential_id: String,
    pub public_key: P256PublicKey,
    #[serde(flatten)]
    pub proof: WebAuthnProof,
}

/// Login verify call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub challenge: B256,
    pub credential_id: String,
    #[serde(flatten)]
    pub proof: WebAuthnProof,
}

/// An authenticated session binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedSession {
    pub session_id: Uuid,
    pub custom_id: String,
    pub username: String,
}

/// Orchestrates challenges, WebAuthn verification, user records, and session
/// bindings.
pub struct PasskeyAuthProtocol {
    challenges: ChallengeStore,
    sessions: SessionStore,
    users: UserStore,
    rp_id: Option<String>,
}

impl PasskeyAuthProtocol {
    pub fn new(
        challenges: ChallengeStore,
        sessions: SessionStore,
        users: UserStore,
        rp_id: Option<String>,
    ) -> Self {
        Self {
            challenges,
            sessions,
            users,
            rp_id,
        }
    }

    /// Issue a challenge for the requested branch.
    pub fn issue_challenge(&self, request: &ChallengeRequest) -> ChallengeResponse {
        let claim = match request {
            ChallengeRequest::Register { username } => Some(RegistrationClaim {
                custom_id: Uuid::new_v4().to_string(),
                username: username.clone(),
            }),
            ChallengeRequest::Login => None,
        };

        ChallengeResponse {
            challenge: self.challenges.issue(claim),
        }
    }

    /// Complete the registration branch: consume the challenge, verify the
    /// attestation, create the user, bind a session.
    #[tracing::instrument(skip(self, request), fields(credential_id = %request.credential_id))]
    pub fn register(&self, request: &RegisterRequest) -> OrchestratorResult<AuthenticatedSession> {
        // Consuming first enforces at-most-one verify per challenge
        let claim = self
            .challenges
            .take(&request.challenge)?
            .ok_or(OrchestratorError::ChallengeInvalid)?;

        webauthn::verify(
            &request.proof.webauthn_data,
            &request.proof.signature_r,
            &request.proof.signature_s,
            &request.public_key,
            &request.challenge,
            Ceremony::Create,
            self.rp_id.as_deref(),
        )?;

        let credential = PasskeyCredential {
            credential_id: request.credential_id.clone(),
            public_key: request.public_key,
        };
        let user = self
            .users
            .create_with_passkey(&claim.custom_id, &claim.username, credential)?;

        let session_id = self.sessions.create(&user.custom_id);
        tracing::info!(custom_id = %user.custom_id, "Passkey registered");

        Ok(AuthenticatedSession {
            session_id,
            custom_id: user.custom_id,
            username: user.username,
        })
    }

    /// Complete the login branch: consume the challenge, resolve the
    /// credential to a user, verify the assertion, bind a session.
    #[tracing::instrument(skip(self, request), fields(credential_id = %request.credential_id))]
    pub fn login(&self, request: &LoginRequest) -> OrchestratorResult<AuthenticatedSession> {
        self.challenges.take(&request.challenge)?;

        let user = self
            .users
            .find_by_credential_id(&request.credential_id)?
            .ok_or_else(|| {
                OrchestratorError::CredentialNotFound(request.credential_id.clone())
            })?;

        let credential = user.passkey.as_ref().ok_or_else(|| {
            OrchestratorError::CredentialNotFound(request.credential_id.clone())
        })?;

        webauthn::verify(
            &request.proof.webauthn_data,
            &request.proof.signature_r,
            &request.proof.signature_s,
            &credential.public_key,
            &request.challenge,
            Ceremony::Get,
            self.rp_id.as_deref(),
        )?;

        let session_id = self.sessions.create(&user.custom_id);
        tracing::info!(custom_id = %user.custom_id, "Passkey login");

        Ok(AuthenticatedSession {
            session_id,
            custom_id: user.custom_id,
            username: user.username,
        })
    }

    /// Resolve a session binding to its user.
    pub fn authenticate(&self, session_id: &Uuid) -> OrchestratorResult<User> {
        let custom_id = self
            .sessions
            .get(session_id)
            .ok_or(OrchestratorError::Unauthenticated)?;
        self.users
            .find_by_custom_id(&custom_id)?
            .ok_or(OrchestratorError::Unauthenticated)
    }

    /// Clear a session binding.
    pub fn logout(&self, session_id: &Uuid) -> bool {
        self.sessions.remove(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{test_keypair, webauthn_proof};
    use std::time::Duration;

    fn protocol() -> PasskeyAuthProtocol {
        PasskeyAuthProtocol::new(
            ChallengeStore::new(Duration::from_secs(300)),
            SessionStore::new(Duration::from_secs(3600)),
            UserStore::open_memory().unwrap(),
            None,
        )
    }

    fn register_request(
        protocol: &PasskeyAuthProtocol,
        username: &str,
        credential_id: &str,
        signing_key: &p256::ecdsa::SigningKey,
        public_key: P256PublicKey,
    ) -> RegisterRequest {
        let challenge = protocol
            .issue_challenge(&ChallengeRequest::Register {
                username: username.to_string(),
            })
            .challenge;
        let (data, r, s) = webauthn_proof(signing_key, &challenge, Ceremony::Create);
        RegisterRequest {
            challenge,
            credential_id: credential_id.to_string(),
            public_key,
            proof: WebAuthnProof {
                webauthn_data: Bytes::from(data),
                signature_r: r,
                signature_s: s,
            },
        }
    }

    #[test]
    fn test_register_then_login() {
        let protocol = protocol();
        let (signing_key, public_key) = test_keypair();

        let request = register_request(&protocol, "alice", "cred-1", &signing_key, public_key);
        let registered = protocol.register(&request).unwrap();
        assert_eq!(registered.username, "alice");

        // Session is bound
        let user = protocol.authenticate(&registered.session_id).unwrap();
        assert_eq!(user.custom_id, registered.custom_id);

        // Fresh login with the same credential
        let challenge = protocol.issue_challenge(&ChallengeRequest::Login).challenge;
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);
        let logged_in = protocol
            .login(&LoginRequest {
                challenge,
                credential_id: "cred-1".to_string(),
                proof: WebAuthnProof {
                    webauthn_data: Bytes::from(data),
                    signature_r: r,
                    signature_s: s,
                },
            })
            .unwrap();
        assert_eq!(logged_in.custom_id, registered.custom_id);
    }

    #[test]
    fn test_challenge_single_consumption() {
        let protocol = protocol();
        let (signing_key, public_key) = test_keypair();

        let request = register_request(&protocol, "alice", "cred-1", &signing_key, public_key);
        protocol.register(&request).unwrap();

        // Replaying the same verify call fails on the consumed challenge
        let err = protocol.register(&request).unwrap_err();
        assert!(matches!(err, OrchestratorError::ChallengeInvalid));
    }

    #[test]
    fn test_login_challenge_cannot_register() {
        let protocol = protocol();
        let (signing_key, public_key) = test_keypair();

        let challenge = protocol.issue_challenge(&ChallengeRequest::Login).challenge;
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Create);
        let err = protocol
            .register(&RegisterRequest {
                challenge,
                credential_id: "cred-1".to_string(),
                public_key,
                proof: WebAuthnProof {
                    webauthn_data: Bytes::from(data),
                    signature_r: r,
                    signature_s: s,
                },
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ChallengeInvalid));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let protocol = protocol();
        let (signing_key, public_key) = test_keypair();

        let first = register_request(&protocol, "alice", "cred-1", &signing_key, public_key);
        protocol.register(&first).unwrap();

        // Same credential id under a different username
        let second = register_request(&protocol, "bob", "cred-1", &signing_key, public_key);
        let err = protocol.register(&second).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateCredential(_)));

        // Same username under a different credential id
        let third = register_request(&protocol, "alice", "cred-2", &signing_key, public_key);
        let err = protocol.register(&third).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateCredential(_)));
    }

    #[test]
    fn test_login_unknown_credential() {
        let protocol = protocol();
        let (signing_key, _) = test_keypair();

        let challenge = protocol.issue_challenge(&ChallengeRequest::Login).challenge;
        let (data, r, s) = webauthn_proof(&signing_key, &challenge, Ceremony::Get);
        let err = protocol
            .login(&LoginRequest {
                challenge,
                credential_id: "ghost".to_string(),
                proof: WebAuthnProof {
                    webauthn_data: Bytes::from(data),
                    signature_r: r,
                    signature_s: s,
                },
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CredentialNotFound(_)));
    }

    #[test]
    fn test_logout_clears_session() {
        let protocol = protocol();
        let (signing_key, public_key) = test_keypair();

        let request = register_request(&protocol, "alice", "cred-1", &signing_key, public_key);
        let session = protocol.register(&request).unwrap();

        assert!(protocol.logout(&session.session_id));
        let err = protocol.authenticate(&session.session_id).unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthenticated));
    }
}
