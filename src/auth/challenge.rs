//! Short-lived WebAuthn challenge store.
//!
//! Challenges live in process memory only and expire after a fixed TTL.
//! Stale entries are swept during the next `issue` call rather than by a
//! background timer. A challenge feeds at most one verify attempt: `take`
//! removes it atomically, so a replayed verify fails with `ChallengeInvalid`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use alloy_primitives::B256;
use rand::RngCore;

use crate::error::{OrchestratorError, OrchestratorResult};

/// The register-mode identity a challenge was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationClaim {
    pub custom_id: String,
    pub username: String,
}

#[derive(Debug)]
struct ChallengeEntry {
    issued_at: Instant,
    claim: Option<RegistrationClaim>,
}

/// Process-wide challenge table with amortized TTL cleanup.
pub struct ChallengeStore {
    entries: Mutex<HashMap<B256, ChallengeEntry>>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh 32-byte random challenge, sweeping expired entries.
    ///
    /// Register-mode challenges carry the proposed identity so verification
    /// later binds the credential to exactly what was challenged.
    pub fn issue(&self, claim: Option<RegistrationClaim>) -> B256 {
        let mut value = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut value);
        let challenge = B256::from(value);

        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, entry| now.duration_since(entry.issued_at) < self.ttl);
        entries.insert(
            challenge,
            ChallengeEntry {
                issued_at: now,
                claim,
            },
        );

        challenge
    }

    /// Whether an unexpired entry with this value exists. Does not consume.
    pub fn validate(&self, challenge: &B256) -> bool {
        let entries = self.entries.lock().unwrap();
        entries
            .get(challenge)
            .is_some_and(|entry| entry.issued_at.elapsed() < self.ttl)
    }

    /// Atomically consume a challenge, returning its registration claim.
    ///
    /// Unknown, expired, or already-consumed values fail with
    /// `ChallengeInvalid`; the enclosing authentication attempt must fail.
    pub fn take(&self, challenge: &B256) -> OrchestratorResult<Option<RegistrationClaim>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .remove(challenge)
            .ok_or(OrchestratorError::ChallengeInvalid)?;
        if entry.issued_at.elapsed() >= self.ttl {
            return Err(OrchestratorError::ChallengeInvalid);
        }
        Ok(entry.claim)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
