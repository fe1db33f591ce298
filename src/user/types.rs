//! Durable user records.
//!
//! One record per user: the passkey credential plus the Safes deployed for
//! them, grouped by chain. Users are created at registration and only ever
//! appended to; nothing in the service deletes a user.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::webauthn::P256PublicKey;

/// A registered WebAuthn credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyCredential {
    pub credential_id: String,
    pub public_key: P256PublicKey,
}

/// A granted smart session on a Safe. Only the public half is durable; the
/// session private key never leaves the in-memory pending-session table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeSessionConfig {
    pub session_address: Address,
    pub session_config_hash: B256,
}

/// One deployed Safe owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeRecord {
    pub address: Address,
    pub chain_id: u64,
    /// After a completed bootstrap this is exactly the unspendable owner.
    pub legacy_owners: Vec<Address>,
    /// Owners enforced by the ownable validator module.
    pub module_owners: Vec<Address>,
    /// Credential id bound to the WebAuthn validator, if installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_passkey: Option<String>,
    #[serde(default)]
    pub session_configs: Vec<SafeSessionConfig>,
}

/// The user aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub custom_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passkey: Option<PasskeyCredential>,
    #[serde(default)]
    pub safes_by_chain: BTreeMap<u64, Vec<SafeRecord>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(custom_id: &str, username: &str, passkey: Option<PasskeyCredential>) -> Self {
        Self {
            custom_id: custom_id.to_string(),
            username: username.to_string(),
            passkey,
            safes_by_chain: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a Safe under its chain.
    pub fn add_safe(&mut self, safe: SafeRecord) {
        self.safes_by_chain
            .entry(safe.chain_id)
            .or_default()
            .push(safe);
    }

    /// Find a Safe by chain and address.
    pub fn find_safe_mut(&mut self, chain_id: u64, address: Address) -> Option<&mut SafeRecord> {
        self.safes_by_chain
            .get_mut(&chain_id)?
            .iter_mut()
            .find(|safe| safe.address == address)
    }

    pub fn find_safe(&self, chain_id: u64, address: Address) -> Option<&SafeRecord> {
        self.safes_by_chain
            .get(&chain_id)?
            .iter()
            .find(|safe| safe.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_safe_grouping_by_chain() {
        let mut user = User::new("user-1", "alice", None);
        let safe_address = address!("1111111111111111111111111111111111111111");

        user.add_safe(SafeRecord {
            address: safe_address,
            chain_id: 11_155_111,
            legacy_owners: vec![],
            module_owners: vec![],
            module_passkey: None,
            session_configs: vec![],
        });

        assert!(user.find_safe(11_155_111, safe_address).is_some());
        assert!(user.find_safe(1, safe_address).is_none());
    }

    #[test]
    fn test_user_serde_roundtrip() {
        let mut user = User::new("user-1", "alice", None);
        user.add_safe(SafeRecord {
            address: address!("1111111111111111111111111111111111111111"),
            chain_id: 1,
            legacy_owners: vec![address!("2222222222222222222222222222222222222222")],
            module_owners: vec![],
            module_passkey: Some("cred-1".to_string()),
            session_configs: vec![],
        });

        let json = serde_json::to_string(&user).unwrap();
        let parsed: User = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, user);
    }
}
