//! ReDB-backed user store.
//!
//! Users are the only durable state the service keeps; challenges, pending
//! operations, and login sessions are in-memory by design. Records are
//! JSON-serialized under the user's custom id, with secondary index tables
//! for credential-id and username lookup. Uniqueness is enforced inside the
//! creating write transaction.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::types::{PasskeyCredential, SafeRecord, SafeSessionConfig, User};
use crate::error::{OrchestratorError, OrchestratorResult};

// Table definitions
// Users are keyed by custom id; the index tables map back to custom ids.
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const CREDENTIAL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("credential_index");
const USERNAME_INDEX: TableDefinition<&str, &str> = TableDefinition::new("username_index");

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> OrchestratorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| OrchestratorError::Storage(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;

        tracing::info!(path = %path.display(), "Opened user database");
        Ok(store)
    }

    /// Open an in-memory database for testing.
    #[cfg(test)]
    pub fn open_memory() -> OrchestratorResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| OrchestratorError::Storage(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> OrchestratorResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            // Just opening the tables creates them if they don't exist
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(CREDENTIAL_INDEX)?;
            let _ = write_txn.open_table(USERNAME_INDEX)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Create a user with a passkey credential.
    ///
    /// Fails with `DuplicateCredential` when the credential id or username is
    /// already registered; the check and the insert share one transaction.
    pub fn create_with_passkey(
        &self,
        custom_id: &str,
        username: &str,
        credential: PasskeyCredential,
    ) -> OrchestratorResult<User> {
        let user = User::new(custom_id, username, Some(credential.clone()));
        let value = serde_json::to_vec(&user)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut credentials = write_txn.open_table(CREDENTIAL_INDEX)?;
            let mut usernames = write_txn.open_table(USERNAME_INDEX)?;
            let mut users = write_txn.open_table(USERS)?;

            if credentials.get(credential.credential_id.as_str())?.is_some() {
                return Err(OrchestratorError::DuplicateCredential(
                    credential.credential_id.clone(),
                ));
            }
            if usernames.get(username)?.is_some() {
                return Err(OrchestratorError::DuplicateCredential(username.to_string()));
            }

            credentials.insert(credential.credential_id.as_str(), custom_id)?;
            usernames.insert(username, custom_id)?;
            users.insert(custom_id, value.as_slice())?;
        }
        write_txn.commit()?;

        tracing::info!(custom_id, username, "User registered");
        Ok(user)
    }

    /// Get a user by custom id.
    pub fn find_by_custom_id(&self, custom_id: &str) -> OrchestratorResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(custom_id)? {
            Some(value) => {
                let user: User = serde_json::from_slice(value.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Resolve a credential id to its user.
    pub fn find_by_credential_id(&self, credential_id: &str) -> OrchestratorResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(CREDENTIAL_INDEX)?;

        let custom_id = match index.get(credential_id)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        drop(index);
        drop(read_txn);

        self.find_by_custom_id(&custom_id)
    }

    /// Resolve a username to its user.
    pub fn find_by_username(&self, username: &str) -> OrchestratorResult<Option<User>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USERNAME_INDEX)?;

        let custom_id = match index.get(username)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        drop(index);
        drop(read_txn);

        self.find_by_custom_id(&custom_id)
    }

    /// Append a Safe to a user's per-chain list.
    pub fn add_safe(&self, custom_id: &str, safe: SafeRecord) -> OrchestratorResult<User> {
        self.update_user(custom_id, |user| {
            user.add_safe(safe.clone());
            Ok(())
        })
    }

    /// Append a session config to one of the user's Safes.
    pub fn add_session_config(
        &self,
        custom_id: &str,
        chain_id: u64,
        safe_address: alloy_primitives::Address,
        config: SafeSessionConfig,
    ) -> OrchestratorResult<User> {
        self.update_user(custom_id, |user| {
            let safe = user.find_safe_mut(chain_id, safe_address).ok_or_else(|| {
                OrchestratorError::InvalidInput(format!(
                    "Safe {safe_address} on chain {chain_id} not found for user"
                ))
            })?;
            safe.session_configs.push(config.clone());
            Ok(())
        })
    }

    /// Read-modify-write a user inside a single write transaction.
    fn update_user(
        &self,
        custom_id: &str,
        mutate: impl FnOnce(&mut User) -> OrchestratorResult<()>,
    ) -> OrchestratorResult<User> {
        let write_txn = self.db.begin_write()?;
        let user = {
            let mut table = write_txn.open_table(USERS)?;
            let existing = table
                .get(custom_id)?
                .map(|value| value.value().to_vec())
                .ok_or_else(|| OrchestratorError::UserNotFound(custom_id.to_string()))?;

            let mut user: User = serde_json::from_slice(&existing)?;
            mutate(&mut user)?;

            let value = serde_json::to_vec(&user)?;
            table.insert(custom_id, value.as_slice())?;
            user
        };
        write_txn.commit()?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::webauthn::P256PublicKey;
    use alloy_primitives::{B256, address};

    fn credential(id: &str) -> PasskeyCredential {
        PasskeyCredential {
            credential_id: id.to_string(),
            public_key: P256PublicKey {
                x: B256::repeat_byte(0x01),
                y: B256::repeat_byte(0x02),
            },
        }
    }

    fn safe_record(chain_id: u64) -> SafeRecord {
        SafeRecord {
            address: address!("1111111111111111111111111111111111111111"),
            chain_id,
            legacy_owners: vec![],
            module_owners: vec![],
            module_passkey: None,
            session_configs: vec![],
        }
    }

    #[test]
    fn test_create_and_lookup() -> OrchestratorResult<()> {
        let store = UserStore::open_memory()?;
        store.create_with_passkey("user-1", "alice", credential("cred-1"))?;

        assert!(store.find_by_custom_id("user-1")?.is_some());
        assert!(store.find_by_credential_id("cred-1")?.is_some());
        assert!(store.find_by_username("alice")?.is_some());
        assert!(store.find_by_credential_id("cred-2")?.is_none());

        Ok(())
    }

    #[test]
    fn test_duplicate_credential_rejected() -> OrchestratorResult<()> {
        let store = UserStore::open_memory()?;
        store.create_with_passkey("user-1", "alice", credential("cred-1"))?;

        let err = store
            .create_with_passkey("user-2", "bob", credential("cred-1"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateCredential(_)));

        let err = store
            .create_with_passkey("user-3", "alice", credential("cred-3"))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateCredential(_)));

        // The rejected users were never created
        assert!(store.find_by_custom_id("user-2")?.is_none());
        assert!(store.find_by_custom_id("user-3")?.is_none());

        Ok(())
    }

    #[test]
    fn test_add_safe_and_session_config() -> OrchestratorResult<()> {
        let store = UserStore::open_memory()?;
        store.create_with_passkey("user-1", "alice", credential("cred-1"))?;

        let user = store.add_safe("user-1", safe_record(11_155_111))?;
        assert_eq!(user.safes_by_chain[&11_155_111].len(), 1);

        let config = SafeSessionConfig {
            session_address: address!("3333333333333333333333333333333333333333"),
            session_config_hash: B256::repeat_byte(0x11),
        };
        let user = store.add_session_config(
            "user-1",
            11_155_111,
            address!("1111111111111111111111111111111111111111"),
            config,
        )?;
        assert_eq!(
            user.safes_by_chain[&11_155_111][0].session_configs.len(),
            1
        );

        Ok(())
    }

    #[test]
    fn test_add_safe_unknown_user() {
        let store = UserStore::open_memory().unwrap();
        let err = store.add_safe("ghost", safe_record(1)).unwrap_err();
        assert!(matches!(err, OrchestratorError::UserNotFound(_)));
    }
}
