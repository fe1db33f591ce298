//! Smart-session configuration: a second, narrower-scoped signer on a Safe.
//!
//! Two signature phases mirror the staging pipeline:
//!
//! - **Enable**: the Safe's primary controller signs the session's enable
//!   hash, authorizing the session's existence without executing anything.
//! - **Use**: each use prepares a user operation through the shared
//!   [`UserOperationStaging`] table (estimated under a placeholder
//!   signature), then the ephemeral session key signs the real operation
//!   hash and the operation is executed with the same at-most-once
//!   consumption guarantee as every other staged operation.
//!
//! Session private keys exist only in the in-memory pending table here; the
//! durable Safe record carries the public session address and the config
//! hash, nothing else. Entries expire with the table's TTL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, B256, Bytes, FixedBytes, U256, keccak256};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainGateway, UserOperationReceipt};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::safe::bootstrap::ownable_validator_init_data;
use crate::safe::signer::EoaSigner;
use crate::safe::staging::UserOperationStaging;
use crate::safe::types::{
    Call, MODULE_TYPE_VALIDATOR, OWNABLE_VALIDATOR, SMART_SESSIONS_VALIDATOR,
    validator_nonce_key,
};
use crate::abi::{self, AbiValue};

/// Smart-session signature mode byte for using an enabled session.
const SESSION_MODE_USE: u8 = 0x00;

/// One action a session is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAction {
    pub target: Address,
    pub selector: FixedBytes<4>,
}

/// The full session definition bound into the enable hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDefinition {
    pub chain_id: u64,
    pub safe_address: Address,
    /// Validator enforcing the session signer set (ownable validator).
    pub session_validator: Address,
    pub session_validator_init_data: Bytes,
    pub salt: B256,
    pub actions: Vec<SessionAction>,
    pub permit_paymaster: bool,
}

impl SessionDefinition {
    /// The hash the primary controller signs to authorize this session.
    ///
    /// Deterministic over every field, bound to the chain id so an enable
    /// signature cannot be replayed cross-chain.
    pub fn enable_hash(&self) -> B256 {
        let mut packed = Vec::new();
        packed.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        packed.extend_from_slice(&abi::encode_args(&[
            AbiValue::Address(self.safe_address),
            AbiValue::Address(self.session_validator),
        ]));
        packed.extend_from_slice(keccak256(&self.session_validator_init_data).as_slice());
        packed.extend_from_slice(self.salt.as_slice());
        packed.push(u8::from(self.permit_paymaster));
        for action in &self.actions {
            packed.extend_from_slice(&abi::encode_args(&[AbiValue::Address(action.target)]));
            packed.extend_from_slice(action.selector.as_slice());
        }
        keccak256(&packed)
    }
}

/// A configured session awaiting (or holding) its enable signature.
struct PendingSessionEnable {
    definition: SessionDefinition,
    session_key: EoaSigner,
    enable_signature: Option<Bytes>,
    created_at: Instant,
}

/// Result of configuring a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredSession {
    pub session_config_hash: B256,
    pub session_address: Address,
}

/// Installs and exercises the smart-sessions validator.
pub struct SessionModuleConfigurator {
    gateway: Arc<dyn ChainGateway>,
    staging: Arc<UserOperationStaging>,
    deployer: Arc<EoaSigner>,
    pending: Mutex<HashMap<B256, PendingSessionEnable>>,
    ttl: Duration,
}

impl SessionModuleConfigurator {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        staging: Arc<UserOperationStaging>,
        deployer: Arc<EoaSigner>,
        ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            staging,
            deployer,
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Install the smart-sessions validator module on a Safe.
    #[tracing::instrument(skip(self))]
    pub async fn install(
        &self,
        chain_id: u64,
        safe_address: Address,
        timeout: Duration,
    ) -> OrchestratorResult<()> {
        tracing::info!("Installing smart sessions validator");

        let call_data = abi::encode_call(
            "installModule(uint256,address,bytes)",
            &[
                AbiValue::Uint(U256::from(MODULE_TYPE_VALIDATOR)),
                AbiValue::Address(SMART_SESSIONS_VALIDATOR),
                AbiValue::Bytes(Bytes::new()),
            ],
        );

        let nonce = self
            .gateway
            .account_nonce(chain_id, safe_address, U256::ZERO)
            .await?;

        let prepared = self
            .staging
            .prepare(
                chain_id,
                safe_address,
                &[Call::Raw {
                    to: safe_address,
                    value: U256::ZERO,
                    data: call_data,
                }],
                nonce,
            )
            .await?;

        let signature = self.deployer.sign_personal(&prepared.hash)?;
        self.staging.execute(prepared.hash, signature, timeout).await?;
        Ok(())
    }

    /// Generate an ephemeral session key and stage its definition.
    ///
    /// Returns the enable hash for the primary controller to sign and the
    /// session's public address for the durable record. Expired pending
    /// sessions are swept here.
    #[tracing::instrument(skip(self, actions), fields(actions = actions.len()))]
    pub fn configure(
        &self,
        chain_id: u64,
        safe_address: Address,
        actions: Vec<SessionAction>,
    ) -> OrchestratorResult<ConfiguredSession> {
        if actions.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "A session needs at least one permitted action".to_string(),
            ));
        }

        let session_key = EoaSigner::random();
        let session_address = session_key.address();

        let definition = SessionDefinition {
            chain_id,
            safe_address,
            session_validator: OWNABLE_VALIDATOR,
            session_validator_init_data: ownable_validator_init_data(1, &[session_address]),
            salt: B256::ZERO,
            actions,
            permit_paymaster: true,
        };
        let hash = definition.enable_hash();

        {
            let now = Instant::now();
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);
            pending.insert(
                hash,
                PendingSessionEnable {
                    definition,
                    session_key,
                    enable_signature: None,
                    created_at: now,
                },
            );
        }

        tracing::info!(%hash, %session_address, "Session configured");
        Ok(ConfiguredSession {
            session_config_hash: hash,
            session_address,
        })
    }

    /// Attach the primary controller's signature over the enable hash.
    ///
    /// Authorizes the session's existence; nothing executes yet.
    pub fn enable(&self, hash: B256, signature: Bytes) -> OrchestratorResult<()> {
        let mut pending = self.pending.lock().unwrap();
        let entry = pending
            .get_mut(&hash)
            .ok_or_else(|| OrchestratorError::UnknownSession(hash.to_string()))?;
        entry.enable_signature = Some(signature);
        tracing::info!(%hash, "Session enabled");
        Ok(())
    }

    /// Execute calls under an enabled session.
    #[tracing::instrument(skip(self, calls), fields(calls = calls.len()))]
    pub async fn use_session(
        &self,
        hash: B256,
        calls: &[Call],
        timeout: Duration,
    ) -> OrchestratorResult<UserOperationReceipt> {
        let (chain_id, safe_address) = {
            let pending = self.pending.lock().unwrap();
            let entry = pending
                .get(&hash)
                .ok_or_else(|| OrchestratorError::UnknownSession(hash.to_string()))?;
            if entry.enable_signature.is_none() {
                return Err(OrchestratorError::SessionNotEnabled(hash.to_string()));
            }
            (entry.definition.chain_id, entry.definition.safe_address)
        };

        let nonce = self
            .gateway
            .account_nonce(
                chain_id,
                safe_address,
                validator_nonce_key(SMART_SESSIONS_VALIDATOR),
            )
            .await?;

        // Estimation runs under the staging pipeline's placeholder signature;
        // only the real operation hash gets the session key's signature.
        let prepared = self
            .staging
            .prepare(chain_id, safe_address, calls, nonce)
            .await?;

        let signature = {
            let pending = self.pending.lock().unwrap();
            let entry = pending
                .get(&hash)
                .ok_or_else(|| OrchestratorError::UnknownSession(hash.to_string()))?;
            let eoa_signature = entry.session_key.sign_personal(&prepared.hash)?;
            encode_session_signature(hash, &eoa_signature)
        };

        self.staging.execute(prepared.hash, signature, timeout).await
    }

    /// Number of sessions awaiting or holding an enable signature.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Smart-session use signature: mode byte, permission id, signer signature.
fn encode_session_signature(permission_id: B256, signature: &Bytes) -> Bytes {
    let mut out = Vec::with_capacity(1 + 32 + signature.len());
    out.push(SESSION_MODE_USE);
    out.extend_from_slice(permission_id.as_slice());
    out.extend_from_slice(signature);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainGateway;
    use crate::chain::etherscan::FixedAbiResolver;
    use alloy_primitives::address;

    fn setup() -> (Arc<MockChainGateway>, Arc<UserOperationStaging>, SessionModuleConfigurator) {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = Arc::new(UserOperationStaging::new(
            Arc::clone(&gateway) as Arc<dyn ChainGateway>,
            Arc::new(FixedAbiResolver::default()),
            Duration::from_secs(1800),
        ));
        let configurator = SessionModuleConfigurator::new(
            Arc::clone(&gateway) as Arc<dyn ChainGateway>,
            Arc::clone(&staging),
            Arc::new(EoaSigner::random()),
            Duration::from_secs(1800),
        );
        (gateway, staging, configurator)
    }

    fn actions() -> Vec<SessionAction> {
        vec![SessionAction {
            target: address!("a564cb165815937967a7d018b7f34b907b52fcfd"),
            selector: FixedBytes::ZERO,
        }]
    }

    fn transfer_call() -> Call {
        Call::Raw {
            to: address!("a564cb165815937967a7d018b7f34b907b52fcfd"),
            value: U256::ZERO,
            data: Bytes::from(vec![0x00, 0x00, 0x00, 0x00]),
        }
    }

    const SAFE: Address = address!("5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a");

    #[tokio::test]
    async fn test_configure_enable_use() {
        let (gateway, staging, configurator) = setup();

        let configured = configurator.configure(11_155_111, SAFE, actions()).unwrap();
        configurator
            .enable(configured.session_config_hash, Bytes::from(vec![0xEE; 65]))
            .unwrap();

        let receipt = configurator
            .use_session(
                configured.session_config_hash,
                &[transfer_call()],
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(receipt.success);

        // The use phase ran through the shared staging table and consumed it
        assert_eq!(staging.pending_count(), 0);

        // The submitted signature is in smart-session form
        let operations = gateway.submitted_operations.lock().unwrap();
        let signature = &operations[0].1.signature;
        assert_eq!(signature[0], SESSION_MODE_USE);
        assert_eq!(
            &signature[1..33],
            configured.session_config_hash.as_slice()
        );
        assert_eq!(signature.len(), 1 + 32 + 65);
    }

    #[tokio::test]
    async fn test_use_before_enable_rejected() {
        let (_gateway, _staging, configurator) = setup();

        let configured = configurator.configure(11_155_111, SAFE, actions()).unwrap();
        let err = configurator
            .use_session(
                configured.session_config_hash,
                &[transfer_call()],
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SessionNotEnabled(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let (_gateway, _staging, configurator) = setup();

        assert!(matches!(
            configurator.enable(B256::repeat_byte(0x01), Bytes::new()),
            Err(OrchestratorError::UnknownSession(_))
        ));
        let err = configurator
            .use_session(B256::repeat_byte(0x01), &[transfer_call()], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownSession(_)));
    }

    #[test]
    fn test_sessions_are_distinct() {
        let (_gateway, _staging, configurator) = setup();

        let first = configurator.configure(11_155_111, SAFE, actions()).unwrap();
        let second = configurator.configure(11_155_111, SAFE, actions()).unwrap();
        // A fresh key means a fresh init data and a fresh enable hash
        assert_ne!(first.session_config_hash, second.session_config_hash);
        assert_ne!(first.session_address, second.session_address);
        assert_eq!(configurator.pending_count(), 2);
    }

    #[test]
    fn test_expired_sessions_swept() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = Arc::new(UserOperationStaging::new(
            Arc::clone(&gateway) as Arc<dyn ChainGateway>,
            Arc::new(FixedAbiResolver::default()),
            Duration::from_secs(1800),
        ));
        let configurator = SessionModuleConfigurator::new(
            gateway,
            staging,
            Arc::new(EoaSigner::random()),
            Duration::ZERO,
        );

        configurator.configure(11_155_111, SAFE, actions()).unwrap();
        configurator.configure(11_155_111, SAFE, actions()).unwrap();
        assert_eq!(configurator.pending_count(), 1);
    }

    #[test]
    fn test_enable_hash_binds_chain_id() {
        let definition = SessionDefinition {
            chain_id: 1,
            safe_address: SAFE,
            session_validator: OWNABLE_VALIDATOR,
            session_validator_init_data: Bytes::from(vec![0x01]),
            salt: B256::ZERO,
            actions: actions(),
            permit_paymaster: true,
        };
        let mut other = definition.clone();
        other.chain_id = 10;
        assert_ne!(definition.enable_hash(), other.enable_hash());
    }

    #[tokio::test]
    async fn test_empty_actions_rejected() {
        let (_gateway, _staging, configurator) = setup();
        assert!(matches!(
            configurator.configure(11_155_111, SAFE, vec![]),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }
}
