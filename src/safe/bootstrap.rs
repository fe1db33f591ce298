//! Safe bootstrap: hand control of a fresh Safe to validator modules.
//!
//! The underlying contract demands at least one legacy owner at all times,
//! so the rotation is strictly ordered:
//!
//! 1. install the chosen validator modules (confirmed before any owner
//!    rotation, so module-based control exists first),
//! 2. add the deterministic unspendable address as an extra legacy owner,
//! 3. remove the bootstrap deployer key,
//! 4. read the owner list back and assert it is exactly the unspendable
//!    address.
//!
//! A failed receipt halts the run; no step proceeds on an unconfirmed
//! predecessor. Step 3 tolerates a deployer that is already gone (restart
//! after partial failure) as a no-op, but refuses to run while the
//! unspendable owner is absent.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, U256, keccak256};
use serde::{Deserialize, Serialize};

use crate::abi::{self, AbiValue};
use crate::chain::{ChainGateway, TransactionRequest};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::safe::signer::EoaSigner;
use crate::safe::staging::UserOperationStaging;
use crate::safe::types::{
    Call, MODULE_TYPE_VALIDATOR, OWNABLE_VALIDATOR, SENTINEL_OWNER, WEBAUTHN_VALIDATOR,
    unspendable_owner,
};
use crate::user::types::PasskeyCredential;

/// Which validators to install and with what configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorPlan {
    /// Owners for the ownable validator; empty skips the module.
    #[serde(default)]
    pub owners: Vec<Address>,
    #[serde(default = "default_threshold")]
    pub threshold: u64,
    /// Passkey credential for the WebAuthn validator, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passkey: Option<PasskeyCredential>,
}

fn default_threshold() -> u64 {
    1
}

/// The bootstrap steps, in their required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    InstallOwnableValidator,
    InstallWebAuthnValidator,
    AddUnspendableOwner,
    RemoveDeployerOwner,
    VerifyOwners,
}

impl std::fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstallOwnableValidator => write!(f, "install ownable validator"),
            Self::InstallWebAuthnValidator => write!(f, "install webauthn validator"),
            Self::AddUnspendableOwner => write!(f, "add unspendable owner"),
            Self::RemoveDeployerOwner => write!(f, "remove deployer owner"),
            Self::VerifyOwners => write!(f, "verify owners"),
        }
    }
}

/// Result of a completed bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapOutcome {
    pub safe_address: Address,
    pub chain_id: u64,
    pub legacy_owners: Vec<Address>,
    pub module_owners: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_passkey: Option<String>,
}

/// Runs the bootstrap-then-brick sequence against one Safe.
pub struct SafeBootstrapProtocol {
    gateway: Arc<dyn ChainGateway>,
    staging: Arc<UserOperationStaging>,
    deployer: Arc<EoaSigner>,
}

impl SafeBootstrapProtocol {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        staging: Arc<UserOperationStaging>,
        deployer: Arc<EoaSigner>,
    ) -> Self {
        Self {
            gateway,
            staging,
            deployer,
        }
    }

    /// Run the full sequence once for a deployed Safe.
    #[tracing::instrument(skip(self, plan), fields(owners = plan.owners.len(), passkey = plan.passkey.is_some()))]
    pub async fn run(
        &self,
        chain_id: u64,
        safe_address: Address,
        plan: &ValidatorPlan,
        timeout: Duration,
    ) -> OrchestratorResult<BootstrapOutcome> {
        if plan.owners.is_empty() && plan.passkey.is_none() {
            return Err(OrchestratorError::InvalidInput(
                "Validator owners or a passkey credential is required".to_string(),
            ));
        }

        // Step 1: module installation, confirmed before any owner rotation
        if !plan.owners.is_empty() {
            let init_data = ownable_validator_init_data(plan.threshold, &plan.owners);
            self.install_validator(
                chain_id,
                safe_address,
                OWNABLE_VALIDATOR,
                init_data,
                BootstrapStep::InstallOwnableValidator,
                timeout,
            )
            .await?;
        }

        if let Some(passkey) = &plan.passkey {
            let init_data = webauthn_validator_init_data(passkey);
            self.install_validator(
                chain_id,
                safe_address,
                WEBAUTHN_VALIDATOR,
                init_data,
                BootstrapStep::InstallWebAuthnValidator,
                timeout,
            )
            .await?;
        }

        let unspendable = unspendable_owner();

        // Step 2: the replacement owner goes in before anything comes out
        tracing::info!(%unspendable, "Adding unspendable owner");
        let add_call = abi::encode_call(
            "addOwnerWithThreshold(address,uint256)",
            &[AbiValue::Address(unspendable), AbiValue::Uint(U256::from(1))],
        );
        self.exec_safe_transaction(
            chain_id,
            safe_address,
            add_call,
            BootstrapStep::AddUnspendableOwner,
            timeout,
        )
        .await?;

        // Step 3: rotate the deployer out
        self.remove_deployer(chain_id, safe_address, unspendable, timeout)
            .await?;

        // Step 4: read back and assert sole ownership
        let final_owners = self.read_owners(chain_id, safe_address).await?;
        if final_owners != vec![unspendable] {
            return Err(OrchestratorError::BootstrapOrderingViolation(format!(
                "Owner read-back after bootstrap expected [{unspendable}], got {final_owners:?}"
            )));
        }

        tracing::info!(%safe_address, chain_id, "Safe bootstrap complete");

        Ok(BootstrapOutcome {
            safe_address,
            chain_id,
            legacy_owners: final_owners,
            module_owners: plan.owners.clone(),
            module_passkey: plan
                .passkey
                .as_ref()
                .map(|p| p.credential_id.clone()),
        })
    }

    /// Install a validator module via a deployer-signed user operation.
    async fn install_validator(
        &self,
        chain_id: u64,
        safe_address: Address,
        module: Address,
        init_data: Bytes,
        step: BootstrapStep,
        timeout: Duration,
    ) -> OrchestratorResult<()> {
        tracing::info!(%module, %step, "Installing validator module");

        let call_data = abi::encode_call(
            "installModule(uint256,address,bytes)",
            &[
                AbiValue::Uint(U256::from(MODULE_TYPE_VALIDATOR)),
                AbiValue::Address(module),
                AbiValue::Bytes(init_data),
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
        let receipt = self.staging.execute(prepared.hash, signature, timeout).await?;

        tracing::info!(%step, tx = ?receipt.transaction_hash, "Validator module installed");
        Ok(())
    }

    /// Remove the deployer from the legacy owner set, tolerating a deployer
    /// that is already absent.
    async fn remove_deployer(
        &self,
        chain_id: u64,
        safe_address: Address,
        unspendable: Address,
        timeout: Duration,
    ) -> OrchestratorResult<()> {
        let owners = self.read_owners(chain_id, safe_address).await?;
        let deployer = self.deployer.address();

        let Some(position) = owners.iter().position(|o| *o == deployer) else {
            // Restart after a partial run: the rotation already happened
            tracing::info!(%deployer, "Deployer not in owner set, treating removal as no-op");
            return Ok(());
        };

        if !owners.contains(&unspendable) {
            return Err(OrchestratorError::BootstrapOrderingViolation(format!(
                "Refusing to remove deployer {deployer}: unspendable owner not present in {owners:?}"
            )));
        }

        // The Safe stores owners as a linked list; removal names the
        // predecessor (the sentinel when removing the head).
        let prev = if position == 0 {
            SENTINEL_OWNER
        } else {
            owners[position - 1]
        };

        tracing::info!(%deployer, %prev, "Removing deployer owner");
        let remove_call = abi::encode_call(
            "removeOwner(address,address,uint256)",
            &[
                AbiValue::Address(prev),
                AbiValue::Address(deployer),
                AbiValue::Uint(U256::from(1)),
            ],
        );
        self.exec_safe_transaction(
            chain_id,
            safe_address,
            remove_call,
            BootstrapStep::RemoveDeployerOwner,
            timeout,
        )
        .await
    }

    /// Send an owner-management call as a direct Safe transaction.
    ///
    /// These calls cannot go through the bundler, so they are wrapped in
    /// `execTransaction` with the pre-validated signature form (valid because
    /// the deployer EOA is both an owner and the transaction sender).
    async fn exec_safe_transaction(
        &self,
        chain_id: u64,
        safe_address: Address,
        inner_call: Bytes,
        step: BootstrapStep,
        timeout: Duration,
    ) -> OrchestratorResult<()> {
        let data = encode_exec_transaction(safe_address, &inner_call, self.deployer.address());

        let tx_hash = self
            .gateway
            .submit_transaction(
                chain_id,
                &TransactionRequest {
                    to: safe_address,
                    value: U256::ZERO,
                    data,
                },
            )
            .await?;

        let receipt = self
            .gateway
            .wait_for_transaction_receipt(chain_id, tx_hash, timeout)
            .await?;

        if !receipt.success {
            tracing::error!(%step, %tx_hash, "Bootstrap step failed, halting");
            return Err(OrchestratorError::OperationReverted {
                hash: tx_hash.to_string(),
                chain_id,
                reason: format!("Bootstrap step '{step}' reverted"),
            });
        }

        Ok(())
    }

    /// The Safe's current legacy owner list.
    pub async fn read_owners(
        &self,
        chain_id: u64,
        safe_address: Address,
    ) -> OrchestratorResult<Vec<Address>> {
        let data = self
            .gateway
            .read_contract(chain_id, safe_address, abi::encode_call("getOwners()", &[]))
            .await?;
        abi::decode_address_array(&data)
    }
}

/// `abi.encode(uint256 threshold, address[] owners)` for the ownable
/// validator's install data.
pub fn ownable_validator_init_data(threshold: u64, owners: &[Address]) -> Bytes {
    Bytes::from(abi::encode_args(&[
        AbiValue::Uint(U256::from(threshold)),
        AbiValue::AddressArray(owners.to_vec()),
    ]))
}

/// WebAuthn validator install data: the P-256 public key coordinates plus
/// the hashed authenticator credential id.
pub fn webauthn_validator_init_data(credential: &PasskeyCredential) -> Bytes {
    let authenticator_id_hash = keccak256(credential.credential_id.as_bytes());
    Bytes::from(abi::encode_args(&[
        AbiValue::Uint(U256::from_be_slice(credential.public_key.x.as_slice())),
        AbiValue::Uint(U256::from_be_slice(credential.public_key.y.as_slice())),
        AbiValue::FixedBytes(authenticator_id_hash),
    ]))
}

/// Encode `execTransaction` around an owner-management self-call, with the
/// pre-validated signature `r = owner, s = 0, v = 1`.
fn encode_exec_transaction(safe_address: Address, inner_call: &Bytes, owner: Address) -> Bytes {
    let mut signature = [0u8; 65];
    signature[12..32].copy_from_slice(owner.as_slice());
    signature[64] = 1;

    abi::encode_call(
        "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
        &[
            AbiValue::Address(safe_address),
            AbiValue::Uint(U256::ZERO),
            AbiValue::Bytes(inner_call.clone()),
            AbiValue::Uint(U256::ZERO), // operation: CALL
            AbiValue::Uint(U256::ZERO), // safeTxGas
            AbiValue::Uint(U256::ZERO), // baseGas
            AbiValue::Uint(U256::ZERO), // gasPrice
            AbiValue::Address(Address::ZERO),
            AbiValue::Address(Address::ZERO),
            AbiValue::Bytes(Bytes::from(signature.to_vec())),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainGateway;
    use crate::chain::etherscan::FixedAbiResolver;
    use crate::safe::types::unspendable_owner;

    fn setup() -> (
        Arc<MockChainGateway>,
        SafeBootstrapProtocol,
        Arc<EoaSigner>,
        Address,
    ) {
        let deployer = Arc::new(EoaSigner::random());
        let gateway = Arc::new(MockChainGateway::with_owners(vec![deployer.address()]));
        let staging = Arc::new(UserOperationStaging::new(
            Arc::clone(&gateway) as Arc<dyn ChainGateway>,
            Arc::new(FixedAbiResolver::default()),
            Duration::from_secs(1800),
        ));
        let protocol = SafeBootstrapProtocol::new(
            Arc::clone(&gateway) as Arc<dyn ChainGateway>,
            staging,
            Arc::clone(&deployer),
        );
        let safe = Address::repeat_byte(0x5a);
        (gateway, protocol, deployer, safe)
    }

    fn plan() -> ValidatorPlan {
        ValidatorPlan {
            owners: vec![Address::repeat_byte(0x01)],
            threshold: 1,
            passkey: None,
        }
    }

    #[tokio::test]
    async fn test_full_bootstrap_leaves_only_unspendable_owner() {
        let (gateway, protocol, _deployer, safe) = setup();

        let outcome = protocol
            .run(11_155_111, safe, &plan(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.legacy_owners, vec![unspendable_owner()]);
        assert_eq!(gateway.owners(), vec![unspendable_owner()]);
        // One install user operation, two owner-management transactions
        assert_eq!(gateway.submitted_operations.lock().unwrap().len(), 1);
        assert_eq!(gateway.submitted_transactions.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_add_owner_halts_before_removal() {
        let (gateway, protocol, deployer, safe) = setup();
        gateway.fail_transactions_with_selector(MockChainGateway::add_owner_selector());

        let err = protocol
            .run(11_155_111, safe, &plan(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::OperationReverted { .. }));
        // The deployer is still an owner: the removal step never ran
        assert_eq!(gateway.owners(), vec![deployer.address()]);
        assert_eq!(gateway.submitted_transactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_removal_refused_without_unspendable_owner() {
        let (gateway, protocol, deployer, safe) = setup();
        let _ = gateway;

        // Simulate a Safe where the replacement owner never landed
        let unspendable = unspendable_owner();
        let err = protocol
            .remove_deployer(11_155_111, safe, unspendable, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::BootstrapOrderingViolation(_)
        ));
        let _ = deployer;
    }

    #[tokio::test]
    async fn test_removal_is_noop_when_deployer_already_gone() {
        let (gateway, protocol, _deployer, safe) = setup();
        gateway.set_owners(vec![unspendable_owner()]);

        // Restart-after-partial-failure: removal succeeds without sending
        protocol
            .remove_deployer(11_155_111, safe, unspendable_owner(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(gateway.submitted_transactions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plan_without_validators_rejected() {
        let (_gateway, protocol, _deployer, safe) = setup();
        let empty = ValidatorPlan {
            owners: vec![],
            threshold: 1,
            passkey: None,
        };
        let err = protocol
            .run(11_155_111, safe, &empty, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    }
}
