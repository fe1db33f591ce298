//! Two-phase user-operation staging.
//!
//! The signer (a passkey or a session key) lives outside this process, so an
//! operation is built and priced here first, and its canonical hash handed
//! out for external signing. The unsigned operation waits in the pending
//! table keyed by that hash until `execute` attaches the signature and
//! submits it.
//!
//! Consumption discipline: the pending entry is removed only when a receipt
//! reports success, and that removal is the single point at which the
//! operation counts as done. A reverted or failed submission leaves the entry
//! in place so the caller can retry with a corrected signature against the
//! same hash. Entries not executed within the TTL are swept during the next
//! `prepare`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, B256, Bytes, U256};

use crate::abi::ContractAbi;
use crate::chain::{AbiResolver, ChainGateway, UserOperationReceipt};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::safe::types::{
    Call, ENTRY_POINT_07, ESTIMATION_BALANCE_OVERRIDE, PendingUserOperation, ResolvedCall,
    SignedUserOperation, UnsignedUserOperation, encode_execute, mock_ecdsa_signature,
};

/// A prepared operation together with the hash the external signer must sign.
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    pub chain_id: u64,
    pub operation: UnsignedUserOperation,
    pub hash: B256,
}

/// The prepare/execute pipeline and its pending-operation table.
pub struct UserOperationStaging {
    gateway: Arc<dyn ChainGateway>,
    abi_resolver: Arc<dyn AbiResolver>,
    pending: Mutex<HashMap<B256, PendingUserOperation>>,
    ttl: Duration,
}

impl UserOperationStaging {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        abi_resolver: Arc<dyn AbiResolver>,
        ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            abi_resolver,
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Build, price, and stage an unsigned operation.
    ///
    /// Preparing twice with identical inputs (and unchanged chain fee levels)
    /// yields operations that hash identically; a different nonce yields a
    /// different hash.
    #[tracing::instrument(skip(self, calls), fields(calls = calls.len()))]
    pub async fn prepare(
        &self,
        chain_id: u64,
        sender: Address,
        calls: &[Call],
        nonce: U256,
    ) -> OrchestratorResult<PreparedOperation> {
        let resolved = self.resolve_calls(calls).await?;
        let call_data = encode_execute(&resolved)?;

        let gas_price = self.gateway.gas_price(chain_id).await?;

        let mut operation = UnsignedUserOperation {
            sender,
            nonce,
            factory: None,
            factory_data: None,
            call_data,
            call_gas_limit: U256::ZERO,
            verification_gas_limit: U256::ZERO,
            pre_verification_gas: U256::ZERO,
            max_fee_per_gas: gas_price.max_fee_per_gas,
            max_priority_fee_per_gas: gas_price.max_priority_fee_per_gas,
            paymaster: None,
            paymaster_verification_gas_limit: None,
            paymaster_post_op_gas_limit: None,
            paymaster_data: None,
        };

        // The sender's real balance is irrelevant while estimating; a generous
        // override avoids false insufficient-funds failures.
        let estimate = self
            .gateway
            .estimate_user_operation(
                chain_id,
                &operation,
                mock_ecdsa_signature(),
                U256::from(ESTIMATION_BALANCE_OVERRIDE),
            )
            .await?;

        operation.call_gas_limit = estimate.call_gas_limit;
        operation.verification_gas_limit = estimate.verification_gas_limit;
        operation.pre_verification_gas = estimate.pre_verification_gas;
        operation.paymaster_verification_gas_limit = estimate.paymaster_verification_gas_limit;
        operation.paymaster_post_op_gas_limit = estimate.paymaster_post_op_gas_limit;

        let hash = operation.hash(chain_id, ENTRY_POINT_07);

        {
            let mut pending = self.pending.lock().unwrap();
            let now = Instant::now();
            pending.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);
            pending.insert(
                hash,
                PendingUserOperation {
                    chain_id,
                    operation: operation.clone(),
                    created_at: now,
                },
            );
        }

        tracing::info!(%hash, chain_id, %sender, "User operation prepared");

        Ok(PreparedOperation {
            chain_id,
            operation,
            hash,
        })
    }

    /// Attach an external signature to a staged operation and submit it.
    ///
    /// Waits up to `timeout` for the receipt. On success the entry is
    /// consumed; concurrent executes against the same hash race on that
    /// removal and exactly one reports success.
    #[tracing::instrument(skip(self, signature))]
    pub async fn execute(
        &self,
        hash: B256,
        signature: Bytes,
        timeout: Duration,
    ) -> OrchestratorResult<UserOperationReceipt> {
        let entry = self
            .pending
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownOperation(hash.to_string()))?;

        let signed = SignedUserOperation {
            operation: entry.operation,
            signature,
        };

        // Submission and receipt failures retain the pending entry so the
        // caller may resubmit a corrected signature against the same hash.
        let op_hash = self
            .gateway
            .submit_user_operation(entry.chain_id, &signed)
            .await?;

        let receipt = self
            .gateway
            .wait_for_user_operation_receipt(entry.chain_id, op_hash, timeout)
            .await?;

        if !receipt.success {
            tracing::warn!(%hash, chain_id = entry.chain_id, reason = ?receipt.reason, "User operation reverted");
            return Err(OrchestratorError::OperationReverted {
                hash: hash.to_string(),
                chain_id: entry.chain_id,
                reason: receipt
                    .reason
                    .unwrap_or_else(|| "execution reverted".to_string()),
            });
        }

        // Single consumption point: whichever caller removes the entry owns
        // the success; a racer that finds it gone gets UnknownOperation.
        if self.pending.lock().unwrap().remove(&hash).is_none() {
            return Err(OrchestratorError::UnknownOperation(hash.to_string()));
        }

        tracing::info!(%hash, chain_id = entry.chain_id, "User operation executed");
        Ok(receipt)
    }

    /// Whether a hash is currently staged.
    pub fn contains(&self, hash: &B256) -> bool {
        self.pending.lock().unwrap().contains_key(hash)
    }

    /// Number of staged operations.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    async fn resolve_calls(&self, calls: &[Call]) -> OrchestratorResult<Vec<ResolvedCall>> {
        let mut resolved = Vec::with_capacity(calls.len());
        for call in calls {
            let abi = match call {
                Call::Raw { .. } => None,
                Call::Contract { abi: Some(json), .. } => Some(ContractAbi::parse(json)?),
                Call::Contract { to, abi: None, .. } => {
                    Some(self.abi_resolver.resolve_abi(*to).await?)
                }
            };
            resolved.push(ResolvedCall::from_call(call, abi.as_ref())?);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainGateway;
    use crate::chain::etherscan::FixedAbiResolver;
    use alloy_primitives::address;
    use serde_json::json;

    fn staging_with(gateway: Arc<MockChainGateway>) -> UserOperationStaging {
        UserOperationStaging::new(
            gateway,
            Arc::new(FixedAbiResolver::default()),
            Duration::from_secs(1800),
        )
    }

    fn raw_call() -> Call {
        Call::Raw {
            to: address!("2222222222222222222222222222222222222222"),
            value: U256::ZERO,
            data: Bytes::from(vec![0x12, 0x34]),
        }
    }

    const SENDER: Address = address!("1111111111111111111111111111111111111111");

    #[tokio::test]
    async fn test_prepare_is_deterministic() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(gateway);

        let first = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(5))
            .await
            .unwrap();
        let second = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(5))
            .await
            .unwrap();

        assert_eq!(first.hash, second.hash);
        assert_eq!(staging.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_prepare_differs_on_nonce() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(gateway);

        let first = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(5))
            .await
            .unwrap();
        let second = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(6))
            .await
            .unwrap();

        assert_ne!(first.hash, second.hash);
        assert_eq!(staging.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_execute_consumes_exactly_once() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(gateway);

        let prepared = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(5))
            .await
            .unwrap();

        let signature = Bytes::from(vec![0xAA; 65]);
        let receipt = staging
            .execute(prepared.hash, signature.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(receipt.success);

        // Second execute against the consumed hash
        let err = staging
            .execute(prepared.hash, signature, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn test_reverted_execute_retains_entry() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(Arc::clone(&gateway));

        let prepared = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(5))
            .await
            .unwrap();

        gateway.revert_next_user_operation();
        let err = staging
            .execute(prepared.hash, Bytes::from(vec![0xAA; 65]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::OperationReverted { .. }));
        assert!(staging.contains(&prepared.hash));

        // Retry with a corrected signature succeeds against the same hash
        let receipt = staging
            .execute(prepared.hash, Bytes::from(vec![0xBB; 65]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(receipt.success);
        assert!(!staging.contains(&prepared.hash));
    }

    #[tokio::test]
    async fn test_execute_unknown_hash() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(gateway);

        let err = staging
            .execute(
                B256::repeat_byte(0x99),
                Bytes::from(vec![0xAA; 65]),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownOperation(_)));
    }

    #[tokio::test]
    async fn test_expired_entries_swept_on_prepare() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = UserOperationStaging::new(
            gateway,
            Arc::new(FixedAbiResolver::default()),
            Duration::ZERO, // everything is immediately stale
        );

        let first = staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(5))
            .await
            .unwrap();
        // The next prepare sweeps the now-expired first entry
        staging
            .prepare(11_155_111, SENDER, &[raw_call()], U256::from(6))
            .await
            .unwrap();

        assert!(!staging.contains(&first.hash));
    }

    #[tokio::test]
    async fn test_contract_call_with_inline_abi() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(gateway);

        let call = Call::Contract {
            to: address!("2222222222222222222222222222222222222222"),
            value: U256::ZERO,
            function_name: "transfer".to_string(),
            args: vec![
                json!("0x000000000000000000000000000000000000dEaD"),
                json!("1000"),
            ],
            abi: Some(json!([
                {
                    "type": "function",
                    "name": "transfer",
                    "inputs": [
                        {"name": "to", "type": "address"},
                        {"name": "amount", "type": "uint256"}
                    ],
                    "outputs": []
                }
            ])),
        };

        let prepared = staging
            .prepare(11_155_111, SENDER, &[call], U256::ZERO)
            .await
            .unwrap();
        assert!(staging.contains(&prepared.hash));
    }

    #[tokio::test]
    async fn test_unresolvable_abi_is_fatal_for_prepare() {
        let gateway = Arc::new(MockChainGateway::default());
        let staging = staging_with(gateway);

        let call = Call::Contract {
            to: address!("2222222222222222222222222222222222222222"),
            value: U256::ZERO,
            function_name: "transfer".to_string(),
            args: vec![],
            abi: None,
        };

        let err = staging
            .prepare(11_155_111, SENDER, &[call], U256::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AbiUnavailable(_)));
        assert_eq!(staging.pending_count(), 0);
    }
}
