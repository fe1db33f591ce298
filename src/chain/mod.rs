//! Chain access layer.
//!
//! The protocols in `crate::safe` never talk to a node or bundler directly;
//! they go through the [`ChainGateway`] trait. The production implementation
//! (`BundlerGateway`) speaks JSON-RPC to a public node and an ERC-4337
//! bundler/paymaster; [`MockChainGateway`] scripts receipts and records calls
//! for protocol tests.

pub mod bundler;
pub mod etherscan;
pub mod tx;

use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorResult;
use crate::safe::types::{SignedUserOperation, UnsignedUserOperation};

pub use bundler::BundlerGateway;
pub use etherscan::{AbiResolver, EtherscanResolver};

/// Current fee levels for user-operation pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Gas limits returned by bundler estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_verification_gas_limit: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// Outcome of an included user operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: B256,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// A direct transaction to be signed by the gateway's deployer key and
/// submitted outside the bundler (owner-management calls cannot be
/// gas-sponsored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: Address,
    #[serde(default)]
    pub value: U256,
    pub data: Bytes,
}

/// Outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Asynchronous access to one or more chains.
///
/// Every `wait_for_*` call takes a caller-supplied timeout; implementations
/// must return [`crate::error::OrchestratorError::ReceiptTimeout`] instead of
/// blocking indefinitely.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Execute a read-only contract call and return the raw return data.
    async fn read_contract(
        &self,
        chain_id: u64,
        to: Address,
        call_data: Bytes,
    ) -> OrchestratorResult<Bytes>;

    /// Read the EntryPoint nonce for `account` under the given 192-bit key.
    async fn account_nonce(
        &self,
        chain_id: u64,
        account: Address,
        key: U256,
    ) -> OrchestratorResult<U256>;

    /// Current recommended user-operation fee levels.
    async fn gas_price(&self, chain_id: u64) -> OrchestratorResult<GasPrice>;

    /// Estimate gas limits for an unsigned operation.
    ///
    /// `balance_override` is injected as the sender's balance via state
    /// override so estimation never fails on insufficient funds.
    async fn estimate_user_operation(
        &self,
        chain_id: u64,
        operation: &UnsignedUserOperation,
        dummy_signature: Bytes,
        balance_override: U256,
    ) -> OrchestratorResult<GasEstimate>;

    /// Submit a signed user operation; returns the operation hash.
    async fn submit_user_operation(
        &self,
        chain_id: u64,
        operation: &SignedUserOperation,
    ) -> OrchestratorResult<B256>;

    /// Block until the operation is included or `timeout` elapses.
    async fn wait_for_user_operation_receipt(
        &self,
        chain_id: u64,
        op_hash: B256,
        timeout: Duration,
    ) -> OrchestratorResult<UserOperationReceipt>;

    /// Sign a direct transaction with the deployer key and submit it.
    async fn submit_transaction(
        &self,
        chain_id: u64,
        tx: &TransactionRequest,
    ) -> OrchestratorResult<B256>;

    /// Block until the transaction is mined or `timeout` elapses.
    async fn wait_for_transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: B256,
        timeout: Duration,
    ) -> OrchestratorResult<TransactionReceipt>;
}

pub mod mock {
    //! Scripted in-memory gateway for protocol tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use alloy_primitives::{Address, B256, Bytes, U256, keccak256};

    use super::{
        ChainGateway, GasEstimate, GasPrice, TransactionReceipt, TransactionRequest,
        UserOperationReceipt,
    };
    use crate::abi;
    use crate::error::{OrchestratorError, OrchestratorResult};
    use crate::safe::types::{ENTRY_POINT_07, SignedUserOperation, UnsignedUserOperation};

    const SEL_GET_OWNERS: [u8; 4] = [0xa0, 0xe6, 0x7e, 0x2b];
    const SEL_GET_THRESHOLD: [u8; 4] = [0xe7, 0x52, 0x35, 0xb8];
    const SEL_ADD_OWNER: [u8; 4] = [0x0d, 0x58, 0x2f, 0x13];
    const SEL_REMOVE_OWNER: [u8; 4] = [0xf8, 0xdc, 0x5d, 0xd9];

    /// In-memory gateway that simulates the Safe owner linked list and lets
    /// tests script failures per inner-call selector or per user operation.
    pub struct MockChainGateway {
        owners: Mutex<Vec<Address>>,
        nonces: Mutex<HashMap<(Address, U256), u64>>,
        fail_tx_selectors: Mutex<HashSet<[u8; 4]>>,
        failed_txs: Mutex<HashSet<B256>>,
        revert_next_user_op: AtomicBool,
        pub submitted_operations: Mutex<Vec<(u64, SignedUserOperation)>>,
        pub submitted_transactions: Mutex<Vec<(u64, TransactionRequest)>>,
    }

    impl MockChainGateway {
        /// Create a gateway whose simulated Safe starts with the given owners.
        pub fn with_owners(owners: Vec<Address>) -> Self {
            Self {
                owners: Mutex::new(owners),
                nonces: Mutex::new(HashMap::new()),
                fail_tx_selectors: Mutex::new(HashSet::new()),
                failed_txs: Mutex::new(HashSet::new()),
                revert_next_user_op: AtomicBool::new(false),
                submitted_operations: Mutex::new(Vec::new()),
                submitted_transactions: Mutex::new(Vec::new()),
            }
        }

        /// Script every direct transaction whose inner call carries this
        /// selector to report a failed receipt (state unchanged).
        pub fn fail_transactions_with_selector(&self, selector: [u8; 4]) {
            self.fail_tx_selectors.lock().unwrap().insert(selector);
        }

        /// Selector of `addOwnerWithThreshold(address,uint256)`.
        pub fn add_owner_selector() -> [u8; 4] {
            SEL_ADD_OWNER
        }

        /// Script the next submitted user operation to revert.
        pub fn revert_next_user_operation(&self) {
            self.revert_next_user_op.store(true, Ordering::SeqCst);
        }

        /// The simulated owner list.
        pub fn owners(&self) -> Vec<Address> {
            self.owners.lock().unwrap().clone()
        }

        /// Replace the simulated owner list.
        pub fn set_owners(&self, owners: Vec<Address>) {
            *self.owners.lock().unwrap() = owners;
        }

        /// Extract the inner owner-management call from the orchestrator's
        /// `execTransaction` layout (ten head words, data at offset 0x140).
        fn inner_call(data: &[u8]) -> Option<&[u8]> {
            let start = 4 + 0x140;
            let len = usize::try_from(U256::from_be_slice(data.get(start..start + 32)?)).ok()?;
            data.get(start + 32..start + 32 + len)
        }

        fn apply_transaction(&self, data: &[u8]) -> bool {
            let Some(inner) = Self::inner_call(data) else {
                return true; // not an owner-management call, succeed as-is
            };
            let selector: [u8; 4] = match inner.get(..4).map(TryInto::try_into) {
                Some(Ok(selector)) => selector,
                _ => return true,
            };

            if self.fail_tx_selectors.lock().unwrap().contains(&selector) {
                return false;
            }

            let mut owners = self.owners.lock().unwrap();
            match selector {
                SEL_ADD_OWNER => {
                    if let Some(word) = inner.get(4..36) {
                        // Safe prepends new owners to the linked list
                        owners.insert(0, Address::from_slice(&word[12..]));
                    }
                    true
                }
                SEL_REMOVE_OWNER => {
                    if let Some(word) = inner.get(36..68) {
                        let owner = Address::from_slice(&word[12..]);
                        owners.retain(|o| *o != owner);
                    }
                    true
                }
                _ => true,
            }
        }
    }

    impl Default for MockChainGateway {
        fn default() -> Self {
            Self::with_owners(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl ChainGateway for MockChainGateway {
        async fn read_contract(
            &self,
            _chain_id: u64,
            _to: Address,
            call_data: Bytes,
        ) -> OrchestratorResult<Bytes> {
            let selector: [u8; 4] = call_data
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| OrchestratorError::InvalidInput("Empty call data".to_string()))?;

            match selector {
                SEL_GET_OWNERS => {
                    let owners = self.owners.lock().unwrap().clone();
                    Ok(Bytes::from(abi::encode_args(&[abi::AbiValue::AddressArray(
                        owners,
                    )])))
                }
                SEL_GET_THRESHOLD => Ok(Bytes::from(U256::from(1).to_be_bytes::<32>().to_vec())),
                _ => Ok(Bytes::new()),
            }
        }

        async fn account_nonce(
            &self,
            _chain_id: u64,
            account: Address,
            key: U256,
        ) -> OrchestratorResult<U256> {
            let nonces = self.nonces.lock().unwrap();
            let sequence = nonces.get(&(account, key)).copied().unwrap_or(0);
            Ok((key << 64) | U256::from(sequence))
        }

        async fn gas_price(&self, _chain_id: u64) -> OrchestratorResult<GasPrice> {
            Ok(GasPrice {
                max_fee_per_gas: U256::from(2_000_000_000_u64),
                max_priority_fee_per_gas: U256::from(1_000_000_000_u64),
            })
        }

        async fn estimate_user_operation(
            &self,
            _chain_id: u64,
            _operation: &UnsignedUserOperation,
            _dummy_signature: Bytes,
            _balance_override: U256,
        ) -> OrchestratorResult<GasEstimate> {
            Ok(GasEstimate {
                call_gas_limit: U256::from(150_000),
                verification_gas_limit: U256::from(300_000),
                pre_verification_gas: U256::from(60_000),
                paymaster_verification_gas_limit: None,
                paymaster_post_op_gas_limit: None,
            })
        }

        async fn submit_user_operation(
            &self,
            chain_id: u64,
            operation: &SignedUserOperation,
        ) -> OrchestratorResult<B256> {
            let hash = operation.operation.hash(chain_id, ENTRY_POINT_07);
            self.submitted_operations
                .lock()
                .unwrap()
                .push((chain_id, operation.clone()));
            Ok(hash)
        }

        async fn wait_for_user_operation_receipt(
            &self,
            _chain_id: u64,
            op_hash: B256,
            _timeout: Duration,
        ) -> OrchestratorResult<UserOperationReceipt> {
            let revert = self.revert_next_user_op.swap(false, Ordering::SeqCst);
            Ok(UserOperationReceipt {
                user_op_hash: op_hash,
                success: !revert,
                reason: revert.then(|| "scripted revert".to_string()),
                transaction_hash: Some(keccak256(op_hash)),
                block_number: Some(1),
            })
        }

        async fn submit_transaction(
            &self,
            chain_id: u64,
            tx: &TransactionRequest,
        ) -> OrchestratorResult<B256> {
            let tx_hash = keccak256(&tx.data);
            let success = self.apply_transaction(&tx.data);
            if !success {
                self.failed_txs.lock().unwrap().insert(tx_hash);
            }
            self.submitted_transactions
                .lock()
                .unwrap()
                .push((chain_id, tx.clone()));
            Ok(tx_hash)
        }

        async fn wait_for_transaction_receipt(
            &self,
            _chain_id: u64,
            tx_hash: B256,
            _timeout: Duration,
        ) -> OrchestratorResult<TransactionReceipt> {
            let success = !self.failed_txs.lock().unwrap().contains(&tx_hash);
            Ok(TransactionReceipt {
                transaction_hash: tx_hash,
                success,
                block_number: Some(1),
            })
        }
    }
}

pub use mock::MockChainGateway;
