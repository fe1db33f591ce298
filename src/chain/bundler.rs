//! JSON-RPC chain gateway over a public node and an ERC-4337 bundler.
//!
//! One gateway serves every configured chain: public-node calls go to the
//! per-chain `RPC_URL_<id>` endpoint, user-operation calls to the bundler
//! endpoint derived from the chain slug. Direct transactions are signed
//! locally with the deployer key and submitted as raw EIP-1559 payloads.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::tx::Eip1559Transaction;
use super::{
    ChainGateway, GasEstimate, GasPrice, TransactionReceipt, TransactionRequest,
    UserOperationReceipt,
};
use crate::abi::{self, AbiValue};
use crate::config::Settings;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::safe::signer::EoaSigner;
use crate::safe::types::{ENTRY_POINT_07, SignedUserOperation, UnsignedUserOperation};

/// Receipt polling cadence.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Map a chain id to the bundler's chain slug.
fn chain_slug(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("mainnet"),
        10 => Some("optimism"),
        420 => Some("optimism-sepolia"),
        8453 => Some("base"),
        42_161 => Some("arbitrum"),
        84_532 => Some("base-sepolia"),
        11_155_111 => Some("sepolia"),
        _ => None,
    }
}

/// Production [`ChainGateway`] implementation.
pub struct BundlerGateway {
    http: reqwest::Client,
    rpc_urls: HashMap<u64, String>,
    bundler_url: String,
    bundler_api_key: String,
    deployer: EoaSigner,
}

impl BundlerGateway {
    /// Build a gateway from settings.
    ///
    /// Fails fast when the bundler API key or deployer key is absent rather
    /// than defaulting silently.
    pub fn new(settings: &Settings) -> OrchestratorResult<Self> {
        let bundler_api_key = settings
            .bundler_api_key()
            .ok_or_else(|| OrchestratorError::ConfigurationMissing("BUNDLER_API_KEY".to_string()))?
            .to_string();

        let deployer_key = settings
            .deployer_key()
            .ok_or_else(|| OrchestratorError::ConfigurationMissing("DEPLOYER_KEY".to_string()))?;
        let deployer = EoaSigner::from_hex(deployer_key)?;

        let rpc_urls = settings
            .supported_chains()
            .iter()
            .filter_map(|id| settings.rpc_url(*id).map(|url| (*id, url.to_string())))
            .collect();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            rpc_urls,
            bundler_url: settings.bundler_url().to_string(),
            bundler_api_key,
            deployer,
        })
    }

    /// The deployer EOA used for direct transactions.
    pub fn deployer_address(&self) -> Address {
        self.deployer.address()
    }

    fn rpc_url(&self, chain_id: u64) -> OrchestratorResult<&str> {
        self.rpc_urls
            .get(&chain_id)
            .map(String::as_str)
            .ok_or(OrchestratorError::UnsupportedChain(chain_id))
    }

    fn bundler_endpoint(&self, chain_id: u64) -> OrchestratorResult<String> {
        let slug =
            chain_slug(chain_id).ok_or(OrchestratorError::UnsupportedChain(chain_id))?;
        Ok(format!(
            "{}/{slug}/rpc?apikey={}",
            self.bundler_url, self.bundler_api_key
        ))
    }

    async fn json_rpc(
        &self,
        chain_id: u64,
        url: &str,
        method: &str,
        params: Value,
    ) -> OrchestratorResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let rpc_error = |message: String| OrchestratorError::ChainRpc { chain_id, message };

        let response = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| rpc_error(format!("{method}: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| rpc_error(format!("{method}: {e}")))?;

        if let Some(error) = body.get("error")
            && !error.is_null()
        {
            return Err(rpc_error(format!("{method}: {error}")));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| rpc_error(format!("{method}: missing result")))
    }

    async fn node_rpc(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> OrchestratorResult<Value> {
        let url = self.rpc_url(chain_id)?.to_string();
        self.json_rpc(chain_id, &url, method, params).await
    }

    async fn bundler_rpc(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> OrchestratorResult<Value> {
        let url = self.bundler_endpoint(chain_id)?;
        self.json_rpc(chain_id, &url, method, params).await
    }
}

fn parse_quantity(chain_id: u64, value: &Value, field: &str) -> OrchestratorResult<U256> {
    value
        .as_str()
        .and_then(abi::parse_uint)
        .ok_or_else(|| OrchestratorError::ChainRpc {
            chain_id,
            message: format!("Malformed quantity in {field}: {value}"),
        })
}

fn parse_hash(chain_id: u64, value: &Value, field: &str) -> OrchestratorResult<B256> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OrchestratorError::ChainRpc {
            chain_id,
            message: format!("Malformed hash in {field}: {value}"),
        })
}

fn parse_bytes(chain_id: u64, value: &Value, field: &str) -> OrchestratorResult<Bytes> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OrchestratorError::ChainRpc {
            chain_id,
            message: format!("Malformed bytes in {field}: {value}"),
        })
}

#[async_trait]
impl ChainGateway for BundlerGateway {
    async fn read_contract(
        &self,
        chain_id: u64,
        to: Address,
        call_data: Bytes,
    ) -> OrchestratorResult<Bytes> {
        let result = self
            .node_rpc(
                chain_id,
                "eth_call",
                json!([{ "to": to, "data": call_data }, "latest"]),
            )
            .await?;
        parse_bytes(chain_id, &result, "eth_call")
    }

    async fn account_nonce(
        &self,
        chain_id: u64,
        account: Address,
        key: U256,
    ) -> OrchestratorResult<U256> {
        let call_data = abi::encode_call(
            "getNonce(address,uint192)",
            &[AbiValue::Address(account), AbiValue::Uint(key)],
        );
        let result = self.read_contract(chain_id, ENTRY_POINT_07, call_data).await?;
        abi::decode_uint(&result)
    }

    async fn gas_price(&self, chain_id: u64) -> OrchestratorResult<GasPrice> {
        let result = self
            .bundler_rpc(chain_id, "pimlico_getUserOperationGasPrice", json!([]))
            .await?;
        let fast = result.get("fast").unwrap_or(&Value::Null);
        Ok(GasPrice {
            max_fee_per_gas: parse_quantity(
                chain_id,
                fast.get("maxFeePerGas").unwrap_or(&Value::Null),
                "fast.maxFeePerGas",
            )?,
            max_priority_fee_per_gas: parse_quantity(
                chain_id,
                fast.get("maxPriorityFeePerGas").unwrap_or(&Value::Null),
                "fast.maxPriorityFeePerGas",
            )?,
        })
    }

    async fn estimate_user_operation(
        &self,
        chain_id: u64,
        operation: &UnsignedUserOperation,
        dummy_signature: Bytes,
        balance_override: U256,
    ) -> OrchestratorResult<GasEstimate> {
        let mut op_json = serde_json::to_value(operation)?;
        op_json["signature"] = json!(dummy_signature);

        let state_override = json!({
            operation.sender.to_string(): { "balance": format!("0x{balance_override:x}") }
        });

        let result = self
            .bundler_rpc(
                chain_id,
                "eth_estimateUserOperationGas",
                json!([op_json, ENTRY_POINT_07, state_override]),
            )
            .await?;

        let optional = |field: &str| {
            result
                .get(field)
                .and_then(Value::as_str)
                .and_then(abi::parse_uint)
        };

        Ok(GasEstimate {
            call_gas_limit: parse_quantity(
                chain_id,
                result.get("callGasLimit").unwrap_or(&Value::Null),
                "callGasLimit",
            )?,
            verification_gas_limit: parse_quantity(
                chain_id,
                result.get("verificationGasLimit").unwrap_or(&Value::Null),
                "verificationGasLimit",
            )?,
            pre_verification_gas: parse_quantity(
                chain_id,
                result.get("preVerificationGas").unwrap_or(&Value::Null),
                "preVerificationGas",
            )?,
            paymaster_verification_gas_limit: optional("paymasterVerificationGasLimit"),
            paymaster_post_op_gas_limit: optional("paymasterPostOpGasLimit"),
        })
    }

    async fn submit_user_operation(
        &self,
        chain_id: u64,
        operation: &SignedUserOperation,
    ) -> OrchestratorResult<B256> {
        let result = self
            .bundler_rpc(
                chain_id,
                "eth_sendUserOperation",
                json!([operation, ENTRY_POINT_07]),
            )
            .await?;
        parse_hash(chain_id, &result, "eth_sendUserOperation")
    }

    async fn wait_for_user_operation_receipt(
        &self,
        chain_id: u64,
        op_hash: B256,
        timeout: Duration,
    ) -> OrchestratorResult<UserOperationReceipt> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let result = self
                .bundler_rpc(chain_id, "eth_getUserOperationReceipt", json!([op_hash]))
                .await?;

            if !result.is_null() {
                let success = result
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let reason = result
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                let inner = result.get("receipt").unwrap_or(&Value::Null);
                let transaction_hash = inner
                    .get("transactionHash")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok());
                let block_number = inner
                    .get("blockNumber")
                    .and_then(Value::as_str)
                    .and_then(abi::parse_uint)
                    .and_then(|n| u64::try_from(n).ok());

                return Ok(UserOperationReceipt {
                    user_op_hash: op_hash,
                    success,
                    reason,
                    transaction_hash,
                    block_number,
                });
            }

            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Err(OrchestratorError::ReceiptTimeout {
                    hash: op_hash.to_string(),
                    chain_id,
                });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn submit_transaction(
        &self,
        chain_id: u64,
        tx: &TransactionRequest,
    ) -> OrchestratorResult<B256> {
        let from = self.deployer.address();

        let nonce_value = self
            .node_rpc(
                chain_id,
                "eth_getTransactionCount",
                json!([from, "pending"]),
            )
            .await?;
        let nonce = u64::try_from(parse_quantity(chain_id, &nonce_value, "nonce")?)
            .map_err(|_| OrchestratorError::ChainRpc {
                chain_id,
                message: "Account nonce out of range".to_string(),
            })?;

        let gas_value = self
            .node_rpc(
                chain_id,
                "eth_estimateGas",
                json!([{ "from": from, "to": tx.to, "value": format!("0x{:x}", tx.value), "data": tx.data }]),
            )
            .await?;
        let gas_limit = u64::try_from(parse_quantity(chain_id, &gas_value, "gas")?)
            .map_err(|_| OrchestratorError::ChainRpc {
                chain_id,
                message: "Gas estimate out of range".to_string(),
            })?;

        let gas_price_value = self.node_rpc(chain_id, "eth_gasPrice", json!([])).await?;
        let gas_price = parse_quantity(chain_id, &gas_price_value, "eth_gasPrice")?;

        let typed_tx = Eip1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: gas_price,
            // Headroom over the current base fee; unspent fees are refunded
            max_fee_per_gas: gas_price.saturating_mul(U256::from(2)),
            gas_limit,
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
        };

        let signing_hash = typed_tx.signing_hash();
        let (signature, y_odd) = self.deployer.sign_prehash(&signing_hash)?;
        let r = B256::from_slice(&signature.r().to_bytes());
        let s = B256::from_slice(&signature.s().to_bytes());
        let raw = typed_tx.encode_signed(y_odd, &r, &s);

        let result = self
            .node_rpc(chain_id, "eth_sendRawTransaction", json!([raw]))
            .await?;
        parse_hash(chain_id, &result, "eth_sendRawTransaction")
    }

    async fn wait_for_transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: B256,
        timeout: Duration,
    ) -> OrchestratorResult<TransactionReceipt> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let result = self
                .node_rpc(chain_id, "eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if !result.is_null() {
                let success = result
                    .get("status")
                    .and_then(Value::as_str)
                    .is_some_and(|s| s == "0x1");
                let block_number = result
                    .get("blockNumber")
                    .and_then(Value::as_str)
                    .and_then(abi::parse_uint)
                    .and_then(|n| u64::try_from(n).ok());

                return Ok(TransactionReceipt {
                    transaction_hash: tx_hash,
                    success,
                    block_number,
                });
            }

            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Err(OrchestratorError::ReceiptTimeout {
                    hash: tx_hash.to_string(),
                    chain_id,
                });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_slug_mapping() {
        assert_eq!(chain_slug(1), Some("mainnet"));
        assert_eq!(chain_slug(11_155_111), Some("sepolia"));
        assert_eq!(chain_slug(42_161), Some("arbitrum"));
        assert_eq!(chain_slug(999_999), None);
    }

    #[test]
    fn test_gateway_construction_from_test_settings() {
        let gateway = BundlerGateway::new(&Settings::for_tests()).unwrap();
        // First anvil development account, from the test deployer key
        assert_eq!(
            gateway.deployer_address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }
}
