//! Contract ABI resolution via an explorer API.
//!
//! Resolution failures are fatal for the call being prepared
//! (`AbiUnavailable`); they are never retried silently.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;

use crate::abi::ContractAbi;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Resolves a verified contract's ABI.
#[async_trait]
pub trait AbiResolver: Send + Sync {
    async fn resolve_abi(&self, contract: Address) -> OrchestratorResult<ContractAbi>;
}

/// Explorer response envelope: `status` is "1" on success and `result`
/// carries the ABI as a JSON string.
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: String,
}

/// Etherscan-style ABI resolver with an in-process cache.
pub struct EtherscanResolver {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache: Mutex<HashMap<Address, ContractAbi>>,
}

impl EtherscanResolver {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.map(ToString::to_string),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AbiResolver for EtherscanResolver {
    #[tracing::instrument(skip(self))]
    async fn resolve_abi(&self, contract: Address) -> OrchestratorResult<ContractAbi> {
        if let Some(abi) = self.cache.lock().unwrap().get(&contract) {
            return Ok(abi.clone());
        }

        let mut url = format!(
            "{}?module=contract&action=getabi&address={contract}",
            self.base_url
        );
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&apikey={key}"));
        }

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::AbiUnavailable(format!("{contract}: {e}")))?;

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::AbiUnavailable(format!("{contract}: {e}")))?;

        if body.status != "1" {
            return Err(OrchestratorError::AbiUnavailable(format!(
                "{contract}: {}",
                body.message
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&body.result)
            .map_err(|e| OrchestratorError::AbiUnavailable(format!("{contract}: {e}")))?;
        let abi = ContractAbi::parse(&json)?;

        self.cache.lock().unwrap().insert(contract, abi.clone());
        tracing::debug!(%contract, "Resolved contract ABI");
        Ok(abi)
    }
}

/// Resolver backed by a fixed table. Test support.
#[derive(Default)]
pub struct FixedAbiResolver {
    abis: HashMap<Address, ContractAbi>,
}

impl FixedAbiResolver {
    pub fn with_abi(mut self, contract: Address, abi: ContractAbi) -> Self {
        self.abis.insert(contract, abi);
        self
    }
}

#[async_trait]
impl AbiResolver for FixedAbiResolver {
    async fn resolve_abi(&self, contract: Address) -> OrchestratorResult<ContractAbi> {
        self.abis
            .get(&contract)
            .cloned()
            .ok_or_else(|| OrchestratorError::AbiUnavailable(contract.to_string()))
    }
}
