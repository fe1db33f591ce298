//! Service configuration derived from environment variables.
//!
//! Configuration is loaded once at startup and validated before the service
//! starts. Chain credentials are required up front so a misconfigured
//! deployment fails fast instead of failing on the first on-chain call.
//!
//! ## Environment Variables
//!
//! - `ORCHESTRATOR_PORT`: HTTP port (default: 5003)
//! - `ORCHESTRATOR_HOST`: Bind address (default: :: for dual-stack IPv4/IPv6)
//! - `ORCHESTRATOR_DB_PATH`: Path to the ReDB user database file
//! - `INTERNAL_SERVICE_TOKEN`: Shared secret for web app authentication
//! - `SUPPORTED_CHAINS`: Comma-separated chain ids the service operates on
//! - `RPC_URL_<chain_id>`: Public JSON-RPC endpoint per chain
//! - `BUNDLER_URL`: Bundler/paymaster API base URL
//! - `BUNDLER_API_KEY`: Bundler/paymaster API key
//! - `ETHERSCAN_API_KEY`: Contract explorer API key for ABI resolution
//! - `DEPLOYER_KEY`: Hex-encoded secp256k1 key used to deploy and bootstrap Safes
//! - `RP_ID`: WebAuthn relying-party id bound into assertion verification
//! - `CHALLENGE_TTL_SECS` / `SESSION_TTL_SECS` / `PENDING_OP_TTL_SECS`:
//!   lifetimes of the ephemeral in-memory stores
//! - `RECEIPT_TIMEOUT_SECS`: default deadline for receipt waits
//! - `RUST_LOG`: Log level filter

use std::collections::HashMap;
use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

// Defaults
const DEFAULT_PORT: u16 = 5003;
const DEFAULT_BODY_LIMIT_MB: usize = 4;
const DEFAULT_CHALLENGE_TTL_SECS: u64 = 300;
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_PENDING_OP_TTL_SECS: u64 = 1800;
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BUNDLER_URL: &str = "https://api.pimlico.io/v2";
const DEFAULT_EXPLORER_URL: &str = "https://api.etherscan.io/api";

/// Helper to get trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Helper to get lowercase env var.
fn env_lower(name: &str) -> String {
    env_trim(name).to_lowercase()
}

/// Check if a string value is truthy.
fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "yes")
}

/// Helper to get an optional env var.
fn env_opt(name: &str) -> Option<String> {
    let value = env_trim(name);
    if value.is_empty() { None } else { Some(value) }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    port: u16,
    host: IpAddr,
    db_path: PathBuf,
    internal_token: Option<String>,
    internal_token_required: bool,
    body_limit_bytes: usize,

    // Chain access
    supported_chains: Vec<u64>,
    rpc_urls: HashMap<u64, String>,
    bundler_url: String,
    bundler_api_key: Option<String>,
    explorer_url: String,
    explorer_api_key: Option<String>,
    deployer_key: Option<String>,

    // Auth
    rp_id: Option<String>,

    // Ephemeral-state lifetimes
    challenge_ttl: Duration,
    session_ttl: Duration,
    pending_op_ttl: Duration,
    receipt_timeout: Duration,
}

impl Settings {
    /// Load settings from environment variables.
    #[allow(clippy::too_many_lines)]
    pub fn from_env() -> Self {
        let port = env_trim("ORCHESTRATOR_PORT")
            .parse::<u16>()
            .unwrap_or(DEFAULT_PORT);

        // Default to IPv6 unspecified (::) for dual-stack support.
        // On Linux, this accepts both IPv4 and IPv6 connections.
        let host = env_trim("ORCHESTRATOR_HOST")
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        let db_path = env_trim("ORCHESTRATOR_DB_PATH")
            .parse::<PathBuf>()
            .unwrap_or_else(|_| PathBuf::from("./.data/orchestrator.redb"));

        let internal_token = env_opt("INTERNAL_SERVICE_TOKEN");

        // Determine if token is required based on environment
        let app_env = env_lower("APP_ENV");
        let rust_env = env_lower("RUST_ENV");
        let is_production =
            matches!(app_env.as_str(), "production") || matches!(rust_env.as_str(), "production");
        let internal_token_required =
            is_production || is_truthy(&env_lower("INTERNAL_SERVICE_TOKEN_REQUIRED"));

        let body_limit_mb = env_trim("ORCHESTRATOR_BODY_LIMIT_MB")
            .parse::<usize>()
            .unwrap_or(DEFAULT_BODY_LIMIT_MB);
        let body_limit_bytes = body_limit_mb.saturating_mul(1024 * 1024);

        let supported_chains: Vec<u64> = env_trim("SUPPORTED_CHAINS")
            .split(',')
            .filter_map(|s| s.trim().parse::<u64>().ok())
            .collect();

        // RPC_URL_<chain_id> entries are discovered from the environment.
        let mut rpc_urls = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(id) = key.strip_prefix("RPC_URL_")
                && let Ok(chain_id) = id.parse::<u64>()
            {
                let value = value.trim().to_string();
                if !value.is_empty() {
                    rpc_urls.insert(chain_id, value);
                }
            }
        }

        let bundler_url = env_opt("BUNDLER_URL").unwrap_or_else(|| DEFAULT_BUNDLER_URL.to_string());
        let bundler_api_key = env_opt("BUNDLER_API_KEY");

        let explorer_url =
            env_opt("ETHERSCAN_URL").unwrap_or_else(|| DEFAULT_EXPLORER_URL.to_string());
        let explorer_api_key = env_opt("ETHERSCAN_API_KEY");

        let deployer_key = env_opt("DEPLOYER_KEY");
        let rp_id = env_opt("RP_ID");

        let challenge_ttl = Duration::from_secs(
            env_trim("CHALLENGE_TTL_SECS")
                .parse::<u64>()
                .unwrap_or(DEFAULT_CHALLENGE_TTL_SECS),
        );
        let session_ttl = Duration::from_secs(
            env_trim("SESSION_TTL_SECS")
                .parse::<u64>()
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
        );
        let pending_op_ttl = Duration::from_secs(
            env_trim("PENDING_OP_TTL_SECS")
                .parse::<u64>()
                .unwrap_or(DEFAULT_PENDING_OP_TTL_SECS),
        );
        let receipt_timeout = Duration::from_secs(
            env_trim("RECEIPT_TIMEOUT_SECS")
                .parse::<u64>()
                .unwrap_or(DEFAULT_RECEIPT_TIMEOUT_SECS),
        );

        Self {
            port,
            host,
            db_path,
            internal_token,
            internal_token_required,
            body_limit_bytes,
            supported_chains,
            rpc_urls,
            bundler_url,
            bundler_api_key,
            explorer_url,
            explorer_api_key,
            deployer_key,
            rp_id,
            challenge_ttl,
            session_ttl,
            pending_op_ttl,
            receipt_timeout,
        }
    }

    /// Create settings for tests.
    pub fn for_tests() -> Self {
        let mut rpc_urls = HashMap::new();
        rpc_urls.insert(11_155_111, "http://localhost:8545".to_string());

        Self {
            port: DEFAULT_PORT,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            db_path: PathBuf::from("./.data/test-orchestrator.redb"),
            internal_token: None,
            internal_token_required: false,
            body_limit_bytes: DEFAULT_BODY_LIMIT_MB * 1024 * 1024,
            supported_chains: vec![11_155_111],
            rpc_urls,
            bundler_url: "http://localhost:4337".to_string(),
            bundler_api_key: Some("test-key".to_string()),
            explorer_url: "http://localhost:9000/api".to_string(),
            explorer_api_key: None,
            // Well-known anvil test key, never used against a real chain.
            deployer_key: Some(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
            ),
            rp_id: None,
            challenge_ttl: Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            pending_op_ttl: Duration::from_secs(DEFAULT_PENDING_OP_TTL_SECS),
            receipt_timeout: Duration::from_secs(5),
        }
    }

    /// Validate settings.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.internal_token_required && self.internal_token.is_none() {
            return Err("INTERNAL_SERVICE_TOKEN is required in production. \
                 Set INTERNAL_SERVICE_TOKEN or INTERNAL_SERVICE_TOKEN_REQUIRED=0."
                .to_string());
        }

        if self.supported_chains.is_empty() {
            return Err(
                "SUPPORTED_CHAINS is required. Provide a comma-separated list of chain ids."
                    .to_string(),
            );
        }

        if self.bundler_api_key.is_none() {
            return Err("BUNDLER_API_KEY is required for user-operation submission.".to_string());
        }

        if self.deployer_key.is_none() {
            return Err("DEPLOYER_KEY is required for Safe deployment and bootstrap.".to_string());
        }

        for chain_id in &self.supported_chains {
            if !self.rpc_urls.contains_key(chain_id) {
                return Err(format!(
                    "RPC_URL_{chain_id} is required for supported chain {chain_id}."
                ));
            }
        }

        Ok(())
    }

    // Getters

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn internal_token(&self) -> Option<&str> {
        self.internal_token.as_deref()
    }

    pub fn internal_token_required(&self) -> bool {
        self.internal_token_required
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_bytes
    }

    pub fn supported_chains(&self) -> &[u64] {
        &self.supported_chains
    }

    pub fn rpc_url(&self, chain_id: u64) -> Option<&str> {
        self.rpc_urls.get(&chain_id).map(String::as_str)
    }

    pub fn bundler_url(&self) -> &str {
        &self.bundler_url
    }

    pub fn bundler_api_key(&self) -> Option<&str> {
        self.bundler_api_key.as_deref()
    }

    pub fn explorer_url(&self) -> &str {
        &self.explorer_url
    }

    pub fn explorer_api_key(&self) -> Option<&str> {
        self.explorer_api_key.as_deref()
    }

    pub fn deployer_key(&self) -> Option<&str> {
        self.deployer_key.as_deref()
    }

    pub fn rp_id(&self) -> Option<&str> {
        self.rp_id.as_deref()
    }

    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn pending_op_ttl(&self) -> Duration {
        self.pending_op_ttl
    }

    pub fn receipt_timeout(&self) -> Duration {
        self.receipt_timeout
    }
}
