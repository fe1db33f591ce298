//! Safe lifecycle and transaction endpoints.
//!
//! All endpoints require a bound login session (`x-session-id` header); each
//! wraps one protocol call and surfaces its typed error.

use std::time::Duration;

use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::session_user;
use crate::abi;
use crate::auth::PasskeyAuthProtocol;
use crate::chain::ChainGateway;
use crate::config::Settings;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::safe::bootstrap::{SafeBootstrapProtocol, ValidatorPlan};
use crate::safe::session_module::{SessionAction, SessionModuleConfigurator};
use crate::safe::staging::UserOperationStaging;
use crate::safe::types::{Call, validator_nonce_key};
use crate::user::types::{SafeRecord, SafeSessionConfig};
use crate::user::UserStore;

/// Multisig owner set for the ownable validator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigConfig {
    pub owners: Vec<Address>,
    #[serde(default = "default_threshold")]
    pub threshold: u64,
}

fn default_threshold() -> u64 {
    1
}

/// POST /safe/create body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSafeRequest {
    /// Counterfactual Safe address (identical across chains for one salt).
    pub safe_address: Address,
    pub chains: Vec<u64>,
    #[serde(default)]
    pub multisig: Option<MultisigConfig>,
    /// Bind the caller's registered passkey as a WebAuthn validator.
    #[serde(default)]
    pub passkey: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// POST /safe/transact/prepare body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    pub chain_id: u64,
    pub safe_address: Address,
    pub calls: Vec<Call>,
    /// Decimal or 0x-hex nonce; fetched from the EntryPoint when absent.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Validator module routed through the nonce key, if any.
    #[serde(default)]
    pub validator: Option<Address>,
}

/// POST /safe/transact/execute body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub hash: B256,
    pub signature: Bytes,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// POST /safe/session/configure body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigureRequest {
    pub chain_id: u64,
    pub safe_address: Address,
    pub actions: Vec<SessionAction>,
    /// Install the smart-sessions validator first.
    #[serde(default)]
    pub install: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// POST /safe/session/enable body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnableRequest {
    pub hash: B256,
    pub signature: Bytes,
}

/// POST /safe/session/use body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUseRequest {
    pub hash: B256,
    pub calls: Vec<Call>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// GET /safe/owners query.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnersQuery {
    pub chain_id: u64,
    pub address: Address,
}

fn receipt_timeout(settings: &Settings, timeout_secs: Option<u64>) -> Duration {
    timeout_secs.map_or_else(|| settings.receipt_timeout(), Duration::from_secs)
}

fn ensure_supported(settings: &Settings, chain_id: u64) -> OrchestratorResult<()> {
    if settings.supported_chains().contains(&chain_id) {
        Ok(())
    } else {
        Err(OrchestratorError::UnsupportedChain(chain_id))
    }
}

/// POST /safe/create
///
/// Bootstrap the caller's Safe on every requested chain and record the
/// results against their user record.
#[tracing::instrument(skip_all, fields(safe = %request.safe_address, chains = request.chains.len()))]
pub async fn create_safe(
    req: HttpRequest,
    settings: web::Data<Settings>,
    auth: web::Data<PasskeyAuthProtocol>,
    bootstrap: web::Data<SafeBootstrapProtocol>,
    users: web::Data<UserStore>,
    request: web::Json<CreateSafeRequest>,
) -> HttpResponse {
    let user = match session_user(&req, &auth) {
        Ok(user) => user,
        Err(e) => return e.error_response(),
    };

    let result = create_safe_inner(&settings, &bootstrap, &users, user, &request).await;
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            tracing::error!(error = %e, "Safe creation failed");
            e.error_response()
        }
    }
}

async fn create_safe_inner(
    settings: &Settings,
    bootstrap: &SafeBootstrapProtocol,
    users: &UserStore,
    user: crate::user::User,
    request: &CreateSafeRequest,
) -> OrchestratorResult<serde_json::Value> {
    let custom_id = user.custom_id.clone();
    let passkey = if request.passkey {
        Some(user.passkey.clone().ok_or_else(|| {
            OrchestratorError::InvalidInput(
                "Caller has no registered passkey credential".to_string(),
            )
        })?)
    } else {
        None
    };

    let plan = ValidatorPlan {
        owners: request
            .multisig
            .as_ref()
            .map(|m| m.owners.clone())
            .unwrap_or_default(),
        threshold: request.multisig.as_ref().map_or(1, |m| m.threshold),
        passkey,
    };

    let timeout = receipt_timeout(settings, request.timeout_secs);
    let mut results = serde_json::Map::new();

    for &chain_id in &request.chains {
        ensure_supported(settings, chain_id)?;
        tracing::info!(chain_id, "Bootstrapping Safe");

        let outcome = bootstrap
            .run(chain_id, request.safe_address, &plan, timeout)
            .await?;

        users.add_safe(
            &custom_id,
            SafeRecord {
                address: outcome.safe_address,
                chain_id,
                legacy_owners: outcome.legacy_owners.clone(),
                module_owners: outcome.module_owners.clone(),
                module_passkey: outcome.module_passkey.clone(),
                session_configs: vec![],
            },
        )?;

        results.insert(chain_id.to_string(), serde_json::to_value(&outcome)?);
    }

    Ok(serde_json::Value::Object(results))
}

/// POST /safe/transact/prepare
///
/// Build and stage an unsigned user operation; returns it with the hash the
/// external signer must sign.
#[tracing::instrument(skip_all, fields(chain_id = request.chain_id, safe = %request.safe_address))]
pub async fn prepare(
    req: HttpRequest,
    settings: web::Data<Settings>,
    auth: web::Data<PasskeyAuthProtocol>,
    gateway: web::Data<dyn ChainGateway>,
    staging: web::Data<UserOperationStaging>,
    request: web::Json<PrepareRequest>,
) -> HttpResponse {
    if let Err(e) = session_user(&req, &auth) {
        return e.error_response();
    }
    if let Err(e) = ensure_supported(&settings, request.chain_id) {
        return e.error_response();
    }

    let nonce = match &request.nonce {
        Some(raw) => match abi::parse_uint(raw) {
            Some(nonce) => nonce,
            None => {
                return OrchestratorError::InvalidInput(format!("Malformed nonce: {raw}"))
                    .error_response();
            }
        },
        None => {
            let key = request.validator.map_or(U256::ZERO, validator_nonce_key);
            match gateway
                .account_nonce(request.chain_id, request.safe_address, key)
                .await
            {
                Ok(nonce) => nonce,
                Err(e) => return e.error_response(),
            }
        }
    };

    match staging
        .prepare(request.chain_id, request.safe_address, &request.calls, nonce)
        .await
    {
        Ok(prepared) => HttpResponse::Ok().json(json!({
            "chainId": prepared.chain_id,
            "userOperation": prepared.operation,
            "hash": prepared.hash,
        })),
        Err(e) => {
            tracing::error!(error = %e, "User operation preparation failed");
            e.error_response()
        }
    }
}

/// POST /safe/transact/execute
///
/// Attach an external signature to a staged operation and submit it.
#[tracing::instrument(skip_all, fields(hash = %request.hash))]
pub async fn execute(
    req: HttpRequest,
    settings: web::Data<Settings>,
    auth: web::Data<PasskeyAuthProtocol>,
    staging: web::Data<UserOperationStaging>,
    request: web::Json<ExecuteRequest>,
) -> HttpResponse {
    if let Err(e) = session_user(&req, &auth) {
        return e.error_response();
    }

    let timeout = receipt_timeout(&settings, request.timeout_secs);
    match staging
        .execute(request.hash, request.signature.clone(), timeout)
        .await
    {
        Ok(receipt) => HttpResponse::Ok().json(receipt),
        Err(e) => {
            tracing::error!(error = %e, "User operation execution failed");
            e.error_response()
        }
    }
}

/// POST /safe/session/configure
///
/// Start the enable phase for a new smart session on the caller's Safe.
#[tracing::instrument(skip_all, fields(chain_id = request.chain_id, safe = %request.safe_address))]
pub async fn session_configure(
    req: HttpRequest,
    settings: web::Data<Settings>,
    auth: web::Data<PasskeyAuthProtocol>,
    configurator: web::Data<SessionModuleConfigurator>,
    users: web::Data<UserStore>,
    request: web::Json<SessionConfigureRequest>,
) -> HttpResponse {
    let user = match session_user(&req, &auth) {
        Ok(user) => user,
        Err(e) => return e.error_response(),
    };
    if let Err(e) = ensure_supported(&settings, request.chain_id) {
        return e.error_response();
    }

    if request.install {
        let timeout = receipt_timeout(&settings, request.timeout_secs);
        if let Err(e) = configurator
            .install(request.chain_id, request.safe_address, timeout)
            .await
        {
            tracing::error!(error = %e, "Smart sessions module installation failed");
            return e.error_response();
        }
    }

    let configured = match configurator.configure(
        request.chain_id,
        request.safe_address,
        request.actions.clone(),
    ) {
        Ok(configured) => configured,
        Err(e) => return e.error_response(),
    };

    // The durable record keeps only the public half of the session
    let stored = users.add_session_config(
        &user.custom_id,
        request.chain_id,
        request.safe_address,
        SafeSessionConfig {
            session_address: configured.session_address,
            session_config_hash: configured.session_config_hash,
        },
    );
    if let Err(e) = stored {
        return e.error_response();
    }

    HttpResponse::Ok().json(configured)
}

/// POST /safe/session/enable
///
/// Attach the primary controller's signature over the enable hash.
#[tracing::instrument(skip_all, fields(hash = %request.hash))]
pub async fn session_enable(
    req: HttpRequest,
    auth: web::Data<PasskeyAuthProtocol>,
    configurator: web::Data<SessionModuleConfigurator>,
    request: web::Json<SessionEnableRequest>,
) -> HttpResponse {
    if let Err(e) = session_user(&req, &auth) {
        return e.error_response();
    }

    match configurator.enable(request.hash, request.signature.clone()) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => e.error_response(),
    }
}

/// POST /safe/session/use
///
/// Execute calls under an enabled session.
#[tracing::instrument(skip_all, fields(hash = %request.hash))]
pub async fn session_use(
    req: HttpRequest,
    settings: web::Data<Settings>,
    auth: web::Data<PasskeyAuthProtocol>,
    configurator: web::Data<SessionModuleConfigurator>,
    request: web::Json<SessionUseRequest>,
) -> HttpResponse {
    if let Err(e) = session_user(&req, &auth) {
        return e.error_response();
    }

    let timeout = receipt_timeout(&settings, request.timeout_secs);
    match configurator
        .use_session(request.hash, &request.calls, timeout)
        .await
    {
        Ok(receipt) => HttpResponse::Ok().json(receipt),
        Err(e) => {
            tracing::error!(error = %e, "Session use failed");
            e.error_response()
        }
    }
}

/// GET /safe/owners
///
/// Read the Safe's current legacy owner list.
#[tracing::instrument(skip_all, fields(chain_id = query.chain_id, safe = %query.address))]
pub async fn owners(
    req: HttpRequest,
    settings: web::Data<Settings>,
    auth: web::Data<PasskeyAuthProtocol>,
    bootstrap: web::Data<SafeBootstrapProtocol>,
    query: web::Query<OwnersQuery>,
) -> HttpResponse {
    if let Err(e) = session_user(&req, &auth) {
        return e.error_response();
    }
    if let Err(e) = ensure_supported(&settings, query.chain_id) {
        return e.error_response();
    }

    match bootstrap.read_owners(query.chain_id, query.address).await {
        Ok(owners) => HttpResponse::Ok().json(json!({ "owners": owners })),
        Err(e) => e.error_response(),
    }
}

/// Configure safe routes; mounted under `/safe` by the server so the scope
/// can carry its own rate-limit tier.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/create", web::post().to(create_safe))
        .route("/transact/prepare", web::post().to(prepare))
        .route("/transact/execute", web::post().to(execute))
        .route("/session/configure", web::post().to(session_configure))
        .route("/session/enable", web::post().to(session_enable))
        .route("/session/use", web::post().to(session_use))
        .route("/owners", web::get().to(owners));
}
