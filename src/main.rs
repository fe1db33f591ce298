//! Safe Orchestrator server.
//!
//! Wires settings, storage, the chain gateway, and the protocol services
//! into the actix-web application.
//!
//! ## Responsibilities
//!
//! - Validate configuration before binding (fail fast on missing secrets)
//! - Share one staging table between direct transacting, bootstrap, and
//!   smart sessions so the at-most-once consumption guarantee is global
//! - Apply internal-token auth and per-tier rate limits

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware as actix_middleware, web};
use tracing_actix_web::TracingLogger;

use safe_orchestrator::auth::{ChallengeStore, PasskeyAuthProtocol, SessionStore};
use safe_orchestrator::chain::{AbiResolver, BundlerGateway, ChainGateway, EtherscanResolver};
use safe_orchestrator::config::Settings;
use safe_orchestrator::middleware::{
    InternalAuth, RateLimitConfig, auth_limiter, general_limiter, transact_limiter,
};
use safe_orchestrator::routes;
use safe_orchestrator::safe::{
    EoaSigner, SafeBootstrapProtocol, SessionModuleConfigurator, UserOperationStaging,
};
use safe_orchestrator::telemetry;
use safe_orchestrator::user::UserStore;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing first
    telemetry::init_tracing();

    // Load and validate settings
    let settings = Settings::from_env();
    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    // Durable user storage
    let users = match UserStore::open(settings.db_path()) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open user database");
            std::process::exit(1);
        }
    };

    // Chain access
    let gateway: Arc<dyn ChainGateway> = match BundlerGateway::new(&settings) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create chain gateway");
            std::process::exit(1);
        }
    };
    let abi_resolver: Arc<dyn AbiResolver> = Arc::new(EtherscanResolver::new(
        settings.explorer_url(),
        settings.explorer_api_key(),
    ));

    // Deployer key for bootstrap and module installation
    let deployer = match settings.deployer_key().map(EoaSigner::from_hex) {
        Some(Ok(signer)) => Arc::new(signer),
        _ => {
            tracing::error!("DEPLOYER_KEY is missing or malformed");
            std::process::exit(1);
        }
    };

    // Protocol services sharing one staging table
    let staging = Arc::new(UserOperationStaging::new(
        Arc::clone(&gateway),
        abi_resolver,
        settings.pending_op_ttl(),
    ));
    let bootstrap = SafeBootstrapProtocol::new(
        Arc::clone(&gateway),
        Arc::clone(&staging),
        Arc::clone(&deployer),
    );
    let configurator = SessionModuleConfigurator::new(
        Arc::clone(&gateway),
        Arc::clone(&staging),
        Arc::clone(&deployer),
        settings.pending_op_ttl(),
    );
    let passkey_auth = PasskeyAuthProtocol::new(
        ChallengeStore::new(settings.challenge_ttl()),
        SessionStore::new(settings.session_ttl()),
        users.clone(),
        settings.rp_id().map(ToString::to_string),
    );

    let addr = settings.socket_addr();
    let rate_config = RateLimitConfig::from_env();
    tracing::info!(
        auth_per_hour = rate_config.auth_per_hour,
        transact_per_hour = rate_config.transact_per_hour,
        "Rate limiting enabled"
    );
    tracing::info!(
        addr = %addr,
        chains = ?settings.supported_chains(),
        deployer = %deployer.address(),
        "Starting Safe Orchestrator"
    );

    let internal_auth = InternalAuth::new(&settings);
    let body_limit = settings.body_limit_bytes();

    // Shared state
    let settings_data = web::Data::new(settings);
    let users_data = web::Data::new(users);
    let auth_data = web::Data::new(passkey_auth);
    let bootstrap_data = web::Data::new(bootstrap);
    let configurator_data = web::Data::new(configurator);
    let staging_data = web::Data::from(staging);
    let gateway_data = web::Data::from(gateway);

    HttpServer::new(move || {
        App::new()
            // Rate limiting backstop (applied first)
            .wrap(general_limiter())
            // Internal service token
            .wrap(internal_auth.clone())
            // Request tracing
            .wrap(TracingLogger::default())
            // Default headers
            .wrap(actix_middleware::DefaultHeaders::new().add(("X-Service", "safe-orchestrator")))
            // Body size limit
            .app_data(web::JsonConfig::default().limit(body_limit))
            // Shared state
            .app_data(settings_data.clone())
            .app_data(users_data.clone())
            .app_data(auth_data.clone())
            .app_data(bootstrap_data.clone())
            .app_data(configurator_data.clone())
            .app_data(staging_data.clone())
            .app_data(gateway_data.clone())
            // Routes
            .configure(routes::health::configure)
            .service(
                web::scope("/auth")
                    .wrap(auth_limiter(&rate_config))
                    .configure(routes::auth::configure),
            )
            .service(
                web::scope("/safe")
                    .wrap(transact_limiter(&rate_config))
                    .configure(routes::safe::configure),
            )
    })
    .bind(addr)?
    .run()
    .await?;

    // Shutdown tracing
    telemetry::shutdown_tracing();

    Ok(())
}
