// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! Safe Orchestrator Service
//!
//! Lets a user control an ERC-4337 smart-contract wallet ("Safe") without a
//! client-side private key: WebAuthn passkeys (or scoped session keys)
//! authenticate the user, and the wallet is driven through user operations
//! submitted via a third-party bundler/paymaster.
//!
//! ## Architecture
//!
//! - **Passkey auth** (`auth`): challenge/response state machine binding a
//!   WebAuthn credential to a user record and a login session.
//!
//! - **User-operation staging** (`safe::staging`): the two-phase pipeline —
//!   `prepare` builds, prices, and stages an unsigned operation keyed by its
//!   canonical hash; `execute` attaches the externally produced signature
//!   and submits. The pending entry is consumed at most once, on success.
//!
//! - **Bootstrap** (`safe::bootstrap`): hands a fresh Safe to validator
//!   modules, then rotates the deployer key out behind a deterministic
//!   unspendable owner, in an order that can never leave the Safe ownerless.
//!
//! - **Smart sessions** (`safe::session_module`): a second, narrower signer
//!   layered on the same staging pipeline.
//!
//! ## State
//!
//! Only user records persist (ReDB). Challenges, staged operations, pending
//! session enables, and login sessions are in-memory with TTLs and never
//! survive a restart.

pub mod abi;
pub mod auth;
pub mod chain;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod safe;
pub mod user;

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Stub telemetry module when OpenTelemetry is disabled.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    /// Initialize tracing with console output only.
    pub fn init_tracing() {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "safe_orchestrator=info,actix_web=info".into());
        let fmt_layer = tracing_subscriber::fmt::layer();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    /// No-op shutdown when OpenTelemetry is disabled.
    pub fn shutdown_tracing() {}
}

// Re-export commonly used types
pub use config::Settings;
pub use error::{OrchestratorError, OrchestratorResult};
