//! Safe orchestration protocols.
//!
//! This module contains:
//! - `types`: call model, user-operation shape and hashing, module constants
//! - `staging`: the two-phase prepare/execute pipeline keyed by operation hash
//! - `bootstrap`: the bootstrap-then-brick owner rotation
//! - `session_module`: smart-session enable and use phases
//! - `signer`: secp256k1 EOA signing for the deployer and session keys

pub mod bootstrap;
pub mod session_module;
pub mod signer;
pub mod staging;
pub mod types;

// Re-export key types
pub use bootstrap::{BootstrapOutcome, SafeBootstrapProtocol, ValidatorPlan};
pub use session_module::{ConfiguredSession, SessionAction, SessionModuleConfigurator};
pub use signer::EoaSigner;
pub use staging::{PreparedOperation, UserOperationStaging};
pub use types::{Call, SignedUserOperation, UnsignedUserOperation};
