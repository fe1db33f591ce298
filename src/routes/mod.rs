//! HTTP routes for the orchestrator service.
//!
//! Routes are organized by functionality:
//! - `health`: Health check and build info (public)
//! - `auth`: Passkey challenge/register/login/logout
//! - `safe`: Safe bootstrap, user-operation staging, smart sessions

pub mod auth;
pub mod health;
pub mod safe;

pub use health::{build_info, health};
