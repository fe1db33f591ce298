//! Middleware for the orchestrator service.
//!
//! Provides cross-cutting concerns like internal-token auth and rate
//! limiting that apply across multiple routes.

pub mod auth;
pub mod rate_limit;

pub use auth::InternalAuth;
pub use rate_limit::{RateLimitConfig, RateLimiter, auth_limiter, general_limiter, transact_limiter};
