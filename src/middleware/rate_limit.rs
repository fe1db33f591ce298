//! Rate limiting middleware.
//!
//! Per-IP limits keep the challenge endpoint from being used to flood the
//! in-memory challenge table and keep user-operation submission below
//! bundler quotas. Uses actix-governor with the built-in PeerIpKeyExtractor.

use actix_governor::{Governor, GovernorConfigBuilder, PeerIpKeyExtractor};

/// Configuration for rate limiting across endpoints.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum auth requests (challenge/verify) per hour per IP.
    pub auth_per_hour: u32,
    /// Maximum transact requests (prepare/execute/session) per hour per IP.
    pub transact_per_hour: u32,
    /// Burst size for auth endpoints.
    pub auth_burst: u32,
    /// Burst size for transact endpoints.
    pub transact_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_per_hour: 120,
            transact_per_hour: 60,
            auth_burst: 10,
            transact_burst: 10,
        }
    }
}

impl RateLimitConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auth_per_hour: std::env::var("RATE_LIMIT_AUTH_PER_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.auth_per_hour),
            transact_per_hour: std::env::var("RATE_LIMIT_TRANSACT_PER_HOUR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.transact_per_hour),
            auth_burst: std::env::var("RATE_LIMIT_AUTH_BURST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.auth_burst),
            transact_burst: std::env::var("RATE_LIMIT_TRANSACT_BURST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.transact_burst),
        }
    }
}

/// Type alias for the Governor middleware with default settings.
pub type RateLimiter = Governor<PeerIpKeyExtractor, governor::middleware::NoOpMiddleware>;

fn limiter(per_hour: u32, burst: u32, fallback_seconds: u64) -> RateLimiter {
    let seconds_per_request = if per_hour > 0 {
        3600 / u64::from(per_hour)
    } else {
        fallback_seconds
    };

    let governor_config = GovernorConfigBuilder::default()
        .seconds_per_request(seconds_per_request.max(1))
        .burst_size(burst)
        .finish()
        .expect("Failed to build rate limiter");

    Governor::new(&governor_config)
}

/// Rate limiter for auth endpoints (challenge issuance and verification).
pub fn auth_limiter(config: &RateLimitConfig) -> RateLimiter {
    limiter(config.auth_per_hour, config.auth_burst, 30)
}

/// Rate limiter for transact endpoints (prepare, execute, sessions, create).
pub fn transact_limiter(config: &RateLimitConfig) -> RateLimiter {
    limiter(config.transact_per_hour, config.transact_burst, 60)
}

/// Permissive limiter applied app-wide as a backstop.
pub fn general_limiter() -> RateLimiter {
    let governor_config = GovernorConfigBuilder::default()
        .seconds_per_request(1)
        .burst_size(60)
        .finish()
        .expect("Failed to build general rate limiter");

    Governor::new(&governor_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RateLimitConfig::default();
        assert!(config.auth_per_hour > 0);
        assert!(config.transact_per_hour > 0);
    }

    #[test]
    fn test_limiters_build() {
        let config = RateLimitConfig::default();
        let _ = auth_limiter(&config);
        let _ = transact_limiter(&config);
        let _ = general_limiter();

        // Zero rates fall back instead of dividing by zero
        let zeroed = RateLimitConfig {
            auth_per_hour: 0,
            transact_per_hour: 0,
            auth_burst: 1,
            transact_burst: 1,
        };
        let _ = auth_limiter(&zeroed);
        let _ = transact_limiter(&zeroed);
    }
}
