//! Error types for the orchestrator service.
//!
//! All errors implement `ResponseError` for Actix-web integration,
//! converting domain errors into appropriate HTTP status codes.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Service error type with structured error responses.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    // Authentication errors
    #[error("Invalid or expired challenge")]
    ChallengeInvalid,

    #[error("Credential or username already registered: {0}")]
    DuplicateCredential(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("User not found: {0}")]
    UserNotFound(String),

    // User-operation staging errors
    #[error("Unknown user operation: {0}")]
    UnknownOperation(String),

    #[error("ABI unavailable for contract {0}")]
    AbiUnavailable(String),

    #[error("User operation {hash} reverted on chain {chain_id}: {reason}")]
    OperationReverted {
        hash: String,
        chain_id: u64,
        reason: String,
    },

    // Bootstrap errors
    #[error("Bootstrap ordering violation: {0}")]
    BootstrapOrderingViolation(String),

    // Session errors
    #[error("Unknown session config: {0}")]
    UnknownSession(String),

    #[error("Session not enabled: {0}")]
    SessionNotEnabled(String),

    // Chain errors
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("Chain RPC error on chain {chain_id}: {message}")]
    ChainRpc { chain_id: u64, message: String },

    #[error("Timed out waiting for receipt of {hash} on chain {chain_id}")]
    ReceiptTimeout { hash: String, chain_id: u64 },

    // Configuration errors
    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),

    // Rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    // Input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl OrchestratorError {
    /// Get the error code for structured error responses.
    fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::ChallengeInvalid => Some("CHALLENGE_INVALID"),
            Self::DuplicateCredential(_) => Some("DUPLICATE_CREDENTIAL"),
            Self::CredentialNotFound(_) => Some("CREDENTIAL_NOT_FOUND"),
            Self::SignatureInvalid(_) => Some("SIGNATURE_INVALID"),
            Self::Unauthenticated => Some("UNAUTHENTICATED"),
            Self::UserNotFound(_) => Some("USER_NOT_FOUND"),
            Self::UnknownOperation(_) => Some("UNKNOWN_OPERATION"),
            Self::AbiUnavailable(_) => Some("ABI_UNAVAILABLE"),
            Self::OperationReverted { .. } => Some("OPERATION_REVERTED"),
            Self::BootstrapOrderingViolation(_) => Some("BOOTSTRAP_ORDERING_VIOLATION"),
            Self::UnknownSession(_) => Some("UNKNOWN_SESSION"),
            Self::SessionNotEnabled(_) => Some("SESSION_NOT_ENABLED"),
            Self::UnsupportedChain(_) => Some("UNSUPPORTED_CHAIN"),
            Self::ChainRpc { .. } => Some("CHAIN_RPC_ERROR"),
            Self::ReceiptTimeout { .. } => Some("RECEIPT_TIMEOUT"),
            Self::ConfigurationMissing(_) => Some("CONFIGURATION_MISSING"),
            Self::RateLimitExceeded(_) => Some("RATE_LIMIT_EXCEEDED"),
            Self::InvalidInput(_) => Some("INVALID_INPUT"),
            Self::Storage(_) => Some("STORAGE_ERROR"),
            Self::Serialization(_) => Some("SERIALIZATION_ERROR"),
            Self::Deserialization(_) => Some("DESERIALIZATION_ERROR"),
            Self::Internal(_) => None, // Don't expose internal error codes
        }
    }
}

impl ResponseError for OrchestratorError {
    fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request - Client errors
            Self::InvalidInput(_)
            | Self::UnsupportedChain(_)
            | Self::Serialization(_)
            | Self::Deserialization(_) => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            Self::ChallengeInvalid | Self::SignatureInvalid(_) | Self::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }

            // 404 Not Found
            Self::CredentialNotFound(_)
            | Self::UserNotFound(_)
            | Self::UnknownOperation(_)
            | Self::UnknownSession(_) => StatusCode::NOT_FOUND,

            // 409 Conflict - State conflicts
            Self::DuplicateCredential(_) | Self::SessionNotEnabled(_) => StatusCode::CONFLICT,

            // 422 Unprocessable Entity - Business logic errors
            Self::OperationReverted { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 502 Bad Gateway - Downstream errors
            Self::AbiUnavailable(_) | Self::ChainRpc { .. } => StatusCode::BAD_GATEWAY,

            // 429 Too Many Requests
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,

            // 504 Gateway Timeout
            Self::ReceiptTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error - Everything else
            Self::BootstrapOrderingViolation(_)
            | Self::ConfigurationMissing(_)
            | Self::Storage(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().map(String::from),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

// Conversion from common error types

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for OrchestratorError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for OrchestratorError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for OrchestratorError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for OrchestratorError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for OrchestratorError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for OrchestratorError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
