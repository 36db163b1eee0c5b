//! Error types for MCProbe
//!
//! This module defines all error types used throughout the OAuth core,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for MCProbe operations
///
/// This enum encompasses all possible errors that can occur while driving
/// the OAuth authorization flow: configuration problems, metadata discovery
/// failures, client registration failures, token exchange failures, and
/// storage backend failures.
///
/// Empty or missing authorization codes are deliberately *not* an error
/// variant: the state machine reports them through a validation field on its
/// working state so an interactive caller can re-prompt without unwinding
/// the whole flow.
#[derive(Error, Debug)]
pub enum McprobeError {
    /// Configuration-related errors (missing mode-specific inputs)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata discovery errors (protected-resource or authorization-server)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Dynamic client registration errors
    #[error("Registration error: {0}")]
    Registration(String),

    /// Token endpoint errors (invalid code, invalid verifier, expired code)
    #[error("Token exchange error: {0}")]
    Exchange(String),

    /// Storage backend errors (read/write/parse failures in any backend)
    #[error("Storage error: {0}")]
    Storage(String),

    /// A state machine step was executed while its precondition was false
    #[error("cannot transition from `{0}`")]
    InvalidTransition(String),

    /// General OAuth errors not covered by a more specific variant
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Result type alias for MCProbe operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
