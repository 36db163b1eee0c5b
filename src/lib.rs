//! MCProbe - OAuth client authentication core for protocol-server inspection
//!
//! This library provides the OAuth subsystem of an MCP-style server
//! inspection tool: metadata discovery, client identity resolution, the
//! guided authorization-code + PKCE state machine, token persistence, and
//! full HTTP traffic recording for diagnostics.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `oauth`: discovery, PKCE, the identity provider, the state machine,
//!   and the storage backends
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcprobe::config::Config;
//! use mcprobe::oauth::{OAuthProvider, OAuthStateMachine, RecordingClient};
//! use mcprobe::oauth::provider::Navigation;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     config.validate()?;
//!
//!     let provider = Arc::new(OAuthProvider::new(
//!         config.server_url()?,
//!         config.auth_mode()?,
//!         config.build_storage()?,
//!         config.redirect_urls()?,
//!         Navigation::Console(None),
//!     ));
//!     let mut machine = OAuthStateMachine::new(provider, RecordingClient::default());
//!     machine.proceed().await?; // metadata_discovery
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod oauth;

// Re-export commonly used types
pub use config::Config;
pub use error::{McprobeError, Result};
pub use oauth::{
    AuthMode, OAuthClientInformation, OAuthProvider, OAuthStateMachine, OAuthStep, OAuthStorage,
    OAuthTokens, RecordingClient,
};
