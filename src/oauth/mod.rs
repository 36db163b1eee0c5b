//! OAuth client authentication for protocol-server inspection
//!
//! This module implements the full authorization-code + PKCE client flow
//! used to authenticate against protected MCP-style servers, decomposed so
//! that each step can be driven, inspected, and rendered individually:
//!
//! - `discovery`: protected-resource (RFC 9728) and authorization-server
//!   (RFC 8414 / OIDC) metadata discovery
//! - `pkce`: S256 code verifier/challenge generation (RFC 7636)
//! - `provider`: the client identity provider tying storage, redirect-URL,
//!   and navigation strategies together
//! - `machine`: the six-step guided authorization state machine
//! - `storage`: interchangeable persistence backends (memory, file, remote)
//! - `http_log`: the recording HTTP client every OAuth request flows through
//! - `types`: shared data types (client information, tokens, stored state)

pub mod discovery;
pub mod http_log;
pub mod machine;
pub mod pkce;
pub mod provider;
pub mod storage;
pub mod types;

// Re-export the types most callers need
pub use http_log::{HttpExchange, RecordingClient, TrafficKind};
pub use machine::{GuidedAuthState, OAuthStateMachine, OAuthStep};
pub use provider::{AuthMode, Navigation, OAuthEvent, OAuthProvider, RedirectUrls};
pub use storage::{FileStorage, HttpStorage, MemoryStorage, OAuthStorage};
pub use types::{OAuthClientInformation, OAuthClientMetadata, OAuthTokens};
