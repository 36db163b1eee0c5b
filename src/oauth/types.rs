//! Core OAuth data types shared across the authorization subsystem
//!
//! These types model the records that flow between the state machine, the
//! client identity provider, and the storage backends: client credentials,
//! token sets, and the per-server state record persisted by the file and
//! remote stores.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::oauth::discovery::AuthorizationServerMetadata;

// ---------------------------------------------------------------------------
// OAuthClientInformation
// ---------------------------------------------------------------------------

/// Client credentials for one protocol server.
///
/// Produced by one of three paths: static configuration, a dynamic client
/// registration response (RFC 7591), or synthesized directly from a
/// client-ID-metadata-document URL with no network call.  Registration
/// responses deserialize straight into this type; unknown response fields
/// are ignored.
///
/// # Examples
///
/// ```
/// use mcprobe::oauth::types::OAuthClientInformation;
///
/// let json = r#"{"client_id": "abc", "client_secret": "shh", "client_id_issued_at": 1700000000}"#;
/// let info: OAuthClientInformation = serde_json::from_str(json).unwrap();
/// assert_eq!(info.client_id, "abc");
/// assert_eq!(info.client_secret.as_deref(), Some("shh"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClientInformation {
    /// The client identifier issued by (or presented to) the authorization
    /// server.  In client-ID-metadata-document mode this is the document URL
    /// itself, verbatim.
    pub client_id: String,

    /// Client secret for confidential clients.  Public clients have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl OAuthClientInformation {
    /// Creates client information for a public client (no secret).
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }
}

// ---------------------------------------------------------------------------
// OAuthTokens
// ---------------------------------------------------------------------------

/// A token set returned by the token endpoint.
///
/// Fields map directly to the RFC 6749 token response.  The tokens are
/// opaque to this crate beyond storage and refresh.  The `expires_at` field
/// is not part of the wire response; it is stamped from `expires_in` when
/// the response is received so that expiry can be determined later without
/// remembering when the exchange happened.
///
/// # Examples
///
/// ```
/// use mcprobe::oauth::types::OAuthTokens;
///
/// let json = r#"{"access_token": "tok", "token_type": "Bearer", "expires_in": 3600}"#;
/// let mut tokens: OAuthTokens = serde_json::from_str(json).unwrap();
/// tokens.stamp_expiry();
/// assert!(!tokens.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, typically `"Bearer"`.
    pub token_type: String,

    /// Access token lifetime in seconds, as returned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token usable to obtain a new access token without re-running
    /// the full authorization flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// UTC timestamp at which the access token expires, computed from
    /// `expires_in` by [`stamp_expiry`](Self::stamp_expiry).  `None` means
    /// the token is treated as non-expiring.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthTokens {
    /// Converts `expires_in` into an absolute `expires_at` timestamp.
    ///
    /// Call once, immediately after deserializing a token endpoint response.
    /// A token response without `expires_in` leaves `expires_at` untouched.
    pub fn stamp_expiry(&mut self) {
        if let Some(secs) = self.expires_in {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            self.expires_at = Some(Utc::now() + chrono::Duration::seconds(secs));
        }
    }

    /// Returns `true` when the access token is expired or about to expire.
    ///
    /// A 60-second buffer is applied so that callers have time to exchange a
    /// refresh token before the access token is rejected by the resource
    /// server.  Tokens with no `expires_at` value are considered perpetually
    /// valid.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(60);
                Utc::now() >= expires_at - buffer
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OAuthClientMetadata
// ---------------------------------------------------------------------------

/// Client metadata sent to the dynamic client registration endpoint
/// (RFC 7591) and embedded in client-ID metadata documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientMetadata {
    /// Human-readable name for this client application.
    pub client_name: String,

    /// Redirect URIs registered for this client.
    pub redirect_uris: Vec<String>,

    /// Grant types this client uses.
    pub grant_types: Vec<String>,

    /// Response types this client uses.
    pub response_types: Vec<String>,

    /// Token endpoint authentication method; `"none"` for public clients.
    pub token_endpoint_auth_method: String,

    /// Space-separated scope string to request at registration time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

// ---------------------------------------------------------------------------
// ServerOAuthState and the shared state document
// ---------------------------------------------------------------------------

/// The complete OAuth state for one protocol server.
///
/// Uniquely keyed by a normalized server URL inside
/// [`OAuthStateDocument`]; states for distinct servers never interact.
/// Created lazily as an empty record on first access, mutated incrementally
/// as flow steps succeed, and erased in full by a clear (logout) or
/// selectively (tokens only, on a 401).
///
/// Field names serialize in camelCase to match the on-disk and remote-store
/// document format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOAuthState {
    /// Dynamically registered client information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_information: Option<OAuthClientInformation>,

    /// Statically configured (preregistered) client information.  Takes
    /// priority over `client_information` at resolution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preregistered_client_information: Option<OAuthClientInformation>,

    /// The last token set obtained for this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokens>,

    /// The PKCE code verifier for the in-flight flow.  Persisted only long
    /// enough to survive the redirect round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,

    /// Space-separated scope string associated with this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Cached authorization-server metadata, so guided flows do not
    /// re-discover it between steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_metadata: Option<AuthorizationServerMetadata>,
}

impl ServerOAuthState {
    /// Returns `true` when every field is absent.
    ///
    /// Backends drop empty records from the shared document rather than
    /// persisting `{}` entries.
    pub fn is_empty(&self) -> bool {
        self.client_information.is_none()
            && self.preregistered_client_information.is_none()
            && self.tokens.is_none()
            && self.code_verifier.is_none()
            && self.scope.is_none()
            && self.server_metadata.is_none()
    }
}

/// The single JSON document persisted by the file-backed and remote stores:
/// a map from normalized server URL to [`ServerOAuthState`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthStateDocument {
    /// Per-server states keyed by normalized server URL.
    #[serde(default)]
    pub servers: HashMap<String, ServerOAuthState>,
}

/// Normalizes a server URL into the string key used by every storage
/// backend.
///
/// The `url` crate's canonical serialization (lowercased host, default port
/// elided, empty path rendered as `/`) guarantees two spellings of the same
/// server collapse to one key.
pub fn normalize_server_url(url: &Url) -> String {
    url.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
