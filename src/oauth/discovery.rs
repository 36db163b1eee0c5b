//! OAuth metadata discovery
//!
//! Implements RFC 9728 protected-resource metadata discovery and
//! RFC 8414 / OpenID Connect Discovery for authorization-server metadata,
//! all routed through the recording HTTP wrapper so every discovery request
//! shows up in the diagnostic log.
//!
//! # Discovery sequence
//!
//! 1. [`fetch_protected_resource_metadata`] tries the RFC 9728 well-known
//!    URI derived from the target server URL.  Failure here is tolerated by
//!    the state machine: it records the error and falls back to the target
//!    server's own origin as the authorization server.
//! 2. [`fetch_authorization_server_metadata`] tries five well-known endpoint
//!    orderings defined by RFC 8414 and OIDC Discovery 1.0 against the
//!    resolved authorization-server URL.  Failure here is fatal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{McprobeError, Result};
use crate::oauth::http_log::{RecordingClient, TrafficKind};

// ---------------------------------------------------------------------------
// Protected Resource Metadata (RFC 9728)
// ---------------------------------------------------------------------------

/// Metadata document describing a protected OAuth resource.
///
/// Retrieved from `/.well-known/oauth-protected-resource<path>` on the
/// target server; points the client at the authorization server(s)
/// protecting that resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// The URI of the protected resource itself.
    pub resource: String,

    /// Authorization server issuer URIs that protect this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// OAuth scopes supported by this resource, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Supported methods for presenting bearer tokens (e.g. `"header"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Authorization Server Metadata (RFC 8414 / OIDC Discovery)
// ---------------------------------------------------------------------------

/// Metadata document describing an OAuth / OIDC authorization server.
///
/// Cached in storage between steps so guided flows do not re-discover it,
/// and consulted by the client-identity resolution step for registration
/// and client-ID-metadata-document support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// The issuer identifier URI for this authorization server.
    pub issuer: String,

    /// The authorization endpoint (RFC 6749 section 3.1).
    pub authorization_endpoint: String,

    /// The token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Dynamic client registration endpoint (RFC 7591), if offered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// OAuth scopes the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// `response_type` values the server supports (e.g. `["code"]`).
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// `grant_type` values the server supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// PKCE challenge methods the server supports (e.g. `["S256"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Whether the server accepts a client-ID metadata document URL as the
    /// `client_id` value, avoiding a registration round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_metadata_document_supported: Option<bool>,

    /// Additional server metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Discovery functions
// ---------------------------------------------------------------------------

/// Returns the origin (`scheme://host[:port]`) of a URL as a new URL.
///
/// Used as the authorization-server fallback when protected-resource
/// discovery yields nothing.
pub fn server_origin(url: &Url) -> Result<Url> {
    let origin = url.origin();
    if !matches!(origin, url::Origin::Tuple(..)) {
        return Err(McprobeError::Discovery(format!("URL has no usable origin: {url}")).into());
    }
    Ok(Url::parse(&origin.ascii_serialization()).map_err(McprobeError::UrlParse)?)
}

/// Builds the RFC 9728 well-known URL for a resource server.
///
/// The resource's path component is appended to the well-known prefix:
/// `https://host/.well-known/oauth-protected-resource<path>`.
fn protected_resource_metadata_url(resource_url: &Url) -> Url {
    let path = resource_url.path();
    let well_known_path = if path == "/" || path.is_empty() {
        "/.well-known/oauth-protected-resource".to_string()
    } else {
        format!("/.well-known/oauth-protected-resource{path}")
    };

    let mut well_known = resource_url.clone();
    well_known.set_path(&well_known_path);
    well_known.set_query(None);
    well_known.set_fragment(None);
    well_known
}

/// Fetches the RFC 9728 protected-resource metadata for a server.
///
/// # Errors
///
/// Returns [`McprobeError::Discovery`] if the request fails, returns a
/// non-success status, or the body does not parse.  Callers running the
/// metadata-discovery step treat this error as tolerable.
pub async fn fetch_protected_resource_metadata(
    http: &RecordingClient,
    resource_url: &Url,
) -> Result<ProtectedResourceMetadata> {
    let well_known = protected_resource_metadata_url(resource_url);
    debug!(url = %well_known, "fetching protected resource metadata");

    let resp = http.get(TrafficKind::Auth, well_known.as_str()).await?;
    if !resp.is_success() {
        return Err(McprobeError::Discovery(format!(
            "protected resource metadata not found for {resource_url} (status {})",
            resp.status()
        ))
        .into());
    }

    let meta: ProtectedResourceMetadata = resp.json().map_err(|e| {
        McprobeError::Discovery(format!("failed to parse protected resource metadata: {e}"))
    })?;
    Ok(meta)
}

/// Constructs the candidate well-known URLs for authorization-server
/// metadata discovery, tried in order:
///
/// 1. `/.well-known/oauth-authorization-server/<path>` (path insertion)
/// 2. `/.well-known/openid-configuration/<path>` (path insertion)
/// 3. `<issuer>/.well-known/openid-configuration` (path appending)
/// 4. `/.well-known/oauth-authorization-server` (root)
/// 5. `/.well-known/openid-configuration` (root)
fn authorization_server_candidate_urls(issuer: &Url) -> Vec<Url> {
    let path = issuer.path().trim_end_matches('/').to_string();
    let mut candidates = Vec::with_capacity(5);

    let make = |s: String| Url::parse(&s).ok();

    let origin = {
        let host = issuer.host_str().unwrap_or_default();
        match issuer.port() {
            Some(port) => format!("{}://{}:{}", issuer.scheme(), host, port),
            None => format!("{}://{}", issuer.scheme(), host),
        }
    };

    if let Some(u) = make(format!(
        "{origin}/.well-known/oauth-authorization-server{path}"
    )) {
        candidates.push(u);
    }
    if let Some(u) = make(format!("{origin}/.well-known/openid-configuration{path}")) {
        candidates.push(u);
    }
    {
        let mut appended = issuer.clone();
        appended.set_path(&format!("{path}/.well-known/openid-configuration"));
        appended.set_query(None);
        appended.set_fragment(None);
        candidates.push(appended);
    }
    if let Some(u) = make(format!("{origin}/.well-known/oauth-authorization-server")) {
        candidates.push(u);
    }
    if let Some(u) = make(format!("{origin}/.well-known/openid-configuration")) {
        candidates.push(u);
    }

    // Path-inserted and root candidates coincide for a root issuer; keep the
    // first occurrence of each URL.
    let mut seen = Vec::new();
    candidates.retain(|u| {
        if seen.contains(u) {
            false
        } else {
            seen.push(u.clone());
            true
        }
    });
    candidates
}

/// Fetches the authorization-server metadata document.
///
/// Tries the well-known candidate orderings from
/// [`authorization_server_candidate_urls`], returning the first candidate
/// that responds with parseable metadata.
///
/// # Errors
///
/// Returns [`McprobeError::Discovery`] when every candidate fails.  Unlike
/// protected-resource discovery, this failure is fatal to the flow.
pub async fn fetch_authorization_server_metadata(
    http: &RecordingClient,
    issuer: &Url,
) -> Result<AuthorizationServerMetadata> {
    for candidate in authorization_server_candidate_urls(issuer) {
        debug!(url = %candidate, "trying authorization server metadata candidate");
        let resp = match http.get(TrafficKind::Auth, candidate.as_str()).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !resp.is_success() {
            continue;
        }
        match resp.json::<AuthorizationServerMetadata>() {
            Ok(meta) => return Ok(meta),
            Err(_) => continue,
        }
    }

    Err(McprobeError::Discovery(format!(
        "authorization server metadata not found for issuer {issuer}"
    ))
    .into())
}

/// Resolves the RFC 8707 `resource` indicator from discovered
/// protected-resource metadata.
///
/// The advertised `resource` value is used when it parses as a URL;
/// otherwise the target server URL stands in.  Callers pass `None` when no
/// protected-resource metadata was found, in which case no resource
/// indicator is sent at all.
pub fn resolve_resource(
    resource_metadata: Option<&ProtectedResourceMetadata>,
    server_url: &Url,
) -> Option<Url> {
    let meta = resource_metadata?;
    match Url::parse(&meta.resource) {
        Ok(resource) => Some(resource),
        Err(_) => Some(server_url.clone()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_resource_metadata_url_for_root_path() {
        let url = Url::parse("http://localhost:9001/").unwrap();
        assert_eq!(
            protected_resource_metadata_url(&url).as_str(),
            "http://localhost:9001/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn test_protected_resource_metadata_url_appends_resource_path() {
        let url = Url::parse("https://api.example.com/mcp?x=1").unwrap();
        assert_eq!(
            protected_resource_metadata_url(&url).as_str(),
            "https://api.example.com/.well-known/oauth-protected-resource/mcp"
        );
    }

    #[test]
    fn test_candidate_urls_root_issuer_deduplicates() {
        let issuer = Url::parse("https://auth.example.com").unwrap();
        let candidates = authorization_server_candidate_urls(&issuer);
        // Path-inserted candidates collapse into the root ones.
        assert!(candidates.len() >= 2);
        let mut unique = candidates.clone();
        unique.dedup();
        assert_eq!(candidates.len(), unique.len());
        assert!(candidates[0]
            .as_str()
            .contains("/.well-known/oauth-authorization-server"));
    }

    #[test]
    fn test_candidate_urls_pathful_issuer_produces_five() {
        let issuer = Url::parse("https://auth.example.com/tenant/v2").unwrap();
        let candidates = authorization_server_candidate_urls(&issuer);
        assert_eq!(candidates.len(), 5);
        assert!(
            candidates[0].as_str().contains("/tenant/v2"),
            "first candidate inserts the issuer path: {}",
            candidates[0]
        );
        let last = candidates.last().unwrap().as_str();
        assert!(
            !last.contains("/tenant/v2"),
            "root candidates drop the issuer path: {last}"
        );
    }

    #[test]
    fn test_server_origin_strips_path_and_query() {
        let url = Url::parse("http://localhost:9001/api/mcp?probe=1").unwrap();
        let origin = server_origin(&url).unwrap();
        assert_eq!(origin.as_str(), "http://localhost:9001/");
    }

    #[test]
    fn test_resolve_resource_none_without_metadata() {
        let server = Url::parse("http://localhost:9001/").unwrap();
        assert!(resolve_resource(None, &server).is_none());
    }

    #[test]
    fn test_resolve_resource_uses_advertised_value() {
        let server = Url::parse("http://localhost:9001/").unwrap();
        let meta = ProtectedResourceMetadata {
            resource: "https://api.example.com/mcp".to_string(),
            authorization_servers: vec![],
            scopes_supported: None,
            bearer_methods_supported: None,
        };
        let resolved = resolve_resource(Some(&meta), &server).unwrap();
        assert_eq!(resolved.as_str(), "https://api.example.com/mcp");
    }

    #[test]
    fn test_resolve_resource_falls_back_on_unparseable_value() {
        let server = Url::parse("http://localhost:9001/").unwrap();
        let meta = ProtectedResourceMetadata {
            resource: "not a url".to_string(),
            authorization_servers: vec![],
            scopes_supported: None,
            bearer_methods_supported: None,
        };
        let resolved = resolve_resource(Some(&meta), &server).unwrap();
        assert_eq!(resolved, server);
    }

    #[test]
    fn test_authorization_server_metadata_deserializes_with_extras() {
        let json = r#"{
            "issuer": "http://localhost:8081",
            "authorization_endpoint": "http://localhost:8081/authorize",
            "token_endpoint": "http://localhost:8081/token",
            "registration_endpoint": "http://localhost:8081/register",
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code"],
            "scopes_supported": ["read", "write", "admin"],
            "code_challenge_methods_supported": ["S256", "plain"],
            "token_endpoint_auth_methods_supported": ["client_secret_basic"]
        }"#;
        let meta: AuthorizationServerMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.token_endpoint, "http://localhost:8081/token");
        assert_eq!(
            meta.registration_endpoint.as_deref(),
            Some("http://localhost:8081/register")
        );
        assert!(meta.client_id_metadata_document_supported.is_none());
        assert!(meta
            .extra
            .contains_key("token_endpoint_auth_methods_supported"));
    }

    #[test]
    fn test_protected_resource_metadata_deserializes_minimal() {
        let json = r#"{"resource": "https://api.example.com", "authorization_servers": []}"#;
        let meta: ProtectedResourceMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.resource, "https://api.example.com");
        assert!(meta.authorization_servers.is_empty());
    }
}
