//! The guided OAuth authorization state machine
//!
//! Six sequential steps take a flow from nothing to a usable token set:
//!
//! 1. `metadata_discovery` -- locate the authorization server and fetch its
//!    metadata
//! 2. `client_registration` -- resolve a client identity (static, persisted,
//!    client-ID metadata document, or dynamic registration, in that order)
//! 3. `authorization_redirect` -- generate PKCE material and build the
//!    authorization URL
//! 4. `authorization_code` -- accept and validate the code the user brought
//!    back
//! 5. `token_request` -- exchange the code for tokens
//! 6. `complete` -- terminal
//!
//! Each step has a precondition ([`OAuthStateMachine::can_transition`]) and
//! a side-effecting execution ([`OAuthStateMachine::proceed`]).  Executing a
//! step whose precondition is false fails with
//! [`McprobeError::InvalidTransition`]; the flow driver catches that, emits
//! an error event, and leaves the machine where it was.  An empty
//! authorization code is not an error at all: it is reported through
//! [`GuidedAuthState::validation_error`] so an interactive caller can
//! re-prompt without unwinding.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{McprobeError, Result};
use crate::oauth::discovery::{
    self, fetch_authorization_server_metadata, fetch_protected_resource_metadata,
    AuthorizationServerMetadata, ProtectedResourceMetadata,
};
use crate::oauth::http_log::{RecordingClient, TrafficKind};
use crate::oauth::pkce;
use crate::oauth::provider::OAuthProvider;
use crate::oauth::types::{OAuthClientInformation, OAuthTokens};

// ---------------------------------------------------------------------------
// OAuthStep
// ---------------------------------------------------------------------------

/// The six flow steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthStep {
    /// Locate the authorization server and fetch its metadata.
    MetadataDiscovery,
    /// Resolve a client identity for this server.
    ClientRegistration,
    /// Build the PKCE authorization URL and surface it.
    AuthorizationRedirect,
    /// Accept the authorization code from the user.
    AuthorizationCode,
    /// Exchange the code for tokens.
    TokenRequest,
    /// Terminal: tokens obtained.
    Complete,
}

impl OAuthStep {
    /// The snake_case name used in events, logs, and transition errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthStep::MetadataDiscovery => "metadata_discovery",
            OAuthStep::ClientRegistration => "client_registration",
            OAuthStep::AuthorizationRedirect => "authorization_redirect",
            OAuthStep::AuthorizationCode => "authorization_code",
            OAuthStep::TokenRequest => "token_request",
            OAuthStep::Complete => "complete",
        }
    }
}

impl std::fmt::Display for OAuthStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GuidedAuthState
// ---------------------------------------------------------------------------

/// The accumulated working state of one flow, suitable for rendering in a
/// step-by-step UI.
///
/// Every field a completed step produced stays visible so the user can
/// inspect what happened: discovered metadata, the resolved client, the
/// authorization URL, and finally the tokens.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuidedAuthState {
    /// Protected-resource metadata, when the target server advertised it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_metadata: Option<ProtectedResourceMetadata>,

    /// Why protected-resource discovery failed, when it did.  Informational:
    /// the flow falls back to the server origin and continues.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_metadata_error: Option<String>,

    /// The resolved authorization server base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_server_url: Option<Url>,

    /// The authorization server's metadata document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_metadata: Option<AuthorizationServerMetadata>,

    /// The resolved client identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_information: Option<OAuthClientInformation>,

    /// The built authorization URL the user must visit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<Url>,

    /// The authorization code supplied by the user, trimmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,

    /// Set when the supplied authorization code failed validation; cleared
    /// once a valid code is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,

    /// The RFC 8707 resource indicator sent with authorization and token
    /// requests, when protected-resource metadata identified one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Url>,

    /// The token set obtained by the exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<OAuthTokens>,
}

// ---------------------------------------------------------------------------
// OAuthStateMachine
// ---------------------------------------------------------------------------

/// Drives one authorization flow against one protocol server.
///
/// Construct with a provider and a recording HTTP client, optionally attach
/// a static client, a client-ID metadata document URL, or a scope override,
/// then call [`proceed`](Self::proceed) until [`step`](Self::step) reports
/// [`OAuthStep::Complete`].  Between `authorization_redirect` and
/// `token_request` the caller must supply the code via
/// [`set_authorization_code`](Self::set_authorization_code).
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use url::Url;
/// use mcprobe::oauth::http_log::RecordingClient;
/// use mcprobe::oauth::machine::{OAuthStateMachine, OAuthStep};
/// use mcprobe::oauth::provider::{AuthMode, Navigation, OAuthProvider, RedirectUrls};
/// use mcprobe::oauth::storage::MemoryStorage;
///
/// # async fn example() -> mcprobe::error::Result<()> {
/// let provider = Arc::new(OAuthProvider::new(
///     Url::parse("http://localhost:9001")?,
///     AuthMode::Guided,
///     Arc::new(MemoryStorage::new()),
///     RedirectUrls::Single(Url::parse("http://localhost:9002/oauth/callback")?),
///     Navigation::Console(None),
/// ));
/// let mut machine = OAuthStateMachine::new(provider, RecordingClient::default());
///
/// machine.proceed().await?; // metadata_discovery
/// machine.proceed().await?; // client_registration
/// machine.proceed().await?; // authorization_redirect
/// machine.set_authorization_code("code-from-browser");
/// machine.proceed().await?; // authorization_code
/// machine.proceed().await?; // token_request
/// assert_eq!(machine.step(), OAuthStep::Complete);
/// # Ok(())
/// # }
/// ```
pub struct OAuthStateMachine {
    provider: Arc<OAuthProvider>,
    http: RecordingClient,
    static_client: Option<OAuthClientInformation>,
    client_metadata_url: Option<Url>,
    scope_override: Option<String>,
    step: OAuthStep,
    state: GuidedAuthState,
}

impl OAuthStateMachine {
    /// Creates a machine at the `metadata_discovery` step.
    pub fn new(provider: Arc<OAuthProvider>, http: RecordingClient) -> Self {
        Self {
            provider,
            http,
            static_client: None,
            client_metadata_url: None,
            scope_override: None,
            step: OAuthStep::MetadataDiscovery,
            state: GuidedAuthState::default(),
        }
    }

    /// Supplies statically-configured client credentials; these take
    /// priority over every other identity mechanism.
    pub fn with_static_client(mut self, info: OAuthClientInformation) -> Self {
        self.static_client = Some(info);
        self
    }

    /// Supplies a client-ID metadata document URL.  When the authorization
    /// server advertises support, this URL is used verbatim as the client ID
    /// and no registration request is made.
    pub fn with_client_metadata_url(mut self, url: Url) -> Self {
        self.client_metadata_url = Some(url);
        self
    }

    /// Overrides the scope requested at registration and authorization
    /// time; without this the server's advertised scopes are requested.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope_override = Some(scope.into());
        self
    }

    /// The current step.
    pub fn step(&self) -> OAuthStep {
        self.step
    }

    /// The accumulated working state.
    pub fn state(&self) -> &GuidedAuthState {
        &self.state
    }

    /// The provider this machine drives.
    pub fn provider(&self) -> &Arc<OAuthProvider> {
        &self.provider
    }

    /// Supplies the authorization code brought back from the authorization
    /// server.  Surrounding whitespace is trimmed; validation happens when
    /// the `authorization_code` step executes.
    pub fn set_authorization_code(&mut self, code: impl AsRef<str>) {
        self.state.authorization_code = Some(code.as_ref().trim().to_string());
    }

    /// Whether the current step's precondition holds.
    ///
    /// `metadata_discovery` and `authorization_code` are always executable
    /// (the latter reports a missing code through validation, not a guard);
    /// `complete` never is.  The remaining steps require the artifacts their
    /// predecessors produce.
    pub async fn can_transition(&self) -> Result<bool> {
        Ok(match self.step {
            OAuthStep::MetadataDiscovery => true,
            OAuthStep::ClientRegistration => self.state.authorization_server_url.is_some(),
            OAuthStep::AuthorizationRedirect => {
                self.state.server_metadata.is_some() && self.state.client_information.is_some()
            }
            OAuthStep::AuthorizationCode => true,
            OAuthStep::TokenRequest => {
                let code_present = self
                    .state
                    .authorization_code
                    .as_deref()
                    .is_some_and(|c| !c.is_empty());
                let metadata_cached = self.state.server_metadata.is_some()
                    || self.provider.get_server_metadata().await?.is_some();
                // A storage failure here is a real fault, not an ineligible
                // transition; only a genuinely absent verifier blocks.
                let verifier_saved = self.provider.stored_code_verifier().await?.is_some();
                let client_known = self.state.client_information.is_some()
                    || self.provider.client_information().await?.is_some();
                code_present && metadata_cached && verifier_saved && client_known
            }
            OAuthStep::Complete => false,
        })
    }

    /// Executes the current step, advancing to the next on success.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::InvalidTransition`] when the current step's
    /// precondition is false, and step-specific errors when execution fails;
    /// either way the machine stays at its current step.
    pub async fn proceed(&mut self) -> Result<()> {
        if !self.can_transition().await? {
            return Err(McprobeError::InvalidTransition(self.step.as_str().to_string()).into());
        }

        debug!(step = %self.step, server = %self.provider.server_url(), "executing flow step");

        match self.step {
            OAuthStep::MetadataDiscovery => self.run_metadata_discovery().await?,
            OAuthStep::ClientRegistration => self.run_client_registration().await?,
            OAuthStep::AuthorizationRedirect => self.run_authorization_redirect().await?,
            OAuthStep::AuthorizationCode => self.run_authorization_code(),
            OAuthStep::TokenRequest => self.run_token_request().await?,
            // can_transition is always false here.
            OAuthStep::Complete => unreachable!("terminal step has no transition"),
        }
        Ok(())
    }

    // -- step 1: metadata_discovery --------------------------------------

    async fn run_metadata_discovery(&mut self) -> Result<()> {
        let server_url = self.provider.server_url().clone();

        // Protected-resource discovery is best effort: servers without an
        // RFC 9728 document are common, and their own origin serves as the
        // authorization server.
        match fetch_protected_resource_metadata(&self.http, &server_url).await {
            Ok(meta) => {
                self.state.resource = discovery::resolve_resource(Some(&meta), &server_url);
                self.state.authorization_server_url = meta
                    .authorization_servers
                    .first()
                    .and_then(|s| Url::parse(s).ok());
                self.state.resource_metadata = Some(meta);
            }
            Err(e) => {
                warn!(error = %e, "protected resource discovery failed; falling back to server origin");
                self.state.resource_metadata_error = Some(e.to_string());
            }
        }
        if self.state.authorization_server_url.is_none() {
            self.state.authorization_server_url = Some(discovery::server_origin(&server_url)?);
        }

        let issuer = self
            .state
            .authorization_server_url
            .clone()
            .ok_or_else(|| McprobeError::Discovery("no authorization server resolved".to_string()))?;

        let metadata = fetch_authorization_server_metadata(&self.http, &issuer).await?;
        self.provider.save_server_metadata(&metadata).await?;
        self.state.server_metadata = Some(metadata);

        info!(issuer = %issuer, "authorization server metadata discovered");
        self.step = OAuthStep::ClientRegistration;
        Ok(())
    }

    // -- step 2: client_registration -------------------------------------

    async fn run_client_registration(&mut self) -> Result<()> {
        if let Some(info) = &self.static_client {
            self.provider
                .save_preregistered_client_information(info)
                .await?;
        }

        // Static credentials (just saved, or saved by an earlier run) and a
        // previously registered client both short-circuit registration, so
        // re-running the flow never re-registers.
        if let Some(info) = self.provider.client_information().await? {
            debug!(client_id = %info.client_id, "reusing stored client information");
            self.state.client_information = Some(info);
            self.step = OAuthStep::AuthorizationRedirect;
            return Ok(());
        }

        let metadata = self.cached_server_metadata().await?;

        // A client-ID metadata document needs no network call at all: the
        // document URL itself is the client ID.
        if let Some(doc_url) = &self.client_metadata_url {
            if metadata.client_id_metadata_document_supported == Some(true) {
                let info = OAuthClientInformation::public(doc_url.as_str());
                info!(client_id = %info.client_id, "using client ID metadata document");
                self.provider.save_client_information(&info).await?;
                self.state.client_information = Some(info);
                self.step = OAuthStep::AuthorizationRedirect;
                return Ok(());
            }
        }

        let registration_endpoint = metadata.registration_endpoint.clone().ok_or_else(|| {
            McprobeError::Config("no viable client registration mechanism".to_string())
        })?;

        let scope = self.requested_scope(&metadata);
        let client_metadata = self.provider.client_metadata(scope.as_deref());

        let resp = self
            .http
            .post_json(TrafficKind::Auth, &registration_endpoint, &client_metadata)
            .await?;
        if !resp.is_success() {
            return Err(McprobeError::Registration(format!(
                "registration endpoint returned {}: {}",
                resp.status(),
                resp.text()
            ))
            .into());
        }

        let info: OAuthClientInformation = resp.json().map_err(|e| {
            McprobeError::Registration(format!("failed to parse registration response: {e}"))
        })?;
        info!(client_id = %info.client_id, "dynamically registered client");

        self.provider.save_client_information(&info).await?;
        self.provider.save_scope(scope.as_deref()).await?;
        self.state.client_information = Some(info);
        self.step = OAuthStep::AuthorizationRedirect;
        Ok(())
    }

    // -- step 3: authorization_redirect ----------------------------------

    async fn run_authorization_redirect(&mut self) -> Result<()> {
        let metadata = self.cached_server_metadata().await?;
        let client = self
            .state
            .client_information
            .clone()
            .ok_or_else(|| McprobeError::OAuth("no client information resolved".to_string()))?;

        // An explicit override always wins, even over a scope persisted by
        // an earlier run's registration.
        let scope = match &self.scope_override {
            Some(s) => Some(s.clone()),
            None => match self.provider.scope().await? {
                Some(s) => Some(s),
                None => self.requested_scope(&metadata),
            },
        };

        let challenge = pkce::generate()?;
        self.provider.save_code_verifier(&challenge.verifier).await?;

        let mut auth_url =
            Url::parse(&metadata.authorization_endpoint).map_err(McprobeError::UrlParse)?;
        {
            let mut pairs = auth_url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &client.client_id)
                .append_pair("redirect_uri", self.provider.redirect_url().as_str())
                .append_pair("state", &self.provider.state()?)
                .append_pair("code_challenge", &challenge.challenge)
                .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
            if let Some(scope) = &scope {
                pairs.append_pair("scope", scope);
            }
            if let Some(resource) = &self.state.resource {
                pairs.append_pair("resource", resource.as_str());
            }
        }

        self.state.authorization_url = Some(auth_url.clone());
        self.provider.redirect_to_authorization(&auth_url);

        self.step = OAuthStep::AuthorizationCode;
        Ok(())
    }

    // -- step 4: authorization_code --------------------------------------

    fn run_authorization_code(&mut self) {
        let code = self.state.authorization_code.as_deref().unwrap_or("");
        if code.is_empty() {
            // Reported through working state, not an error: the caller
            // re-prompts and the machine stays put.
            self.state.validation_error =
                Some("authorization code cannot be empty".to_string());
            return;
        }
        self.state.validation_error = None;
        self.step = OAuthStep::TokenRequest;
    }

    // -- step 5: token_request -------------------------------------------

    async fn run_token_request(&mut self) -> Result<()> {
        let metadata = self.cached_server_metadata().await?;
        let client = match self.state.client_information.clone() {
            Some(c) => c,
            None => self
                .provider
                .client_information()
                .await?
                .ok_or_else(|| McprobeError::OAuth("no client information resolved".to_string()))?,
        };
        let verifier = self.provider.code_verifier().await?;
        let code = self
            .state
            .authorization_code
            .clone()
            .ok_or_else(|| McprobeError::OAuth("no authorization code supplied".to_string()))?;

        let redirect_uri = self.provider.redirect_url().to_string();
        let resource = self.state.resource.as_ref().map(|r| r.to_string());

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", &redirect_uri),
            ("client_id", &client.client_id),
            ("code_verifier", &verifier),
        ];
        if let Some(secret) = &client.client_secret {
            params.push(("client_secret", secret));
        }
        if let Some(resource) = &resource {
            params.push(("resource", resource));
        }

        let resp = self
            .http
            .post_form(TrafficKind::Auth, &metadata.token_endpoint, &params)
            .await?;
        if !resp.is_success() {
            return Err(McprobeError::Exchange(format!(
                "token endpoint returned {}: {}",
                resp.status(),
                resp.text()
            ))
            .into());
        }

        let mut tokens: OAuthTokens = resp.json().map_err(|e| {
            McprobeError::Exchange(format!("failed to parse token response: {e}"))
        })?;
        tokens.stamp_expiry();

        self.provider.save_tokens(&tokens).await?;
        self.provider.clear_code_verifier().await?;
        self.state.tokens = Some(tokens);

        info!(server = %self.provider.server_url(), "token exchange complete");
        self.step = OAuthStep::Complete;
        Ok(())
    }

    // -- auxiliary operations --------------------------------------------

    /// Exchanges the stored refresh token for a fresh token set.
    ///
    /// # Errors
    ///
    /// Fails with [`McprobeError::OAuth`] when no refresh token is stored,
    /// and [`McprobeError::Exchange`] when the token endpoint rejects the
    /// request.
    pub async fn refresh_tokens(&mut self) -> Result<OAuthTokens> {
        let stored = self
            .provider
            .tokens()
            .await?
            .ok_or_else(|| McprobeError::OAuth("no tokens stored for server".to_string()))?;
        let refresh_token = stored
            .refresh_token
            .ok_or_else(|| McprobeError::OAuth("no refresh token available".to_string()))?;

        let metadata = self.cached_server_metadata().await?;
        let client = self
            .provider
            .client_information()
            .await?
            .ok_or_else(|| McprobeError::OAuth("no client information resolved".to_string()))?;

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", &refresh_token),
            ("client_id", &client.client_id),
        ];
        if let Some(secret) = &client.client_secret {
            params.push(("client_secret", secret));
        }

        let resp = self
            .http
            .post_form(TrafficKind::Auth, &metadata.token_endpoint, &params)
            .await?;
        if !resp.is_success() {
            return Err(McprobeError::Exchange(format!(
                "refresh request returned {}: {}",
                resp.status(),
                resp.text()
            ))
            .into());
        }

        let mut tokens: OAuthTokens = resp.json().map_err(|e| {
            McprobeError::Exchange(format!("failed to parse refresh response: {e}"))
        })?;
        tokens.stamp_expiry();

        self.provider.save_tokens(&tokens).await?;
        self.state.tokens = Some(tokens.clone());
        info!(server = %self.provider.server_url(), "tokens refreshed");
        Ok(tokens)
    }

    /// Reacts to a 401 from the protected server: the token set is dropped
    /// (forcing re-authorization) while client registration and cached
    /// metadata are kept so the retry skips straight to the redirect.
    pub async fn handle_unauthorized(&mut self) -> Result<()> {
        warn!(server = %self.provider.server_url(), "server rejected credentials; clearing tokens");
        self.provider.clear_tokens().await?;
        self.state.tokens = None;
        Ok(())
    }

    /// The server metadata for this flow, preferring working state over the
    /// storage cache.
    async fn cached_server_metadata(&self) -> Result<AuthorizationServerMetadata> {
        if let Some(meta) = &self.state.server_metadata {
            return Ok(meta.clone());
        }
        self.provider
            .get_server_metadata()
            .await?
            .ok_or_else(|| {
                McprobeError::Discovery("no authorization server metadata cached".to_string()).into()
            })
    }

    /// The scope to request: an explicit override wins, otherwise the
    /// advertised scopes are requested wholesale, with the protected
    /// resource's own document preferred over the authorization server's
    /// (the resource knows best what it accepts).
    fn requested_scope(&self, metadata: &AuthorizationServerMetadata) -> Option<String> {
        if let Some(scope) = &self.scope_override {
            return Some(scope.clone());
        }
        self.state
            .resource_metadata
            .as_ref()
            .and_then(|m| m.scopes_supported.as_ref())
            .filter(|s| !s.is_empty())
            .or_else(|| metadata.scopes_supported.as_ref().filter(|s| !s.is_empty()))
            .map(|s| s.join(" "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::provider::{AuthMode, Navigation, RedirectUrls};
    use crate::oauth::storage::{FileStorage, MemoryStorage, OAuthStorage};

    fn make_machine() -> OAuthStateMachine {
        make_machine_with_storage(Arc::new(MemoryStorage::new()))
    }

    fn make_machine_with_storage(storage: Arc<dyn OAuthStorage>) -> OAuthStateMachine {
        let provider = Arc::new(OAuthProvider::new(
            Url::parse("http://localhost:9001").unwrap(),
            AuthMode::Guided,
            storage,
            RedirectUrls::Single(Url::parse("http://localhost:9002/oauth/callback").unwrap()),
            Navigation::Callback(Arc::new(|_| {})),
        ));
        OAuthStateMachine::new(provider, RecordingClient::default())
    }

    fn sample_metadata() -> AuthorizationServerMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "http://localhost:8081",
            "authorization_endpoint": "http://localhost:8081/authorize",
            "token_endpoint": "http://localhost:8081/token",
            "response_types_supported": ["code"]
        }))
        .unwrap()
    }

    #[test]
    fn test_step_display_is_snake_case() {
        assert_eq!(OAuthStep::MetadataDiscovery.to_string(), "metadata_discovery");
        assert_eq!(OAuthStep::ClientRegistration.to_string(), "client_registration");
        assert_eq!(
            OAuthStep::AuthorizationRedirect.to_string(),
            "authorization_redirect"
        );
        assert_eq!(OAuthStep::AuthorizationCode.to_string(), "authorization_code");
        assert_eq!(OAuthStep::TokenRequest.to_string(), "token_request");
        assert_eq!(OAuthStep::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_new_machine_starts_at_metadata_discovery() {
        let machine = make_machine();
        assert_eq!(machine.step(), OAuthStep::MetadataDiscovery);
        assert!(machine.can_transition().await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_step_never_transitions() {
        let mut machine = make_machine();
        machine.step = OAuthStep::Complete;
        assert!(!machine.can_transition().await.unwrap());

        let err = machine.proceed().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot transition from `complete`");
    }

    #[tokio::test]
    async fn test_registration_requires_discovered_server() {
        let mut machine = make_machine();
        machine.step = OAuthStep::ClientRegistration;

        let err = machine.proceed().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot transition from `client_registration`"
        );
    }

    #[tokio::test]
    async fn test_authorization_code_step_is_always_eligible() {
        let mut machine = make_machine();
        machine.step = OAuthStep::AuthorizationCode;
        // No authorization URL was ever built; the step still executes and
        // reports the missing code through validation.
        assert!(machine.can_transition().await.unwrap());

        machine.proceed().await.unwrap();
        assert_eq!(machine.step(), OAuthStep::AuthorizationCode);
        assert!(machine.state().validation_error.is_some());
    }

    #[tokio::test]
    async fn test_empty_code_sets_validation_error_without_advancing() {
        let mut machine = make_machine();
        machine.step = OAuthStep::AuthorizationCode;
        machine.state.authorization_url =
            Some(Url::parse("https://auth.example.com/authorize").unwrap());
        machine.set_authorization_code("   ");

        machine.proceed().await.unwrap();

        assert_eq!(machine.step(), OAuthStep::AuthorizationCode);
        assert_eq!(
            machine.state().validation_error.as_deref(),
            Some("authorization code cannot be empty")
        );
    }

    #[tokio::test]
    async fn test_valid_code_clears_validation_error_and_advances() {
        let mut machine = make_machine();
        machine.step = OAuthStep::AuthorizationCode;
        machine.state.authorization_url =
            Some(Url::parse("https://auth.example.com/authorize").unwrap());
        machine.state.validation_error = Some("authorization code cannot be empty".to_string());
        machine.set_authorization_code("  XYZ  ");

        machine.proceed().await.unwrap();

        assert_eq!(machine.step(), OAuthStep::TokenRequest);
        assert!(machine.state().validation_error.is_none());
        assert_eq!(machine.state().authorization_code.as_deref(), Some("XYZ"));
    }

    #[tokio::test]
    async fn test_token_request_blocked_without_verifier() {
        let mut machine = make_machine();
        machine.step = OAuthStep::TokenRequest;
        machine.set_authorization_code("XYZ");
        // No verifier was ever saved, so the precondition fails even though
        // a code is present.
        assert!(!machine.can_transition().await.unwrap());

        let err = machine.proceed().await.unwrap_err();
        assert_eq!(err.to_string(), "cannot transition from `token_request`");
    }

    #[test]
    fn test_requested_scope_prefers_override() {
        let machine = make_machine().with_scope("read");
        let metadata: AuthorizationServerMetadata = serde_json::from_value(serde_json::json!({
            "issuer": "http://localhost:8081",
            "authorization_endpoint": "http://localhost:8081/authorize",
            "token_endpoint": "http://localhost:8081/token",
            "scopes_supported": ["read", "write", "admin"]
        }))
        .unwrap();

        assert_eq!(machine.requested_scope(&metadata).as_deref(), Some("read"));
    }

    #[test]
    fn test_requested_scope_joins_advertised_scopes() {
        let machine = make_machine();
        let metadata: AuthorizationServerMetadata = serde_json::from_value(serde_json::json!({
            "issuer": "http://localhost:8081",
            "authorization_endpoint": "http://localhost:8081/authorize",
            "token_endpoint": "http://localhost:8081/token",
            "scopes_supported": ["read", "write", "admin"]
        }))
        .unwrap();

        assert_eq!(
            machine.requested_scope(&metadata).as_deref(),
            Some("read write admin")
        );
    }

    #[test]
    fn test_requested_scope_prefers_resource_metadata_scopes() {
        let mut machine = make_machine();
        machine.state.resource_metadata = Some(ProtectedResourceMetadata {
            resource: "http://localhost:9001/mcp".to_string(),
            authorization_servers: vec![],
            scopes_supported: Some(vec!["mcp:read".to_string()]),
            bearer_methods_supported: None,
        });

        // The authorization server advertises nothing; the resource
        // document's scopes still get requested.
        assert_eq!(
            machine.requested_scope(&sample_metadata()).as_deref(),
            Some("mcp:read")
        );
    }

    #[tokio::test]
    async fn test_redirect_scope_override_beats_stored_scope() {
        let mut machine = make_machine().with_scope("admin");
        // A previous run's registration persisted the discovered scopes.
        machine
            .provider()
            .save_scope(Some("read write"))
            .await
            .unwrap();

        machine.step = OAuthStep::AuthorizationRedirect;
        machine.state.server_metadata = Some(sample_metadata());
        machine.state.client_information = Some(OAuthClientInformation::public("abc"));
        machine.proceed().await.unwrap();

        let auth_url = machine.state().authorization_url.clone().unwrap();
        let scope = auth_url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned());
        assert_eq!(scope.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_redirect_uses_stored_scope_without_override() {
        let mut machine = make_machine();
        machine
            .provider()
            .save_scope(Some("read write"))
            .await
            .unwrap();

        machine.step = OAuthStep::AuthorizationRedirect;
        machine.state.server_metadata = Some(sample_metadata());
        machine.state.client_information = Some(OAuthClientInformation::public("abc"));
        machine.proceed().await.unwrap();

        let auth_url = machine.state().authorization_url.clone().unwrap();
        let scope = auth_url
            .query_pairs()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.into_owned());
        assert_eq!(scope.as_deref(), Some("read write"));
    }

    #[tokio::test]
    async fn test_token_request_guard_surfaces_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth.json");
        std::fs::write(&path, b"{\"servers\": 42}").unwrap();

        let mut machine =
            make_machine_with_storage(Arc::new(FileStorage::with_path(&path)));
        machine.step = OAuthStep::TokenRequest;
        machine.state.server_metadata = Some(sample_metadata());
        machine.state.client_information = Some(OAuthClientInformation::public("abc"));
        machine.set_authorization_code("XYZ");

        // A corrupted store is a storage fault, not an ineligible
        // transition.
        let err = machine.can_transition().await.unwrap_err();
        assert!(
            err.to_string().contains("malformed OAuth state document"),
            "got: {err}"
        );
    }
}
