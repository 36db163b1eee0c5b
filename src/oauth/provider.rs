//! Client identity provider
//!
//! [`OAuthProvider`] adapts a storage backend, a redirect-URL strategy, and
//! a navigation strategy into the contract the OAuth state machine drives:
//! client metadata, the anti-CSRF state nonce, code-verifier lifecycle, and
//! token accessors.  It also captures every authorization URL it is asked
//! to surface and dispatches it as an [`OAuthEvent`] to a registered
//! listener.
//!
//! One flat provider type covers both authorization-capture modes: the
//! active [`AuthMode`] is an explicit field and the strategies are injected
//! values, selected by configuration rather than type inspection.

use std::fmt;
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use tracing::debug;
use url::Url;

use crate::error::{McprobeError, Result};
use crate::oauth::discovery::AuthorizationServerMetadata;
use crate::oauth::storage::OAuthStorage;
use crate::oauth::types::{OAuthClientInformation, OAuthClientMetadata, OAuthTokens};

/// Client name advertised during dynamic client registration.
pub const DEFAULT_CLIENT_NAME: &str = "MCProbe";

// ---------------------------------------------------------------------------
// AuthMode
// ---------------------------------------------------------------------------

/// How the authorization code is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Automatic browser redirect back to the client's callback endpoint.
    Normal,
    /// The code is obtained out-of-band (manual entry) and supplied to the
    /// state machine by the caller.
    Guided,
}

impl AuthMode {
    /// The wire/state-nonce spelling of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Normal => "normal",
            AuthMode::Guided => "guided",
        }
    }

    /// Recovers the mode embedded in a state nonce produced by
    /// [`OAuthProvider::state`], so a later callback can be routed to the
    /// flow that issued it.
    pub fn from_state(state: &str) -> Option<AuthMode> {
        match state.rsplit_once('.')?.1 {
            "normal" => Some(AuthMode::Normal),
            "guided" => Some(AuthMode::Guided),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Redirect URL strategy
// ---------------------------------------------------------------------------

/// Where the authorization server should send the user back.
///
/// A closed set of strategies selected by configuration: either one URL
/// serves both modes, or each mode declares its own.
#[derive(Debug, Clone)]
pub enum RedirectUrls {
    /// One callback URL used identically for normal and guided modes.
    Single(Url),
    /// Distinct callback URLs per mode.
    PerMode {
        /// Callback for the automatic-redirect mode.
        normal: Url,
        /// Callback negotiated for the guided mode.
        guided: Url,
    },
}

impl RedirectUrls {
    /// The callback URL for the given mode.
    pub fn for_mode(&self, mode: AuthMode) -> &Url {
        match self {
            RedirectUrls::Single(url) => url,
            RedirectUrls::PerMode { normal, guided } => match mode {
                AuthMode::Normal => normal,
                AuthMode::Guided => guided,
            },
        }
    }

    /// The normal-mode URL; this is what gets declared in `redirect_uris`
    /// at registration time (the guided callback is negotiated separately).
    pub fn normal(&self) -> &Url {
        self.for_mode(AuthMode::Normal)
    }
}

// ---------------------------------------------------------------------------
// Navigation strategy
// ---------------------------------------------------------------------------

/// Callback invoked with the authorization URL.
pub type NavigationCallback = Arc<dyn Fn(&Url) + Send + Sync>;

/// How the authorization URL is surfaced to the user.
///
/// The caller-supplied callback is the general mechanism; console printing
/// is a specialization that also invokes an optional secondary callback.
#[derive(Clone)]
pub enum Navigation {
    /// Open the URL in the host environment's default browser.
    Browser,
    /// Print the URL to stderr, then invoke the optional callback.
    Console(Option<NavigationCallback>),
    /// Hand the URL to an injected callback and do nothing else.
    Callback(NavigationCallback),
}

impl fmt::Debug for Navigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Navigation::Browser => f.write_str("Navigation::Browser"),
            Navigation::Console(cb) => {
                write!(f, "Navigation::Console(callback: {})", cb.is_some())
            }
            Navigation::Callback(_) => f.write_str("Navigation::Callback"),
        }
    }
}

impl Navigation {
    fn navigate(&self, url: &Url) {
        match self {
            Navigation::Browser => try_open_browser(url.as_str()),
            Navigation::Console(callback) => {
                eprintln!("Open the following URL in your browser to authorize MCProbe:\n{url}");
                if let Some(cb) = callback {
                    cb(url);
                }
            }
            Navigation::Callback(cb) => cb(url),
        }
    }
}

/// Attempts to open a URL in the user's default browser.
///
/// Errors are intentionally ignored; if the browser does not open the user
/// can still copy the URL from the emitted event or the console.
fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = url;
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events the OAuth core emits to the embedding application.
#[derive(Debug, Clone)]
pub enum OAuthEvent {
    /// The flow reached the authorization-redirect step; the user (or an
    /// automated agent) must visit this URL.
    AuthorizationRequired {
        /// The built PKCE authorization URL.
        url: Url,
    },
    /// A flow step failed.  Emitted by the flow driver, not by the state
    /// machine itself.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

/// Listener registered by the embedding application.
pub type OAuthEventListener = Arc<dyn Fn(&OAuthEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// OAuthProvider
// ---------------------------------------------------------------------------

/// The client identity provider for one protocol server.
///
/// All persistence goes through the injected [`OAuthStorage`] backend,
/// namespaced by this provider's server URL.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use url::Url;
/// use mcprobe::oauth::provider::{AuthMode, Navigation, OAuthProvider, RedirectUrls};
/// use mcprobe::oauth::storage::MemoryStorage;
///
/// # fn example() -> mcprobe::error::Result<()> {
/// let provider = OAuthProvider::new(
///     Url::parse("http://localhost:9001")?,
///     AuthMode::Normal,
///     Arc::new(MemoryStorage::new()),
///     RedirectUrls::Single(Url::parse("http://localhost:9002/oauth/callback")?),
///     Navigation::Console(None),
/// );
/// assert_eq!(provider.redirect_url().as_str(), "http://localhost:9002/oauth/callback");
/// # Ok(())
/// # }
/// ```
pub struct OAuthProvider {
    server_url: Url,
    mode: AuthMode,
    storage: Arc<dyn OAuthStorage>,
    redirect_urls: RedirectUrls,
    navigation: Navigation,
    listener: Option<OAuthEventListener>,
    client_name: String,
    captured_authorization_url: Mutex<Option<Url>>,
}

impl OAuthProvider {
    /// Creates a provider for `server_url` with injected strategies.
    pub fn new(
        server_url: Url,
        mode: AuthMode,
        storage: Arc<dyn OAuthStorage>,
        redirect_urls: RedirectUrls,
        navigation: Navigation,
    ) -> Self {
        Self {
            server_url,
            mode,
            storage,
            redirect_urls,
            navigation,
            listener: None,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            captured_authorization_url: Mutex::new(None),
        }
    }

    /// Registers an event listener.
    pub fn with_listener(mut self, listener: OAuthEventListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Overrides the client name used in registration metadata.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// The server this provider's state is namespaced by.
    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    /// The active authorization-capture mode.
    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// The callback URL for the active mode.
    pub fn redirect_url(&self) -> &Url {
        self.redirect_urls.for_mode(self.mode)
    }

    /// The redirect URIs declared to the authorization server: the
    /// normal-mode URL only.
    pub fn redirect_uris(&self) -> Vec<String> {
        vec![self.redirect_urls.normal().to_string()]
    }

    /// Builds the client metadata for registration requests and metadata
    /// documents.
    pub fn client_metadata(&self, scope: Option<&str>) -> OAuthClientMetadata {
        OAuthClientMetadata {
            client_name: self.client_name.clone(),
            redirect_uris: self.redirect_uris(),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: scope.map(str::to_string),
        }
    }

    /// Generates a fresh anti-CSRF state nonce with the active mode
    /// embedded, so a later callback can be routed correctly.
    ///
    /// Format: 16 random bytes base64url-encoded, a `.` separator, then the
    /// mode string (see [`AuthMode::from_state`]).
    pub fn state(&self) -> Result<String> {
        use rand::RngCore as _;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let nonce = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        Ok(format!("{nonce}.{}", self.mode.as_str()))
    }

    /// The scope stored for this server, if any.
    pub async fn scope(&self) -> Result<Option<String>> {
        self.storage.get_scope(&self.server_url).await
    }

    /// Stores (or with `None`, clears) the scope for this server.
    pub async fn save_scope(&self, scope: Option<&str>) -> Result<()> {
        self.storage.save_scope(&self.server_url, scope).await
    }

    /// Resolves client information with preregistered (static) information
    /// taking priority over previously dynamically-registered information.
    pub async fn client_information(&self) -> Result<Option<OAuthClientInformation>> {
        if let Some(info) = self
            .storage
            .get_client_information(&self.server_url, true)
            .await?
        {
            return Ok(Some(info));
        }
        self.storage
            .get_client_information(&self.server_url, false)
            .await
    }

    /// Stores dynamically-registered client information.
    pub async fn save_client_information(&self, info: &OAuthClientInformation) -> Result<()> {
        self.storage
            .save_client_information(&self.server_url, info)
            .await
    }

    /// Stores statically-configured client information.
    pub async fn save_preregistered_client_information(
        &self,
        info: &OAuthClientInformation,
    ) -> Result<()> {
        self.storage
            .save_preregistered_client_information(&self.server_url, info)
            .await
    }

    /// The stored token set, if any.
    pub async fn tokens(&self) -> Result<Option<OAuthTokens>> {
        self.storage.get_tokens(&self.server_url).await
    }

    /// Stores a token set.
    pub async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<()> {
        self.storage.save_tokens(&self.server_url, tokens).await
    }

    /// Removes the stored token set only, e.g. after a 401 -- client
    /// registration and cached metadata survive so retries are cheap.
    pub async fn clear_tokens(&self) -> Result<()> {
        self.storage.clear_tokens(&self.server_url).await
    }

    /// Surfaces an authorization URL to the user.
    ///
    /// Three things happen on every call: the URL is captured for
    /// programmatic retrieval via [`authorization_url`](Self::authorization_url),
    /// an [`OAuthEvent::AuthorizationRequired`] event is dispatched to the
    /// registered listener, and the configured navigation strategy runs.
    /// Callers that only need the URL read the captured value and ignore
    /// the navigation side effect.
    pub fn redirect_to_authorization(&self, url: &Url) {
        debug!(url = %url, mode = %self.mode, "authorization required");

        *self
            .captured_authorization_url
            .lock()
            .expect("captured URL poisoned") = Some(url.clone());

        self.emit(OAuthEvent::AuthorizationRequired { url: url.clone() });
        self.navigation.navigate(url);
    }

    /// The most recently captured authorization URL.
    pub fn authorization_url(&self) -> Option<Url> {
        self.captured_authorization_url
            .lock()
            .expect("captured URL poisoned")
            .clone()
    }

    /// Dispatches an event to the registered listener, if any.
    ///
    /// Flow drivers use this to route [`OAuthEvent::Error`] through the
    /// same listener that receives authorization-required events.
    pub fn emit(&self, event: OAuthEvent) {
        if let Some(listener) = &self.listener {
            listener(&event);
        }
    }

    /// Stores the PKCE code verifier for the in-flight flow.
    pub async fn save_code_verifier(&self, verifier: &str) -> Result<()> {
        self.storage
            .save_code_verifier(&self.server_url, verifier)
            .await
    }

    /// Removes the stored verifier once the exchange has consumed it.
    pub async fn clear_code_verifier(&self) -> Result<()> {
        self.storage.clear_code_verifier(&self.server_url).await
    }

    /// The persisted code verifier, if any.  Lets callers distinguish an
    /// absent verifier from a storage failure.
    pub async fn stored_code_verifier(&self) -> Result<Option<String>> {
        self.storage.get_code_verifier(&self.server_url).await
    }

    /// The persisted code verifier for this server.
    ///
    /// # Errors
    ///
    /// The verifier is required, not reconstructible, at token-exchange
    /// time; its absence is a hard failure.
    pub async fn code_verifier(&self) -> Result<String> {
        self.stored_code_verifier().await?.ok_or_else(|| {
            McprobeError::OAuth("no code verifier saved for session".to_string()).into()
        })
    }

    /// Cached authorization-server metadata, used by the guided flow to
    /// avoid re-discovery between steps.
    pub async fn get_server_metadata(&self) -> Result<Option<AuthorizationServerMetadata>> {
        self.storage.get_server_metadata(&self.server_url).await
    }

    /// Caches authorization-server metadata.
    pub async fn save_server_metadata(
        &self,
        metadata: &AuthorizationServerMetadata,
    ) -> Result<()> {
        self.storage
            .save_server_metadata(&self.server_url, metadata)
            .await
    }

    /// Removes every stored data kind for this server (logout).
    pub async fn clear(&self) -> Result<()> {
        self.storage.clear(&self.server_url).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
