//! Configuration management for MCProbe
//!
//! This module handles loading, parsing, and validating configuration from
//! YAML files and environment variables, and turning the validated values
//! into the runtime objects the OAuth subsystem needs: an auth mode, a
//! redirect-URL strategy, and a storage backend.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{McprobeError, Result};
use crate::oauth::provider::{AuthMode, RedirectUrls};
use crate::oauth::storage::{FileStorage, HttpStorage, MemoryStorage, OAuthStorage};
use crate::oauth::types::OAuthClientInformation;

/// Main configuration structure for MCProbe
///
/// Holds the target server URL and the OAuth subsystem settings: capture
/// mode, redirect URLs, client identity inputs, and the storage backend
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// URL of the protocol server to inspect
    pub server_url: String,

    /// OAuth flow configuration
    #[serde(default)]
    pub oauth: OAuthConfig,
}

/// OAuth flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Authorization-code capture mode: `normal` or `guided`
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Callback URL for the normal (automatic redirect) mode
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    /// Optional distinct callback URL for the guided mode; when absent the
    /// normal-mode URL serves both
    #[serde(default)]
    pub guided_redirect_url: Option<String>,

    /// Space-separated scope override; when absent the server's advertised
    /// scopes are requested
    #[serde(default)]
    pub scope: Option<String>,

    /// Statically preconfigured client ID; skips registration entirely
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret paired with `client_id`, for confidential clients
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Client-ID metadata document URL, used verbatim as the client ID when
    /// the authorization server supports it
    #[serde(default)]
    pub client_metadata_url: Option<String>,

    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_mode() -> String {
    "normal".to_string()
}

fn default_redirect_url() -> String {
    "http://localhost:9002/oauth/callback".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            redirect_url: default_redirect_url(),
            guided_redirect_url: None,
            scope: None,
            client_id: None,
            client_secret: None,
            client_metadata_url: None,
            storage: StorageConfig::default(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind: `memory`, `file`, or `http`
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Explicit document path for the `file` backend; defaults to
    /// `~/.mcprobe/oauth.json`
    #[serde(default)]
    pub path: Option<String>,

    /// Base URL of the storage service, for the `http` backend
    #[serde(default)]
    pub base_url: Option<String>,

    /// Store ID within the storage service, for the `http` backend
    #[serde(default)]
    pub store_id: Option<String>,

    /// Header sent with every request to the storage service, for `http`
    /// backends that require authorization
    #[serde(default)]
    pub auth_header: Option<AuthHeaderConfig>,
}

/// Header authorizing requests against the storage service itself
///
/// Unrelated to the OAuth tokens being stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthHeaderConfig {
    /// Header name
    #[serde(default = "default_auth_header_name")]
    pub name: String,

    /// Header value, e.g. `Bearer ...`
    pub value: String,
}

fn default_auth_header_name() -> String {
    "Authorization".to_string()
}

fn default_backend() -> String {
    "memory".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            base_url: None,
            store_id: None,
            auth_header: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();
        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            server_url: "http://localhost:9001".to_string(),
            oauth: OAuthConfig::default(),
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(McprobeError::Io)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| McprobeError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(server_url) = std::env::var("MCPROBE_SERVER_URL") {
            self.server_url = server_url;
        }
        if let Ok(mode) = std::env::var("MCPROBE_OAUTH_MODE") {
            self.oauth.mode = mode;
        }
        if let Ok(backend) = std::env::var("MCPROBE_STORAGE_BACKEND") {
            self.oauth.storage.backend = backend;
        }
        if let Ok(scope) = std::env::var("MCPROBE_OAUTH_SCOPE") {
            self.oauth.scope = Some(scope);
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.server_url)
            .map_err(|e| McprobeError::Config(format!("Invalid server_url: {}", e)))?;

        let valid_modes = ["normal", "guided"];
        if !valid_modes.contains(&self.oauth.mode.as_str()) {
            return Err(McprobeError::Config(format!(
                "Invalid oauth mode: {}. Must be one of: {}",
                self.oauth.mode,
                valid_modes.join(", ")
            ))
            .into());
        }

        Url::parse(&self.oauth.redirect_url)
            .map_err(|e| McprobeError::Config(format!("Invalid redirect_url: {}", e)))?;
        if let Some(guided) = &self.oauth.guided_redirect_url {
            Url::parse(guided)
                .map_err(|e| McprobeError::Config(format!("Invalid guided_redirect_url: {}", e)))?;
        }
        if let Some(doc_url) = &self.oauth.client_metadata_url {
            Url::parse(doc_url)
                .map_err(|e| McprobeError::Config(format!("Invalid client_metadata_url: {}", e)))?;
        }
        if self.oauth.client_secret.is_some() && self.oauth.client_id.is_none() {
            return Err(McprobeError::Config(
                "client_secret requires client_id".to_string(),
            )
            .into());
        }

        let valid_backends = ["memory", "file", "http"];
        if !valid_backends.contains(&self.oauth.storage.backend.as_str()) {
            return Err(McprobeError::Config(format!(
                "Invalid storage backend: {}. Must be one of: {}",
                self.oauth.storage.backend,
                valid_backends.join(", ")
            ))
            .into());
        }
        if self.oauth.storage.backend == "http" {
            if self.oauth.storage.base_url.is_none() {
                return Err(McprobeError::Config(
                    "http storage backend requires base_url".to_string(),
                )
                .into());
            }
            if self.oauth.storage.store_id.is_none() {
                return Err(McprobeError::Config(
                    "http storage backend requires store_id".to_string(),
                )
                .into());
            }
        }

        Ok(())
    }

    /// The parsed target server URL.
    pub fn server_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.server_url).map_err(McprobeError::UrlParse)?)
    }

    /// The configured capture mode.
    pub fn auth_mode(&self) -> Result<AuthMode> {
        match self.oauth.mode.as_str() {
            "normal" => Ok(AuthMode::Normal),
            "guided" => Ok(AuthMode::Guided),
            other => Err(McprobeError::Config(format!("Invalid oauth mode: {}", other)).into()),
        }
    }

    /// The redirect-URL strategy built from the configured URLs.
    pub fn redirect_urls(&self) -> Result<RedirectUrls> {
        let normal = Url::parse(&self.oauth.redirect_url).map_err(McprobeError::UrlParse)?;
        match &self.oauth.guided_redirect_url {
            Some(guided) => Ok(RedirectUrls::PerMode {
                normal,
                guided: Url::parse(guided).map_err(McprobeError::UrlParse)?,
            }),
            None => Ok(RedirectUrls::Single(normal)),
        }
    }

    /// Statically configured client credentials, when present.
    pub fn static_client(&self) -> Option<OAuthClientInformation> {
        self.oauth
            .client_id
            .as_ref()
            .map(|id| OAuthClientInformation {
                client_id: id.clone(),
                client_secret: self.oauth.client_secret.clone(),
            })
    }

    /// Constructs the configured storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Config`] when required backend fields are
    /// missing or malformed.
    pub fn build_storage(&self) -> Result<Arc<dyn OAuthStorage>> {
        match self.oauth.storage.backend.as_str() {
            "memory" => Ok(Arc::new(MemoryStorage::new())),
            "file" => match &self.oauth.storage.path {
                Some(path) => Ok(Arc::new(FileStorage::with_path(path))),
                None => Ok(Arc::new(FileStorage::new()?)),
            },
            "http" => {
                let base_url = self.oauth.storage.base_url.as_ref().ok_or_else(|| {
                    McprobeError::Config("http storage backend requires base_url".to_string())
                })?;
                let store_id = self.oauth.storage.store_id.as_ref().ok_or_else(|| {
                    McprobeError::Config("http storage backend requires store_id".to_string())
                })?;
                let mut storage = HttpStorage::new(
                    reqwest::Client::new(),
                    Url::parse(base_url).map_err(McprobeError::UrlParse)?,
                    store_id,
                );
                if let Some(header) = &self.oauth.storage.auth_header {
                    storage = storage.with_auth_header(&header.name, &header.value);
                }
                Ok(Arc::new(storage))
            }
            other => {
                Err(McprobeError::Config(format!("Invalid storage backend: {}", other)).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default_config();
        config.validate().unwrap();
        assert_eq!(config.oauth.mode, "normal");
        assert_eq!(config.oauth.storage.backend, "memory");
    }

    #[test]
    fn test_full_yaml_parses() {
        let yaml = r#"
server_url: http://localhost:9001
oauth:
  mode: guided
  redirect_url: http://localhost:9002/oauth/callback
  guided_redirect_url: http://localhost:9002/oauth/callback/guided
  scope: read write
  client_id: abc
  client_secret: shh
  storage:
    backend: file
    path: /tmp/mcprobe-oauth.json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.auth_mode().unwrap(), AuthMode::Guided);
        assert_eq!(config.static_client().unwrap().client_id, "abc");
        assert!(matches!(
            config.redirect_urls().unwrap(),
            RedirectUrls::PerMode { .. }
        ));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let mut config = Config::default_config();
        config.oauth.mode = "interactive".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid oauth mode"));
    }

    #[test]
    fn test_invalid_server_url_rejected() {
        let mut config = Config::default_config();
        config.server_url = "not a url".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid server_url"));
    }

    #[test]
    fn test_http_backend_requires_base_url_and_store_id() {
        let mut config = Config::default_config();
        config.oauth.storage.backend = "http".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requires base_url"));

        config.oauth.storage.base_url = Some("http://localhost:6288".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requires store_id"));

        config.oauth.storage.store_id = Some("shared".to_string());
        config.validate().unwrap();
        config.build_storage().unwrap();
    }

    #[test]
    fn test_http_backend_auth_header_parses() {
        let yaml = r#"
server_url: http://localhost:9001
oauth:
  storage:
    backend: http
    base_url: http://localhost:6288
    store_id: shared
    auth_header:
      value: Bearer storage-token
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        let header = config.oauth.storage.auth_header.as_ref().unwrap();
        assert_eq!(header.name, "Authorization", "header name defaults");
        assert_eq!(header.value, "Bearer storage-token");
        config.build_storage().unwrap();
    }

    #[test]
    fn test_client_secret_without_client_id_rejected() {
        let mut config = Config::default_config();
        config.oauth.client_secret = Some("shh".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_secret requires client_id"));
    }

    #[test]
    fn test_single_redirect_url_serves_both_modes() {
        let config = Config::default_config();
        let urls = config.redirect_urls().unwrap();
        assert_eq!(
            urls.for_mode(AuthMode::Normal),
            urls.for_mode(AuthMode::Guided)
        );
    }
}
