//! File-backed OAuth state store
//!
//! Persists one JSON document at a home-relative path, structured as a map
//! from server URL to per-server state.  The file is created with owner-only
//! permissions and parent directories are created on demand.  Each mutation
//! rewrites the entire document.
//!
//! Not safe for true concurrent multi-process writers: the whole document is
//! replaced on every write, so the last writer wins.  Cooperating processes
//! that need coordinated access should use [`HttpStorage`] instead.
//!
//! [`HttpStorage`]: crate::oauth::storage::HttpStorage

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::BaseDirs;
use tracing::debug;

use crate::error::{McprobeError, Result};
use crate::oauth::storage::DocumentBackend;
use crate::oauth::types::OAuthStateDocument;

/// Directory under the user's home that holds the state document.
const STATE_DIR: &str = ".mcprobe";

/// File name of the state document.
const STATE_FILE: &str = "oauth.json";

/// File-backed OAuth state store.
///
/// # Examples
///
/// ```no_run
/// use mcprobe::oauth::storage::{FileStorage, OAuthStorage};
/// use url::Url;
///
/// # async fn example() -> mcprobe::error::Result<()> {
/// let storage = FileStorage::new()?;
/// let server = Url::parse("http://localhost:9001")?;
/// let tokens = storage.get_tokens(&server).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Creates a store at the default path, `~/.mcprobe/oauth.json`.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Storage`] when the home directory cannot be
    /// determined.
    pub fn new() -> Result<Self> {
        let base = BaseDirs::new()
            .ok_or_else(|| McprobeError::Storage("cannot determine home directory".to_string()))?;
        Ok(Self {
            path: base.home_dir().join(STATE_DIR).join(STATE_FILE),
        })
    }

    /// Creates a store at an explicit path.  Tests use this with a temp
    /// directory so runs stay isolated.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restricts the document to owner read/write.
    #[cfg(unix)]
    async fn restrict_permissions(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&self.path, perms)
            .await
            .map_err(McprobeError::Io)?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn restrict_permissions(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DocumentBackend for FileStorage {
    async fn load(&self) -> Result<OAuthStateDocument> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(OAuthStateDocument::default());
            }
            Err(e) => return Err(McprobeError::Io(e).into()),
        };

        let doc: OAuthStateDocument = serde_json::from_slice(&bytes).map_err(|e| {
            McprobeError::Storage(format!(
                "malformed OAuth state document at {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(doc)
    }

    async fn store(&self, doc: &OAuthStateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(McprobeError::Io)?;
        }

        let json = serde_json::to_vec_pretty(doc).map_err(McprobeError::Serialization)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(McprobeError::Io)?;
        self.restrict_permissions().await?;

        debug!(path = %self.path.display(), servers = doc.servers.len(), "wrote OAuth state document");
        Ok(())
    }
}
