//! Ephemeral in-process OAuth state store
//!
//! The Rust counterpart of the source's browser-session storage: state
//! lives only as long as the owning process (the "session") and is isolated
//! per instance.  Useful for one-shot inspection runs and as the default
//! backend in tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::oauth::storage::DocumentBackend;
use crate::oauth::types::OAuthStateDocument;

/// In-memory OAuth state store.
///
/// Two instances never share state; construct one and inject it wherever a
/// shared session is wanted.
///
/// # Examples
///
/// ```
/// use mcprobe::oauth::storage::{MemoryStorage, OAuthStorage};
/// use url::Url;
///
/// # async fn example() -> mcprobe::error::Result<()> {
/// let storage = MemoryStorage::new();
/// let server = Url::parse("http://localhost:9001")?;
/// assert!(storage.get_tokens(&server).await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    document: Mutex<OAuthStateDocument>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentBackend for MemoryStorage {
    async fn load(&self) -> Result<OAuthStateDocument> {
        Ok(self.document.lock().expect("state document poisoned").clone())
    }

    async fn store(&self, doc: &OAuthStateDocument) -> Result<()> {
        *self.document.lock().expect("state document poisoned") = doc.clone();
        Ok(())
    }
}
