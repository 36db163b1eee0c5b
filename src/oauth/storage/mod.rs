//! OAuth state persistence
//!
//! The [`OAuthStorage`] trait is the uniform contract the client identity
//! provider reads and writes through: get/save/clear operations per data
//! kind, namespaced by server URL.  Three interchangeable backends implement
//! it:
//!
//! - [`MemoryStorage`] -- ephemeral in-process store (the session store)
//! - [`FileStorage`]   -- one JSON document under the user's home directory
//! - [`HttpStorage`]   -- a remote store shared between processes
//!
//! Backends are constructed by the embedding application and injected
//! explicitly; nothing in this crate selects a backend from its runtime
//! environment, and there is no ambient registry of store handles.
//!
//! # Malformed data policy
//!
//! Reads that deserialize previously-stored JSON validate it against the
//! expected shape.  A malformed record is a hard
//! [`McprobeError::Storage`](crate::error::McprobeError) failure, never
//! silently treated as absent: a corrupted store is a fault the operator
//! should see, and `clear` remains available as the recovery path.

mod file;
mod http;
mod memory;

pub use file::FileStorage;
pub use http::HttpStorage;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::oauth::discovery::AuthorizationServerMetadata;
use crate::oauth::types::{
    normalize_server_url, OAuthClientInformation, OAuthStateDocument, OAuthTokens,
    ServerOAuthState,
};

// ---------------------------------------------------------------------------
// OAuthStorage contract
// ---------------------------------------------------------------------------

/// Uniform storage contract for per-server OAuth state.
///
/// Every operation is namespaced by server URL: for all server URLs A != B,
/// writing any data kind for A never changes stored data for B.
#[async_trait]
pub trait OAuthStorage: Send + Sync {
    /// Returns stored client information for a server.
    ///
    /// `preregistered` selects the statically-configured record; otherwise
    /// the dynamically-registered one is returned.
    async fn get_client_information(
        &self,
        server_url: &Url,
        preregistered: bool,
    ) -> Result<Option<OAuthClientInformation>>;

    /// Saves dynamically-registered client information.
    async fn save_client_information(
        &self,
        server_url: &Url,
        info: &OAuthClientInformation,
    ) -> Result<()>;

    /// Saves statically-configured (preregistered) client information.
    async fn save_preregistered_client_information(
        &self,
        server_url: &Url,
        info: &OAuthClientInformation,
    ) -> Result<()>;

    /// Removes one kind of client information for a server.
    async fn clear_client_information(&self, server_url: &Url, preregistered: bool) -> Result<()>;

    /// Returns the stored token set for a server.
    async fn get_tokens(&self, server_url: &Url) -> Result<Option<OAuthTokens>>;

    /// Saves a token set for a server.
    async fn save_tokens(&self, server_url: &Url, tokens: &OAuthTokens) -> Result<()>;

    /// Removes the token set for a server (e.g. after a 401), leaving the
    /// rest of the record intact.
    async fn clear_tokens(&self, server_url: &Url) -> Result<()>;

    /// Returns the stored PKCE code verifier for a server.
    async fn get_code_verifier(&self, server_url: &Url) -> Result<Option<String>>;

    /// Saves the PKCE code verifier for the in-flight flow.
    async fn save_code_verifier(&self, server_url: &Url, verifier: &str) -> Result<()>;

    /// Removes the stored code verifier.
    async fn clear_code_verifier(&self, server_url: &Url) -> Result<()>;

    /// Returns the stored scope string for a server.
    async fn get_scope(&self, server_url: &Url) -> Result<Option<String>>;

    /// Saves the scope string; `None` clears it.
    async fn save_scope(&self, server_url: &Url, scope: Option<&str>) -> Result<()>;

    /// Removes the stored scope string.
    async fn clear_scope(&self, server_url: &Url) -> Result<()>;

    /// Returns cached authorization-server metadata for a server.
    async fn get_server_metadata(
        &self,
        server_url: &Url,
    ) -> Result<Option<AuthorizationServerMetadata>>;

    /// Caches authorization-server metadata for a server.
    async fn save_server_metadata(
        &self,
        server_url: &Url,
        metadata: &AuthorizationServerMetadata,
    ) -> Result<()>;

    /// Removes cached authorization-server metadata.
    async fn clear_server_metadata(&self, server_url: &Url) -> Result<()>;

    /// Removes every data kind for this server URL, and only this URL.
    async fn clear(&self, server_url: &Url) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DocumentBackend: shared implementation over the state document
// ---------------------------------------------------------------------------

/// Backend primitive: load and store the whole
/// [`OAuthStateDocument`].
///
/// All three backends persist the same logical document (the memory backend
/// simply never serializes it), so the entire [`OAuthStorage`] contract is
/// implemented once over these two operations.  Each mutation rewrites the
/// whole document; per-server isolation comes from the document's keying.
#[async_trait]
pub(crate) trait DocumentBackend: Send + Sync {
    /// Loads the current document, returning an empty one when nothing has
    /// been stored yet.
    async fn load(&self) -> Result<OAuthStateDocument>;

    /// Replaces the stored document.
    async fn store(&self, doc: &OAuthStateDocument) -> Result<()>;
}

async fn read_state<B: DocumentBackend + ?Sized>(
    backend: &B,
    server_url: &Url,
) -> Result<ServerOAuthState> {
    let doc = backend.load().await?;
    Ok(doc
        .servers
        .get(&normalize_server_url(server_url))
        .cloned()
        .unwrap_or_default())
}

async fn mutate_state<B, F>(backend: &B, server_url: &Url, mutate: F) -> Result<()>
where
    B: DocumentBackend + ?Sized,
    F: FnOnce(&mut ServerOAuthState),
{
    let key = normalize_server_url(server_url);
    let mut doc = backend.load().await?;
    let entry = doc.servers.entry(key.clone()).or_default();
    mutate(entry);
    // Drop records with nothing left in them instead of persisting `{}`.
    if entry.is_empty() {
        doc.servers.remove(&key);
    }
    backend.store(&doc).await
}

#[async_trait]
impl<B: DocumentBackend> OAuthStorage for B {
    async fn get_client_information(
        &self,
        server_url: &Url,
        preregistered: bool,
    ) -> Result<Option<OAuthClientInformation>> {
        let state = read_state(self, server_url).await?;
        Ok(if preregistered {
            state.preregistered_client_information
        } else {
            state.client_information
        })
    }

    async fn save_client_information(
        &self,
        server_url: &Url,
        info: &OAuthClientInformation,
    ) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.client_information = Some(info.clone());
        })
        .await
    }

    async fn save_preregistered_client_information(
        &self,
        server_url: &Url,
        info: &OAuthClientInformation,
    ) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.preregistered_client_information = Some(info.clone());
        })
        .await
    }

    async fn clear_client_information(&self, server_url: &Url, preregistered: bool) -> Result<()> {
        mutate_state(self, server_url, |s| {
            if preregistered {
                s.preregistered_client_information = None;
            } else {
                s.client_information = None;
            }
        })
        .await
    }

    async fn get_tokens(&self, server_url: &Url) -> Result<Option<OAuthTokens>> {
        Ok(read_state(self, server_url).await?.tokens)
    }

    async fn save_tokens(&self, server_url: &Url, tokens: &OAuthTokens) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.tokens = Some(tokens.clone());
        })
        .await
    }

    async fn clear_tokens(&self, server_url: &Url) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.tokens = None;
        })
        .await
    }

    async fn get_code_verifier(&self, server_url: &Url) -> Result<Option<String>> {
        Ok(read_state(self, server_url).await?.code_verifier)
    }

    async fn save_code_verifier(&self, server_url: &Url, verifier: &str) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.code_verifier = Some(verifier.to_string());
        })
        .await
    }

    async fn clear_code_verifier(&self, server_url: &Url) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.code_verifier = None;
        })
        .await
    }

    async fn get_scope(&self, server_url: &Url) -> Result<Option<String>> {
        Ok(read_state(self, server_url).await?.scope)
    }

    async fn save_scope(&self, server_url: &Url, scope: Option<&str>) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.scope = scope.map(str::to_string);
        })
        .await
    }

    async fn clear_scope(&self, server_url: &Url) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.scope = None;
        })
        .await
    }

    async fn get_server_metadata(
        &self,
        server_url: &Url,
    ) -> Result<Option<AuthorizationServerMetadata>> {
        Ok(read_state(self, server_url).await?.server_metadata)
    }

    async fn save_server_metadata(
        &self,
        server_url: &Url,
        metadata: &AuthorizationServerMetadata,
    ) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.server_metadata = Some(metadata.clone());
        })
        .await
    }

    async fn clear_server_metadata(&self, server_url: &Url) -> Result<()> {
        mutate_state(self, server_url, |s| {
            s.server_metadata = None;
        })
        .await
    }

    async fn clear(&self, server_url: &Url) -> Result<()> {
        let key = normalize_server_url(server_url);
        let mut doc = self.load().await?;
        if doc.servers.remove(&key).is_some() {
            self.store(&doc).await?;
        }
        Ok(())
    }
}
