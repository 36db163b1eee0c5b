//! Remote HTTP-backed OAuth state store
//!
//! Persists the shared state document behind a storage service so that
//! independent local processes (for example a CLI and a long-running
//! terminal session) observe the same OAuth state.  The service exposes one
//! document per store ID:
//!
//! - `GET    /api/storage/:storeId` -- fetch the document (404 when empty)
//! - `PUT    /api/storage/:storeId` -- replace the document
//! - `DELETE /api/storage/:storeId` -- delete the whole store
//!
//! An optional caller-supplied header authorizes requests against the
//! storage service itself; it is unrelated to the OAuth tokens being stored.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::error::{McprobeError, Result};
use crate::oauth::storage::DocumentBackend;
use crate::oauth::types::OAuthStateDocument;

/// Remote OAuth state store.
///
/// # Examples
///
/// ```no_run
/// use mcprobe::oauth::storage::{HttpStorage, OAuthStorage};
/// use url::Url;
///
/// # async fn example() -> mcprobe::error::Result<()> {
/// let storage = HttpStorage::new(
///     reqwest::Client::new(),
///     Url::parse("http://localhost:6288")?,
///     "shared-session",
/// );
/// let server = Url::parse("http://localhost:9001")?;
/// let tokens = storage.get_tokens(&server).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpStorage {
    http: reqwest::Client,
    base_url: Url,
    store_id: String,
    auth_header: Option<(String, String)>,
}

impl HttpStorage {
    /// Creates a store against `base_url` for the given store ID.
    pub fn new(http: reqwest::Client, base_url: Url, store_id: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            store_id: store_id.into(),
            auth_header: None,
        }
    }

    /// Adds a header sent with every storage request, e.g.
    /// `("Authorization", "Bearer ...")`.
    pub fn with_auth_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.auth_header = Some((name.into(), value.into()));
        self
    }

    fn document_url(&self) -> String {
        format!(
            "{}/api/storage/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.store_id
        )
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_header {
            Some((name, value)) => req.header(name, value),
            None => req,
        }
    }

    /// Deletes the whole shared store.
    ///
    /// Unlike [`clear`](crate::oauth::storage::OAuthStorage::clear), which
    /// removes one server's record, this wipes the document for every
    /// server sharing the store ID.  Deleting an absent store is a no-op.
    pub async fn delete_store(&self) -> Result<()> {
        let resp = self
            .apply_auth(self.http.delete(self.document_url()))
            .send()
            .await
            .map_err(McprobeError::Http)?;

        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(McprobeError::Storage(format!(
                "storage service returned {} deleting store {}",
                resp.status(),
                self.store_id
            ))
            .into())
        }
    }
}

#[async_trait]
impl DocumentBackend for HttpStorage {
    async fn load(&self) -> Result<OAuthStateDocument> {
        let resp = self
            .apply_auth(self.http.get(self.document_url()))
            .send()
            .await
            .map_err(McprobeError::Http)?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(OAuthStateDocument::default()),
            status if status.is_success() => {
                let bytes = resp.bytes().await.map_err(McprobeError::Http)?;
                let doc: OAuthStateDocument = serde_json::from_slice(&bytes).map_err(|e| {
                    McprobeError::Storage(format!(
                        "malformed OAuth state document in store {}: {e}",
                        self.store_id
                    ))
                })?;
                Ok(doc)
            }
            status => Err(McprobeError::Storage(format!(
                "storage service returned {status} loading store {}",
                self.store_id
            ))
            .into()),
        }
    }

    async fn store(&self, doc: &OAuthStateDocument) -> Result<()> {
        let resp = self
            .apply_auth(self.http.put(self.document_url()).json(doc))
            .send()
            .await
            .map_err(McprobeError::Http)?;

        if !resp.status().is_success() {
            return Err(McprobeError::Storage(format!(
                "storage service returned {} saving store {}",
                resp.status(),
                self.store_id
            ))
            .into());
        }

        debug!(store_id = %self.store_id, servers = doc.servers.len(), "wrote remote OAuth state document");
        Ok(())
    }
}
