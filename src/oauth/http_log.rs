//! HTTP instrumentation for OAuth diagnostics
//!
//! Every network call the OAuth subsystem makes goes through
//! [`RecordingClient`], which captures the full request (method, URL,
//! headers, body) before sending and the full response (status, headers,
//! body) after it arrives.  Responses are buffered into memory so the
//! recorded body and the body handed back to the caller are the same bytes.
//!
//! Entries are tagged with a [`TrafficKind`] so an embedding client can
//! separate auth traffic (discovery, registration, token exchange) from
//! ordinary protocol traffic when rendering a request log.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{McprobeError, Result};

// ---------------------------------------------------------------------------
// TrafficKind and HttpExchange
// ---------------------------------------------------------------------------

/// Classifies a recorded exchange for display filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficKind {
    /// OAuth traffic: metadata discovery, client registration, token
    /// exchange.
    Auth,
    /// Ordinary protocol traffic to the inspected server.
    Protocol,
}

/// One recorded HTTP exchange.
///
/// The request half is captured before the call is issued; the response
/// half is filled in once the response body has been read.  A `None` status
/// means the request never produced a response (transport failure).
#[derive(Debug, Clone, Serialize)]
pub struct HttpExchange {
    /// Auth or protocol traffic.
    pub kind: TrafficKind,
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Request headers as name/value pairs (values rendered lossily).
    pub request_headers: Vec<(String, String)>,
    /// Request body, when one was sent and is representable as UTF-8.
    pub request_body: Option<String>,
    /// Response status code, absent on transport failure.
    pub status: Option<u16>,
    /// Response headers as name/value pairs.
    pub response_headers: Vec<(String, String)>,
    /// Response body rendered as UTF-8 (lossy).
    pub response_body: Option<String>,
    /// When the request was issued.
    pub at: DateTime<Utc>,
}

fn headers_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// RecordedResponse
// ---------------------------------------------------------------------------

/// A fully buffered HTTP response.
///
/// The body has already been read into memory by the recorder, so it can be
/// consumed any number of times by the caller.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RecordedResponse {
    /// The response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// The body rendered as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`McprobeError::Serialization`] when the body is not valid
    /// JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body).map_err(McprobeError::Serialization)?)
    }
}

// ---------------------------------------------------------------------------
// RecordingClient
// ---------------------------------------------------------------------------

/// An HTTP client wrapper that records every exchange it performs.
///
/// Cloning is cheap; clones share the same underlying client and the same
/// exchange log, so a machine and its embedding application can observe one
/// log.  There is no ambient global: construct one per flow (or per test)
/// and pass it explicitly.
///
/// # Examples
///
/// ```no_run
/// use mcprobe::oauth::http_log::{RecordingClient, TrafficKind};
///
/// # async fn example() -> mcprobe::error::Result<()> {
/// let http = RecordingClient::new(reqwest::Client::new());
/// let resp = http.get(TrafficKind::Auth, "https://auth.example.com/.well-known/oauth-authorization-server").await?;
/// assert!(resp.is_success());
/// assert_eq!(http.exchanges().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RecordingClient {
    http: reqwest::Client,
    log: Arc<Mutex<Vec<HttpExchange>>>,
}

impl Default for RecordingClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl RecordingClient {
    /// Wraps a `reqwest::Client` with an empty exchange log.
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Issues a GET request.
    pub async fn get(&self, kind: TrafficKind, url: &str) -> Result<RecordedResponse> {
        let request = self.http.get(url).build().map_err(McprobeError::Http)?;
        self.execute(kind, request).await
    }

    /// Issues a POST request with a JSON body.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        kind: TrafficKind,
        url: &str,
        body: &B,
    ) -> Result<RecordedResponse> {
        let request = self
            .http
            .post(url)
            .json(body)
            .build()
            .map_err(McprobeError::Http)?;
        self.execute(kind, request).await
    }

    /// Issues a POST request with a form-urlencoded body.
    pub async fn post_form(
        &self,
        kind: TrafficKind,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<RecordedResponse> {
        let request = self
            .http
            .post(url)
            .form(params)
            .build()
            .map_err(McprobeError::Http)?;
        self.execute(kind, request).await
    }

    /// Sends a prepared request, recording both halves of the exchange.
    ///
    /// The request entry is appended to the log before the call is issued,
    /// so transport failures still leave a record (with no status).
    pub async fn execute(
        &self,
        kind: TrafficKind,
        request: reqwest::Request,
    ) -> Result<RecordedResponse> {
        let mut entry = HttpExchange {
            kind,
            method: request.method().to_string(),
            url: request.url().to_string(),
            request_headers: headers_to_pairs(request.headers()),
            request_body: request
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            status: None,
            response_headers: Vec::new(),
            response_body: None,
            at: Utc::now(),
        };

        debug!(method = %entry.method, url = %entry.url, kind = ?kind, "issuing HTTP request");

        let response = match self.http.execute(request).await {
            Ok(r) => r,
            Err(e) => {
                self.push(entry);
                return Err(McprobeError::Http(e).into());
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(McprobeError::Http)?;

        entry.status = Some(status.as_u16());
        entry.response_headers = headers_to_pairs(&headers);
        entry.response_body = Some(String::from_utf8_lossy(&body).into_owned());
        self.push(entry);

        Ok(RecordedResponse {
            status,
            headers,
            body,
        })
    }

    /// A snapshot of every recorded exchange, in request order.
    pub fn exchanges(&self) -> Vec<HttpExchange> {
        self.log.lock().expect("exchange log poisoned").clone()
    }

    /// A snapshot of auth-tagged exchanges only.
    pub fn auth_exchanges(&self) -> Vec<HttpExchange> {
        self.exchanges()
            .into_iter()
            .filter(|e| e.kind == TrafficKind::Auth)
            .collect()
    }

    /// Empties the exchange log.
    pub fn clear_log(&self) {
        self.log.lock().expect("exchange log poisoned").clear();
    }

    fn push(&self, entry: HttpExchange) {
        self.log.lock().expect("exchange log poisoned").push(entry);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
