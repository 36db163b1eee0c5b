//! Metadata discovery integration tests using wiremock
//!
//! Verifies the well-known endpoint fallback behavior:
//!
//! - Protected-resource discovery inserts the resource path into the
//!   RFC 9728 well-known URI.
//! - Authorization-server discovery walks the candidate orderings and
//!   settles on the first endpoint that answers with parseable metadata.
//! - Exhausting every candidate is a discovery error.

mod common;

use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcprobe::oauth::discovery::{
    fetch_authorization_server_metadata, fetch_protected_resource_metadata,
};
use mcprobe::oauth::{RecordingClient, TrafficKind};

fn metadata_body(base_url: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base_url,
        "authorization_endpoint": format!("{base_url}/authorize"),
        "token_endpoint": format!("{base_url}/token"),
        "response_types_supported": ["code"]
    })
}

#[tokio::test]
async fn test_protected_resource_discovery_inserts_resource_path() {
    common::init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/api/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resource": format!("{}/api/mcp", server.uri()),
            "authorization_servers": ["https://auth.example.com"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let http = RecordingClient::default();
    let resource_url = Url::parse(&format!("{}/api/mcp", server.uri())).unwrap();
    let meta = fetch_protected_resource_metadata(&http, &resource_url)
        .await
        .unwrap();

    assert_eq!(
        meta.authorization_servers,
        vec!["https://auth.example.com".to_string()]
    );
}

#[tokio::test]
async fn test_authorization_server_discovery_falls_back_across_candidates() {
    let server = MockServer::start().await;
    let base = server.uri();

    // First candidate answers 404 (wiremock default for unmatched paths);
    // the OIDC root endpoint is the one that answers.
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body(&base)))
        .expect(1)
        .mount(&server)
        .await;

    let http = RecordingClient::default();
    let issuer = Url::parse(&base).unwrap();
    let meta = fetch_authorization_server_metadata(&http, &issuer)
        .await
        .unwrap();

    assert_eq!(meta.token_endpoint, format!("{base}/token"));

    // The miss on the earlier candidate was recorded too.
    let exchanges = http.exchanges();
    assert!(exchanges.len() >= 2);
    assert!(exchanges.iter().all(|e| e.kind == TrafficKind::Auth));
    assert!(exchanges[0]
        .url
        .contains("/.well-known/oauth-authorization-server"));
}

#[tokio::test]
async fn test_pathful_issuer_prefers_path_inserted_candidate() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server/tenant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body(&base)))
        .expect(1)
        .mount(&server)
        .await;
    // Root candidates must not be consulted once the path-inserted one hits.
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(metadata_body(&base)))
        .expect(0)
        .mount(&server)
        .await;

    let http = RecordingClient::default();
    let issuer = Url::parse(&format!("{base}/tenant")).unwrap();
    let meta = fetch_authorization_server_metadata(&http, &issuer)
        .await
        .unwrap();
    assert_eq!(meta.issuer, base);
}

#[tokio::test]
async fn test_exhausted_candidates_is_a_discovery_error() {
    let server = MockServer::start().await;

    let http = RecordingClient::default();
    let issuer = Url::parse(&server.uri()).unwrap();
    let err = fetch_authorization_server_metadata(&http, &issuer)
        .await
        .unwrap_err();

    assert!(
        err.to_string().contains("authorization server metadata not found"),
        "got: {err}"
    );
}
