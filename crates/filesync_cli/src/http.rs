//! HTTP transport for the dispatcher.
//!
//! | Method | Path                | Remote operation       |
//! |--------|---------------------|------------------------|
//! | GET    | `/file/content`     | `get_file_content`     |
//! | GET    | `/file/version`     | `check_master_version` |
//! | POST   | `/sync/confirm`     | `confirm_sync`         |
//! | POST   | `/sync/acknowledge` | `acknowledge_sync`     |
//!
//! Credentials travel in an `Authorization: Basic` header. The dispatcher
//! sees a missing or malformed header as empty credentials.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use filesync_server::{Dispatcher, Params, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Why an `Authorization` header was not usable.
#[derive(Error, Debug, PartialEq, Eq)]
enum BasicAuthError {
    #[error("no Authorization header")]
    Missing,
    #[error("Authorization scheme is not Basic")]
    NotBasic,
    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("credentials are not UTF-8")]
    NotUtf8,
    #[error("credentials have no ':' separator")]
    NoSeparator,
}

/// Build the HTTP router over a shared dispatcher.
pub fn build_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/file/content", get(file_content))
        .route("/file/version", get(file_version))
        .route("/sync/confirm", post(sync_confirm))
        .route("/sync/acknowledge", post(sync_acknowledge))
        .fallback(unknown_endpoint)
        .layer(Extension(dispatcher))
}

async fn file_content(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> (StatusCode, Json<Response>) {
    let Query(pairs) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(Response::failure(format!(
                    "Invalid parameter: {}",
                    rejection.body_text()
                ))),
            )
        }
    };

    let mut params = credentials(&headers);
    if let Some(protocol) = protocol_param(pairs) {
        params.insert("protocol".into(), protocol);
    }
    dispatch(dispatcher, "get_file_content", params, client_addr(&headers, peer)).await
}

/// The `protocol` query value. A repeated key becomes an array, which the
/// dispatcher rejects as a non-string protocol.
fn protocol_param(pairs: Vec<(String, String)>) -> Option<Value> {
    let mut values: Vec<Value> = pairs
        .into_iter()
        .filter(|(key, _)| key == "protocol")
        .map(|(_, value)| Value::String(value))
        .collect();
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}

async fn file_version(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Response>) {
    let params = credentials(&headers);
    dispatch(dispatcher, "check_master_version", params, client_addr(&headers, peer)).await
}

async fn sync_confirm(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Response>) {
    let params = sync_params(&headers, &body);
    dispatch(dispatcher, "confirm_sync", params, client_addr(&headers, peer)).await
}

async fn sync_acknowledge(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Response>) {
    let params = sync_params(&headers, &body);
    dispatch(dispatcher, "acknowledge_sync", params, client_addr(&headers, peer)).await
}

async fn unknown_endpoint(uri: Uri) -> (StatusCode, Json<Response>) {
    (
        StatusCode::NOT_FOUND,
        Json(Response::failure(format!("Unknown endpoint: {}", uri.path()))),
    )
}

/// Runs one remote call on the blocking pool and maps the envelope to a status.
async fn dispatch(
    dispatcher: Arc<Dispatcher>,
    method: &'static str,
    params: Params,
    client_addr: String,
) -> (StatusCode, Json<Response>) {
    let joined = tokio::task::spawn_blocking(move || {
        dispatcher.handle_request(method, &params, &client_addr)
    })
    .await;

    match joined {
        Ok(response) => (status_for(&response), Json(response)),
        Err(e) => {
            tracing::error!("{} worker failed: {}", method, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Response::failure("Internal server error")),
            )
        }
    }
}

fn status_for(response: &Response) -> StatusCode {
    if response.success {
        StatusCode::OK
    } else if response.server_fault {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Credentials plus the `sync_id` field of a JSON body.
///
/// An unparseable body contributes nothing, so the dispatcher reports
/// the missing id.
fn sync_params(headers: &HeaderMap, body: &[u8]) -> Params {
    let mut params = credentials(headers);
    if let Ok(Value::Object(mut fields)) = serde_json::from_slice::<Value>(body) {
        if let Some(sync_id) = fields.remove("sync_id") {
            params.insert("sync_id".into(), sync_id);
        }
    }
    params
}

fn credentials(headers: &HeaderMap) -> Params {
    let (username, password) = basic_auth(headers).unwrap_or_else(|e| {
        tracing::debug!("No usable credentials: {}", e);
        (String::new(), String::new())
    });

    let mut params = Params::new();
    params.insert("username".into(), Value::String(username));
    params.insert("password".into(), Value::String(password));
    params
}

fn basic_auth(headers: &HeaderMap) -> Result<(String, String), BasicAuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(BasicAuthError::Missing)?
        .to_str()
        .map_err(|_| BasicAuthError::NotBasic)?;
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(BasicAuthError::NotBasic)?;

    let decoded = STANDARD.decode(encoded.trim())?;
    let decoded = String::from_utf8(decoded).map_err(|_| BasicAuthError::NotUtf8)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(BasicAuthError::NoSeparator)?;
    Ok((username.to_string(), password.to_string()))
}

/// First `X-Forwarded-For` entry, else the peer address.
fn client_addr(headers: &HeaderMap, peer: Option<ConnectInfo<SocketAddr>>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(addr), _) => addr.to_string(),
        (None, Some(ConnectInfo(addr))) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use filesync_server::{CredentialStore, ServerConfig};
    use serde_json::json;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    struct TestServer {
        _dir: TempDir,
        config: ServerConfig,
        app: Router,
    }

    fn test_server() -> TestServer {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path());
        CredentialStore::from_pairs([("alice", "secret")])
            .save(&config.users_file)
            .unwrap();
        std::fs::write(&config.master_file, "hello\n").unwrap();
        let dispatcher = Arc::new(Dispatcher::from_config(&config).unwrap());
        TestServer {
            _dir: dir,
            config,
            app: build_router(dispatcher),
        }
    }

    fn auth(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get(uri: &str, authorization: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, authorization)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, authorization: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, authorization)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn content_then_confirm() {
        let server = test_server();
        let creds = auth("alice", "secret");

        let (status, body) = send(&server.app, get("/file/content?protocol=RR", &creds)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], json!("hello\n"));
        let sync_id = body["sync_id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &server.app,
            post_json("/sync/confirm", &creds, json!({ "sync_id": sync_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["confirmed"], json!(true));
    }

    #[tokio::test]
    async fn protocol_defaults_to_fire_and_forget() {
        let server = test_server();
        let (status, body) = send(&server.app, get("/file/content", &auth("alice", "secret"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["protocol"], json!("R"));
        assert!(body.get("sync_id").is_none());
    }

    #[tokio::test]
    async fn repeated_protocol_is_an_audited_envelope() {
        let server = test_server();
        let (status, body) = send(
            &server.app,
            get("/file/content?protocol=R&protocol=RR", &auth("alice", "secret")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(
            body["error"],
            json!("Invalid parameter: protocol must be a string")
        );

        let log = std::fs::read_to_string(&server.config.log_file).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains(r#"SYNC FAILED - IP: unknown - User: alice - Operation: get_file_content (["R","RR"])"#));
    }

    #[test]
    fn protocol_param_shapes() {
        let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert_eq!(protocol_param(vec![pair("other", "x")]), None);
        assert_eq!(
            protocol_param(vec![pair("protocol", "RRA"), pair("other", "x")]),
            Some(json!("RRA"))
        );
        assert_eq!(
            protocol_param(vec![pair("protocol", "R"), pair("protocol", "RR")]),
            Some(json!(["R", "RR"]))
        );
    }

    #[tokio::test]
    async fn version_endpoint() {
        let server = test_server();
        let (status, body) = send(&server.app, get("/file/version", &auth("alice", "secret"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["version"].is_string());
        assert!(body["last_modified"].is_f64());
    }

    #[tokio::test]
    async fn bad_credentials_are_a_client_error() {
        let server = test_server();
        for authorization in [auth("alice", "nope"), "Basic !!!".to_string(), "Bearer x".to_string()] {
            let (status, body) = send(&server.app, get("/file/version", &authorization)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], json!("Invalid credentials"));
        }
    }

    #[tokio::test]
    async fn unknown_sync_id_is_a_client_error() {
        let server = test_server();
        let (status, body) = send(
            &server.app,
            post_json(
                "/sync/acknowledge",
                &auth("alice", "secret"),
                json!({"sync_id": "not-a-real-id"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Unknown sync ID: not-a-real-id"));
    }

    #[tokio::test]
    async fn missing_body_reports_missing_sync_id() {
        let server = test_server();
        let request = Request::builder()
            .method("POST")
            .uri("/sync/confirm")
            .header(header::AUTHORIZATION, auth("alice", "secret"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&server.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Invalid parameter: missing sync_id"));
    }

    #[tokio::test]
    async fn missing_master_is_a_server_error() {
        let server = test_server();
        std::fs::remove_file(&server.config.master_file).unwrap();
        let (status, body) = send(&server.app, get("/file/content", &auth("alice", "secret"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let server = test_server();
        let (status, body) = send(&server.app, get("/admin/users", &auth("alice", "secret"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("Unknown endpoint: /admin/users"));

        // Not a dispatcher call, so nothing is audited.
        let log = std::fs::read_to_string(&server.config.log_file).unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn forwarded_for_is_audited() {
        let server = test_server();
        let request = Request::builder()
            .uri("/file/version")
            .header(header::AUTHORIZATION, auth("alice", "secret"))
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        send(&server.app, request).await;

        let log = std::fs::read_to_string(&server.config.log_file).unwrap();
        assert!(log.contains("IP: 203.0.113.9 - User: alice - Operation: check_master_version"));
    }

    #[test]
    fn basic_auth_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(basic_auth(&headers), Err(BasicAuthError::Missing));

        headers.insert(header::AUTHORIZATION, auth("bob", "a:b").parse().unwrap());
        assert_eq!(
            basic_auth(&headers),
            Ok(("bob".to_string(), "a:b".to_string()))
        );

        let no_colon = format!("Basic {}", STANDARD.encode("bob"));
        headers.insert(header::AUTHORIZATION, no_colon.parse().unwrap());
        assert_eq!(basic_auth(&headers), Err(BasicAuthError::NoSeparator));
    }

    #[test]
    fn client_addr_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer = ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 4242)));
        assert_eq!(client_addr(&headers, Some(peer)), "192.168.1.5");
        assert_eq!(client_addr(&headers, None), "unknown");
    }
}
