//! Web server module for the command gateway.
//!
//! Two routes, both with configurable paths:
//! - `POST <server.url>`: signed command intake
//! - `GET <server.health_check>`: liveness probe
//!
//! Every response carries `Access-Control-Allow-Origin: *`.

pub mod handlers;
pub mod signature;

use std::io;
use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::error;

use crate::config::ServerConfig;

pub use handlers::{command_webhook, extract_message, health, AppState, MESSAGE_FIELDS};
pub use signature::{
    check_signature, extract_signature, sign_and_prepend, sign_message, verify_signature,
    SignatureError, SigningConfig, SigningMethod,
};

/// Listener startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("port {port} is already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Build the router for the configured paths.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route(&server.health_check, get(health))
        .route(&server.url, post(command_webhook))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the HTTP listener, reporting an occupied port separately.
pub async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| {
        if source.kind() == io::ErrorKind::AddrInUse {
            error!(port = addr.port(), "web_server_port_in_use");
            ServerError::PortInUse {
                port: addr.port(),
                source,
            }
        } else {
            error!(address = %addr, error = %source, "web_server_bind_failed");
            ServerError::Bind { addr, source }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    use crate::config::Credentials;
    use crate::dispatch::{ChannelDispatcher, CommandEnvelope};

    fn app(signing: SigningConfig) -> (Router, UnboundedReceiver<CommandEnvelope>) {
        let (dispatcher, rx) = ChannelDispatcher::new();
        let state = AppState::new(
            signing,
            Credentials::new(serde_json::json!({ "bitfinex": { "key": "k" } })),
            Arc::new(dispatcher),
        );
        (router(state, &ServerConfig::default()), rx)
    }

    fn password() -> SigningConfig {
        SigningConfig::new(SigningMethod::Password, "abc123")
    }

    async fn post_form(app: Router, body: &'static str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/trade")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_password_signed_command() {
        let (app, mut rx) = app(password());

        let response = post_form(app, "subject=sig%3Aabc123+buy+BTC").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(body_text(response).await, "sig:abc123 buy BTC");

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.message, "sig:abc123 buy BTC");
        assert_eq!(envelope.credentials.as_value()["bitfinex"]["key"], "k");
    }

    #[tokio::test]
    async fn test_rejects_unsigned_command() {
        let (app, mut rx) = app(password());

        let response = post_form(app, "message=buy+BTC").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(body_text(response).await, "");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejects_missing_message_for_every_method() {
        for method in ["none", "password", "hash", "bogus"] {
            let (app, mut rx) = app(SigningConfig::new(SigningMethod::parse(method), "abc123"));

            let response = post_form(app, "from=%2B15551234567").await;

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "method {method}");
            assert_eq!(body_text(response).await, "");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_rejects_empty_post_without_content_type() {
        let (app, _rx) = app(SigningConfig::default());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/trade")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_subject_takes_precedence() {
        let (app, mut rx) = app(password());

        let response = post_form(app, "message=sig%3Aabc123+sell&subject=sig%3Aabc123+buy").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "sig:abc123 buy");
        assert_eq!(rx.try_recv().unwrap().message, "sig:abc123 buy");
    }

    #[tokio::test]
    async fn test_precedence_applies_before_verification() {
        let (app, mut rx) = app(password());

        // A valid token in a lower-precedence field does not rescue the subject.
        let response = post_form(app, "subject=buy+BTC&Body=sig%3Aabc123+buy+BTC").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accepts_hash_signed_command() {
        let (app, mut rx) = app(SigningConfig::new(SigningMethod::Hash, "s3cret"));

        let response = post_form(app, "Body=buy+BTC+1+sig%3Ae98f2c5b8f89ae79").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            rx.try_recv().unwrap().message,
            "buy BTC 1 sig:e98f2c5b8f89ae79"
        );
    }

    #[tokio::test]
    async fn test_unrecognized_method_rejects() {
        let (app, mut rx) = app(SigningConfig::new(SigningMethod::parse("bogus"), ""));

        let response = post_form(app, "subject=buy+BTC").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_health_always_ok() {
        let (app, rx) = app(SigningConfig::new(SigningMethod::parse("bogus"), ""));
        drop(rx);

        let request = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_custom_paths() {
        let (dispatcher, mut rx) = ChannelDispatcher::new();
        let state = AppState::new(
            SigningConfig::default(),
            Credentials::default(),
            Arc::new(dispatcher),
        );
        let server = ServerConfig {
            url: "/sms".to_string(),
            health_check: "/ping".to_string(),
            ..ServerConfig::default()
        };
        let app = router(state, &server);

        let request = Request::builder()
            .method(Method::POST)
            .uri("/sms")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("message=status"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap().message, "status");

        let request = Request::builder()
            .method(Method::GET)
            .uri("/ping")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bind_reports_port_in_use() {
        let first = bind_listener(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        let err = bind_listener(addr).await.unwrap_err();

        assert!(matches!(err, ServerError::PortInUse { port, .. } if port == addr.port()));
    }
}
