//! Command intake and liveness handlers.
//!
//! The intake handler only:
//! 1. Picks the message out of the form body
//! 2. Verifies its inline signature
//! 3. Submits it to the dispatcher without waiting
//!
//! The 200 response means "accepted for processing", never "executed".

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info};

use crate::config::Credentials;
use crate::dispatch::Dispatcher;
use crate::web::signature::{check_signature, SigningConfig};

/// Form fields that may carry the command text, highest precedence first.
pub const MESSAGE_FIELDS: [&str; 3] = ["subject", "Body", "message"];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub signing: Arc<SigningConfig>,
    pub credentials: Arc<Credentials>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl AppState {
    pub fn new(
        signing: SigningConfig,
        credentials: Credentials,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            signing: Arc::new(signing),
            credentials: Arc::new(credentials),
            dispatcher,
        }
    }
}

/// Health check endpoint.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Pick the command text out of a URL-encoded form body.
///
/// The first of [`MESSAGE_FIELDS`] holding a non-empty value wins. For a
/// repeated field only its first occurrence counts.
pub fn extract_message(body: &[u8]) -> Option<String> {
    let pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> = url::form_urlencoded::parse(body).collect();

    MESSAGE_FIELDS.iter().find_map(|field| {
        pairs
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    })
}

/// Command webhook endpoint.
pub async fn command_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    info!(body_length = body.len(), "command_webhook_received");

    let Some(message) = extract_message(&body) else {
        error!(
            body = %String::from_utf8_lossy(&body),
            expected_fields = ?MESSAGE_FIELDS,
            "command_message_missing"
        );
        return StatusCode::BAD_REQUEST.into_response();
    };

    if let Err(e) = check_signature(&message, &state.signing) {
        error!(
            signing_method = %state.signing.method,
            reason = e.reason(),
            body = %String::from_utf8_lossy(&body),
            "command_signature_invalid"
        );
        return StatusCode::BAD_REQUEST.into_response();
    }

    state
        .dispatcher
        .dispatch(message.clone(), Arc::clone(&state.credentials));

    info!(message_length = message.len(), "command_accepted");

    (StatusCode::OK, message).into_response()
}
