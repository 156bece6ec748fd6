//! Inline message signature verification.
//!
//! SMS gateways and most webhook senders only deliver a single text field, so
//! the signature travels inside the message itself as a `sig:<token>` marker.
//! Three signing methods are supported:
//!
//! - `none`: every message is accepted
//! - `password`: the token must equal the shared secret
//! - `hash`: the token must equal a 16 character slice of
//!   HMAC-SHA256(secret, message with the token removed)
//!
//! Any other configured method rejects every message.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Marker that introduces an inline signature token.
pub const SIGNATURE_PREFIX: &str = "sig:";

/// Hex characters of the digest that make up a `hash` token.
const HASH_TOKEN_RANGE: std::ops::Range<usize> = 16..32;

/// Configured authentication scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SigningMethod {
    /// Verification disabled.
    #[default]
    None,
    /// Token must match the secret verbatim.
    Password,
    /// Token must match the truncated HMAC of the message body.
    Hash,
    /// Unknown method name; every message is rejected.
    Unrecognized(String),
}

impl SigningMethod {
    /// Parse a method name, ignoring ASCII case.
    ///
    /// The empty string means `none`. Surrounding whitespace is not stripped,
    /// so `" hash"` is unrecognized rather than silently accepted.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "password" => Self::Password,
            "hash" => Self::Hash,
            _ => Self::Unrecognized(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Password => "password",
            Self::Hash => "hash",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for SigningMethod {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl fmt::Display for SigningMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signing method plus shared secret, read once at startup.
#[derive(Clone, Default, Deserialize)]
pub struct SigningConfig {
    #[serde(default, rename = "signing_method", alias = "signingMethod")]
    pub method: SigningMethod,
    #[serde(default)]
    pub secret: String,
}

impl SigningConfig {
    pub fn new(method: SigningMethod, secret: impl Into<String>) -> Self {
        Self {
            method,
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("method", &self.method)
            .field("secret_set", &!self.secret.is_empty())
            .finish()
    }
}

/// Result of scanning a message for its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSignature<'a> {
    /// The token after `sig:`, or `""` when the message carries none.
    pub token: &'a str,
    /// The message with the first `sig:<token>` removed, trimmed.
    pub body: String,
}

/// Locate the first `sig:` followed by at least one ASCII alphanumeric.
///
/// Returns the byte range of the whole marker and the byte offset where the
/// token starts.
fn find_signature(message: &str) -> Option<(usize, usize, usize)> {
    let mut offset = 0;

    while let Some(pos) = message[offset..].find(SIGNATURE_PREFIX) {
        let start = offset + pos;
        let token_start = start + SIGNATURE_PREFIX.len();
        let token_len = message.as_bytes()[token_start..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();

        if token_len > 0 {
            return Some((start, token_start, token_start + token_len));
        }

        offset = token_start;
    }

    None
}

/// Whitespace stripped around the canonical body.
///
/// This is the ECMAScript `String.prototype.trim` set: Unicode `White_Space`
/// without U+0085, plus U+FEFF. Existing signers hash bodies trimmed this way.
fn is_body_whitespace(c: char) -> bool {
    c == '\u{FEFF}' || (c != '\u{0085}' && c.is_whitespace())
}

fn trim_body(text: &str) -> &str {
    text.trim_matches(is_body_whitespace)
}

/// Split a message into its signature token and canonical body.
///
/// Only the first matching marker counts as the signature; any later
/// `sig:` text stays part of the body.
pub fn extract_signature(message: &str) -> ExtractedSignature<'_> {
    match find_signature(message) {
        Some((start, token_start, end)) => {
            let mut body = String::with_capacity(message.len() - (end - start));
            body.push_str(&message[..start]);
            body.push_str(&message[end..]);

            ExtractedSignature {
                token: &message[token_start..end],
                body: trim_body(&body).to_string(),
            }
        }
        None => ExtractedSignature {
            token: "",
            body: trim_body(message).to_string(),
        },
    }
}

/// Compute the `hash` mode token for a canonical body.
///
/// Returns `None` only if the HMAC key cannot be constructed.
pub fn sign_message(body: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body.as_bytes());

    let digest = hex::encode(mac.finalize().into_bytes());
    Some(digest[HASH_TOKEN_RANGE].to_string())
}

/// Produce a message that verifies under `hash` mode.
///
/// The marker goes first so it is always the first match, even when the
/// command text itself contains `sig:` tokens.
pub fn sign_and_prepend(message: &str, secret: &str) -> Option<String> {
    let body = trim_body(message);
    let token = sign_message(body, secret)?;
    Some(format!("{}{} {}", SIGNATURE_PREFIX, token, body))
}

/// Why a message failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signing method {0:?} is not recognized")]
    UnrecognizedMethod(String),

    #[error("message carries no sig: token")]
    MissingToken,

    #[error("signature token does not match")]
    Mismatch,

    #[error("signing secret cannot be used as an HMAC key")]
    InvalidKey,
}

impl SignatureError {
    /// Short snake_case name for log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnrecognizedMethod(_) => "signing_method_unrecognized",
            Self::MissingToken => "signature_token_missing",
            Self::Mismatch => "signature_mismatch",
            Self::InvalidKey => "signature_invalid_key",
        }
    }
}

/// Check a message under the configured method, returning the rejection reason.
///
/// Logs nothing; callers report the single reason once.
pub fn check_signature(message: &str, config: &SigningConfig) -> Result<(), SignatureError> {
    let secret = match &config.method {
        SigningMethod::None => return Ok(()),
        SigningMethod::Unrecognized(raw) => {
            return Err(SignatureError::UnrecognizedMethod(raw.clone()))
        }
        SigningMethod::Password | SigningMethod::Hash => &config.secret,
    };

    let extracted = extract_signature(message);

    let expected = match config.method {
        SigningMethod::Hash => {
            sign_message(&extracted.body, secret).ok_or(SignatureError::InvalidKey)?
        }
        _ => secret.clone(),
    };

    if constant_time_eq(extracted.token, &expected) {
        Ok(())
    } else if extracted.token.is_empty() {
        Err(SignatureError::MissingToken)
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Decide whether a message is authentic under the configured method.
///
/// Never panics and never treats an unknown method as "no verification".
pub fn verify_signature(message: &str, config: &SigningConfig) -> bool {
    check_signature(message, config).is_ok()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
