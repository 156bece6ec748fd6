//! Hand-off of authenticated commands to the execution engine.
//!
//! The web handler only ever calls [`Dispatcher::dispatch`], which is
//! synchronous and returns nothing: accepted commands are submitted and the
//! handler moves on. Whatever happens afterwards (publishing, execution,
//! failures) is owned by the dispatcher implementation and only shows up in
//! its logs.
//!
//! ```text
//! Web Server → Dispatcher → gateway_commands queue / in-process executor
//! ```

pub mod channel;
pub mod publisher;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::Credentials;

pub use channel::{spawn_executor, ChannelDispatcher, CommandExecutor, LogExecutor};
pub use publisher::{Publisher, QueueDispatcher};

/// Fire-and-forget submission of an accepted command.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, message: String, credentials: Arc<Credentials>);
}

/// An accepted command as handed to the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Raw message text, signature token included
    pub message: String,
    /// Exchange credentials, passed through verbatim
    pub credentials: Credentials,
    /// Unix epoch seconds when the gateway accepted the command
    pub received_at: u64,
}

impl CommandEnvelope {
    pub fn new(message: String, credentials: Credentials) -> Self {
        let received_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            message,
            credentials,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let envelope = CommandEnvelope::new(
            "sig:abc123 buy BTC".to_string(),
            Credentials::new(serde_json::json!({ "bitfinex": { "key": "k" } })),
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["message"], "sig:abc123 buy BTC");
        assert_eq!(json["credentials"]["bitfinex"]["key"], "k");
        assert!(json["received_at"].as_u64().unwrap() > 0);
    }
}
