//! Tradegate - signed command gateway.
//!
//! Receives commands as free text over HTTP (usually forwarded SMS),
//! authenticates the inline `sig:` token and hands accepted commands to an
//! execution engine without waiting for the outcome.
//!
//! ## Architecture
//!
//! ```text
//! SMS / webhook → Web Server → verify signature → Dispatcher → executor
//! ```

pub mod config;
pub mod dispatch;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, Credentials};
pub use dispatch::{
    ChannelDispatcher, CommandEnvelope, CommandExecutor, Dispatcher, LogExecutor, Publisher,
    QueueDispatcher,
};
pub use web::{AppState, ServerError, SigningConfig, SigningMethod};
