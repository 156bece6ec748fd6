//! In-process dispatch over a tokio channel.
//!
//! Used when no broker is configured. Commands are sent on an unbounded
//! channel and a background loop hands each one to a [`CommandExecutor`]
//! in its own task.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{CommandEnvelope, Dispatcher};
use crate::config::Credentials;
use crate::web::signature::extract_signature;

/// The engine that turns a command into actions.
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(&self, command: CommandEnvelope) -> impl Future<Output = Result<()>> + Send;
}

/// Executor that only records the command in the log.
///
/// The `sig:` token is stripped first; in `password` mode it is the secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExecutor;

impl CommandExecutor for LogExecutor {
    async fn execute(&self, command: CommandEnvelope) -> Result<()> {
        let unsigned = extract_signature(&command.message);
        info!(
            command = %unsigned.body,
            message_length = command.message.len(),
            received_at = command.received_at,
            "command_logged_without_executor"
        );
        Ok(())
    }
}

/// Dispatcher backed by an unbounded mpsc channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<CommandEnvelope>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end its commands arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommandEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, message: String, credentials: Arc<Credentials>) {
        let envelope = CommandEnvelope::new(message, Credentials::clone(&credentials));

        if self.tx.send(envelope).is_err() {
            error!("command_channel_closed");
        }
    }
}

/// Drive `executor` with every command received on `rx`.
///
/// Each command runs in its own task so a slow command never holds up the
/// next one. The loop ends when every sender has been dropped.
pub fn spawn_executor<E>(
    mut rx: mpsc::UnboundedReceiver<CommandEnvelope>,
    executor: E,
) -> JoinHandle<()>
where
    E: CommandExecutor,
{
    let executor = Arc::new(executor);

    tokio::spawn(async move {
        info!("command_executor_started");

        while let Some(command) = rx.recv().await {
            let executor = Arc::clone(&executor);

            tokio::spawn(async move {
                let received_at = command.received_at;
                if let Err(e) = executor.execute(command).await {
                    error!(received_at = received_at, error = %e, "command_execution_failed");
                }
            });
        }

        warn!("command_executor_stopped");
    })
}
