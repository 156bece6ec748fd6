//! RabbitMQ transport for accepted commands.
//!
//! The publisher keeps one lazily-opened connection and channel that every
//! spawned publish task shares, reconnecting when the channel drops.

use std::sync::Arc;

use anyhow::{Context, Result};
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::{CommandEnvelope, Dispatcher};
use crate::config::Credentials;

/// Async RabbitMQ publisher with connection management.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    queue: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a publisher for `queue`. No connection is made until the first publish.
    pub fn new(url: String, queue: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                queue,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    pub fn queue(&self) -> &str {
        &self.inner.queue
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Another task may have reconnected while we waited for the lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.queue_declare(
            &self.inner.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare command queue")?;

        info!(queue = %self.inner.queue, "rabbitmq_publisher_connected");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Publish an accepted command to the command queue.
    pub async fn publish_command(&self, envelope: &CommandEnvelope) -> Result<()> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(envelope).context("Failed to serialize command")?;

        channel
            .basic_publish(
                "",
                &self.inner.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_timestamp(envelope.received_at),
            )
            .await
            .context("Failed to publish to command queue")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = %self.inner.queue,
            body_length = body.len(),
            "rabbitmq_command_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

/// Dispatcher that publishes each command from its own task.
#[derive(Clone)]
pub struct QueueDispatcher {
    publisher: Publisher,
}

impl QueueDispatcher {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, message: String, credentials: Arc<Credentials>) {
        let publisher = self.publisher.clone();
        let envelope = CommandEnvelope::new(message, Credentials::clone(&credentials));

        tokio::spawn(async move {
            if let Err(e) = publisher.publish_command(&envelope).await {
                error!(
                    queue = %publisher.queue(),
                    error = %e,
                    "command_publish_failed"
                );
            }
        });
    }
}
