//! Messaging client abstraction.
//!
//! The actual chat platform connection is an external collaborator; this
//! module defines the capabilities firewatch consumes from it (message
//! send/delete/reply) and the inbound event type delivered to plugins.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

/// An inbound chat message as delivered by the platform client.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message identifier.
    pub id: String,
    /// Chat/conversation the message arrived in.
    pub chat_id: String,
    /// Sender's user identifier.
    pub sender_id: String,
    /// Sender's display name, when the platform provides one.
    pub sender_name: Option<String>,
    /// Message text. Non-text messages arrive with an empty body.
    pub text: String,
    /// Platform receive timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Outbound capabilities firewatch requires from the messaging client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a message to a chat.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()>;

    /// Delete a message from a chat.
    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<()>;

    /// Reply to a specific message in a chat.
    async fn reply(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()>;
}

/// Client implementation that logs outbound actions instead of sending
/// them. Used when no platform connection is configured.
#[derive(Debug, Clone, Default)]
pub struct LoggingChatClient;

impl LoggingChatClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChatClient for LoggingChatClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        info!(chat = %chat_id, text = %text, "send_message (logging client)");
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<()> {
        info!(chat = %chat_id, message = %message_id, "delete_message (logging client)");
        Ok(())
    }

    async fn reply(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()> {
        info!(chat = %chat_id, message = %message_id, text = %text, "reply (logging client)");
        Ok(())
    }
}
