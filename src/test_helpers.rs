//! Test helper utilities for firewatch unit tests
//!
//! Common fixtures and mock implementations shared across the
//! subsystems' test modules.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::client::{ChatClient, InboundMessage};
use crate::plugin::{SecurityEvent, SecurityEventSink};

/// Build an inbound message with the given sender and text.
pub fn inbound_message(sender_id: &str, chat_id: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: format!("m-{}", ulid::Ulid::new()),
        chat_id: chat_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_name: None,
        text: text.to_string(),
        timestamp: Utc::now(),
    }
}

/// Chat client that records outbound actions for assertions.
#[derive(Default)]
pub struct RecordingChatClient {
    pub sent: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<(String, String)>>,
    pub replies: Mutex<Vec<(String, String, String)>>,
}

impl RecordingChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().len()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<()> {
        self.deleted
            .lock()
            .push((chat_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn reply(&self, chat_id: &str, message_id: &str, text: &str) -> Result<()> {
        self.replies.lock().push((
            chat_id.to_string(),
            message_id.to_string(),
            text.to_string(),
        ));
        Ok(())
    }
}

/// Security-event sink that records events for assertions.
#[derive(Default)]
pub struct RecordingSecuritySink {
    pub events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingSecuritySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

#[async_trait]
impl SecurityEventSink for RecordingSecuritySink {
    async fn record_event(&self, event: SecurityEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Shorthand for the Arc-wrapped recording pair used by firewall tests.
pub fn recording_fixtures() -> (Arc<RecordingChatClient>, Arc<RecordingSecuritySink>) {
    (
        Arc::new(RecordingChatClient::new()),
        Arc::new(RecordingSecuritySink::new()),
    )
}
