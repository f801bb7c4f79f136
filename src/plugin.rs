//! Plugin lifecycle and host-side dispatch.
//!
//! Plugins receive inbound messages through `on_message` and moderation
//! commands through `on_command`; the host walks registered plugins in
//! registration order and stops message propagation when a plugin drops
//! a message. The host also acts as a lookup service so cooperating
//! plugins can find each other, e.g. the firewall locating a
//! security-event sink.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::client::InboundMessage;
use crate::storage::{Query, RecordStore, Row};

/// Outcome of a plugin's message hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageVerdict {
    /// Message passes through to the next plugin.
    Pass,
    /// Message is consumed; downstream plugins do not see it.
    Drop { reason: String },
}

/// Lifecycle hooks a plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin name used for host lookup.
    fn name(&self) -> &str;

    /// Handle an inbound message.
    async fn on_message(&self, message: &InboundMessage) -> Result<MessageVerdict>;

    /// Handle a command addressed to this plugin. Returns the reply
    /// text, if any.
    async fn on_command(
        &self,
        command: &str,
        args: &[&str],
        message: &InboundMessage,
    ) -> Result<Option<String>>;

    /// Literal command strings this plugin claims.
    fn commands(&self) -> Vec<&'static str> {
        vec![]
    }

    /// Release resources and persist state before shutdown.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Host-side plugin registry and event dispatcher.
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
    commands: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            commands: HashMap::new(),
        }
    }

    /// Register a plugin. Later registrations see messages only if every
    /// earlier plugin passed them through.
    pub fn register(mut self, plugin: Arc<dyn Plugin>) -> Self {
        for command in plugin.commands() {
            if self
                .commands
                .insert(command.to_string(), plugin.clone())
                .is_some()
            {
                warn!(command = %command, plugin = %plugin.name(), "Command re-registered by another plugin");
            }
        }
        self.plugins.push(plugin);
        self
    }

    /// Find a registered plugin by name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// Dispatch an inbound message through the plugin chain.
    ///
    /// Plugin errors are logged and treated as a pass so one failing
    /// plugin cannot blind the rest of the chain.
    pub async fn dispatch_message(&self, message: &InboundMessage) {
        for plugin in &self.plugins {
            match plugin.on_message(message).await {
                Ok(MessageVerdict::Pass) => {}
                Ok(MessageVerdict::Drop { reason }) => {
                    debug!(
                        plugin = %plugin.name(),
                        message = %message.id,
                        reason = %reason,
                        "Message dropped by plugin"
                    );
                    return;
                }
                Err(e) => {
                    error!(plugin = %plugin.name(), error = ?e, "Plugin message hook failed");
                }
            }
        }
    }

    /// Dispatch a command to the plugin that claimed it. Returns the
    /// reply text, or `None` when no plugin claims the command.
    pub async fn dispatch_command(
        &self,
        command: &str,
        args: &[&str],
        message: &InboundMessage,
    ) -> Option<String> {
        let plugin = self.commands.get(command)?;

        match plugin.on_command(command, args, message).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(plugin = %plugin.name(), command = %command, error = ?e, "Command failed");
                Some(format!("command failed: {}", e))
            }
        }
    }

    /// Run every plugin's cleanup hook. Errors are logged, not
    /// propagated, so one plugin cannot block shutdown.
    pub async fn shutdown(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.cleanup().await {
                error!(plugin = %plugin.name(), error = ?e, "Plugin cleanup failed");
            } else {
                info!(plugin = %plugin.name(), "Plugin cleaned up");
            }
        }
    }
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Kinds of moderation events the firewall reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    BlockedUser,
    KeywordMatch,
    SpamDetected,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedUser => "blocked_user",
            Self::KeywordMatch => "keyword_match",
            Self::SpamDetected => "spam_detected",
        }
    }
}

/// A moderation event recorded by the firewall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub user_id: String,
    pub chat_id: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, user_id: &str, chat_id: &str, detail: Option<String>) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Sink for moderation events emitted by the firewall.
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    async fn record_event(&self, event: SecurityEvent) -> Result<()>;
}

/// Security-event sink persisting through the generic record store.
pub struct RecordStoreSecurityEventSink {
    store: Arc<dyn RecordStore>,
}

impl RecordStoreSecurityEventSink {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Fetch the most recently inserted events for a user.
    pub async fn events_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Row>> {
        let rows = self
            .store
            .fetch_all(
                Query::table("security_events")
                    .filter("user_id", user_id)
                    .limit(limit),
            )
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SecurityEventSink for RecordStoreSecurityEventSink {
    async fn record_event(&self, event: SecurityEvent) -> Result<()> {
        let mut row = Row::new();
        row.insert("kind".to_string(), json!(event.kind.as_str()));
        row.insert("user_id".to_string(), json!(event.user_id));
        row.insert("chat_id".to_string(), json!(event.chat_id));
        row.insert("detail".to_string(), json!(event.detail));
        row.insert(
            "created_at".to_string(),
            json!(event.timestamp.to_rfc3339()),
        );

        self.store.insert("security_events", row).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_message(text: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".to_string(),
            chat_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_name: None,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    struct CountingPlugin {
        name: &'static str,
        seen: AtomicUsize,
        verdict: MessageVerdict,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_message(&self, _message: &InboundMessage) -> Result<MessageVerdict> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(self.verdict.clone())
        }

        async fn on_command(
            &self,
            _command: &str,
            _args: &[&str],
            _message: &InboundMessage,
        ) -> Result<Option<String>> {
            Ok(Some("ok".to_string()))
        }

        fn commands(&self) -> Vec<&'static str> {
            vec!["count"]
        }
    }

    #[tokio::test]
    async fn test_drop_stops_propagation() {
        let first = Arc::new(CountingPlugin {
            name: "first",
            seen: AtomicUsize::new(0),
            verdict: MessageVerdict::Drop {
                reason: "test".to_string(),
            },
        });
        let second = Arc::new(CountingPlugin {
            name: "second",
            seen: AtomicUsize::new(0),
            verdict: MessageVerdict::Pass,
        });

        let host = PluginHost::new()
            .register(first.clone())
            .register(second.clone());

        host.dispatch_message(&test_message("hello")).await;

        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_find_by_name() {
        let plugin = Arc::new(CountingPlugin {
            name: "finder",
            seen: AtomicUsize::new(0),
            verdict: MessageVerdict::Pass,
        });
        let host = PluginHost::new().register(plugin);

        assert!(host.find("finder").is_some());
        assert!(host.find("missing").is_none());
    }

    #[tokio::test]
    async fn test_command_dispatch() {
        let plugin = Arc::new(CountingPlugin {
            name: "cmd",
            seen: AtomicUsize::new(0),
            verdict: MessageVerdict::Pass,
        });
        let host = PluginHost::new().register(plugin);

        let reply = host
            .dispatch_command("count", &[], &test_message("!count"))
            .await;
        assert_eq!(reply.as_deref(), Some("ok"));

        let unknown = host
            .dispatch_command("unknown", &[], &test_message("!unknown"))
            .await;
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_record_store_sink_persists_events() {
        let store = Arc::new(MemoryRecordStore::new());
        let sink = RecordStoreSecurityEventSink::new(store.clone());

        sink.record_event(SecurityEvent::new(
            SecurityEventKind::SpamDetected,
            "u1",
            "c1",
            Some("6 messages in 10s".to_string()),
        ))
        .await
        .unwrap();

        let events = sink.events_for_user("u1", 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["kind"], "spam_detected");
    }
}
