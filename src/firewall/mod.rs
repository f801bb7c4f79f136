//! Firewall moderation plugin.
//!
//! A message-arrival hook that, in order: exempts whitelisted users and
//! chats, drops messages from blocklisted users, drops messages matching
//! blocklisted keywords (case-insensitive whole-word), and tracks a
//! per-user sliding window of message timestamps to flag spam bursts.
//! State lives in process and is persisted through
//! [`FirewallConfigStorage`] on shutdown and on each mutating command.
//!
//! Moderation events are reported to a cooperating security-event sink
//! when one is wired in, and published on the key-value store's
//! `firewall:events` channel.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod commands;
pub mod rules;
pub mod spam;

pub use commands::FirewallCommand;
pub use rules::RuleSet;
pub use spam::{SpamSettings, SpamTracker};

use crate::client::{ChatClient, InboundMessage};
use crate::kv::{KvStore, keys};
use crate::plugin::{
    MessageVerdict, Plugin, SecurityEvent, SecurityEventKind, SecurityEventSink,
};
use crate::storage::FirewallConfigStorage;

/// Serializable firewall configuration.
///
/// This is the shape persisted through [`FirewallConfigStorage`]; the
/// in-memory working state is rebuilt from it on startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default)]
    pub blocked_users: Vec<String>,
    #[serde(default)]
    pub whitelisted_users: Vec<String>,
    #[serde(default)]
    pub whitelisted_chats: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub spam_threshold: u32,
    pub spam_window_seconds: u64,
    pub delete_on_spam: bool,
    pub notify_chat: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            blocked_users: Vec::new(),
            whitelisted_users: Vec::new(),
            whitelisted_chats: Vec::new(),
            keywords: Vec::new(),
            spam_threshold: 5,
            spam_window_seconds: 60,
            delete_on_spam: false,
            notify_chat: true,
        }
    }
}

/// How often the hot path prunes stale spam windows, counted in
/// messages.
const PRUNE_EVERY_MESSAGES: u64 = 256;

struct FirewallState {
    rules: RuleSet,
    spam: SpamTracker,
    settings: SpamSettings,
    notify_chat: bool,
    messages_seen: u64,
}

impl FirewallState {
    fn from_config(config: &FirewallConfig) -> Self {
        let mut rules = RuleSet::new();
        for user_id in &config.blocked_users {
            rules.block_user(user_id);
        }
        for user_id in &config.whitelisted_users {
            rules.whitelist_user(user_id);
        }
        for chat_id in &config.whitelisted_chats {
            rules.whitelist_chat(chat_id);
        }
        for keyword in &config.keywords {
            rules.add_keyword(keyword);
        }

        Self {
            rules,
            spam: SpamTracker::new(),
            settings: SpamSettings {
                threshold: config.spam_threshold,
                window_seconds: config.spam_window_seconds,
                delete_message: config.delete_on_spam,
            },
            notify_chat: config.notify_chat,
            messages_seen: 0,
        }
    }

    fn to_config(&self) -> FirewallConfig {
        FirewallConfig {
            blocked_users: self.rules.blocked_users().cloned().collect(),
            whitelisted_users: self.rules.whitelisted_users().cloned().collect(),
            whitelisted_chats: self.rules.whitelisted_chats().cloned().collect(),
            keywords: self.rules.keywords().to_vec(),
            spam_threshold: self.settings.threshold,
            spam_window_seconds: self.settings.window_seconds,
            delete_on_spam: self.settings.delete_message,
            notify_chat: self.notify_chat,
        }
    }
}

enum Screening {
    Whitelisted,
    Blocked,
    Keyword(String),
    CheckSpam,
}

pub struct FirewallPlugin {
    client: Arc<dyn ChatClient>,
    config_storage: Arc<dyn FirewallConfigStorage>,
    kv: Arc<dyn KvStore>,
    security_sink: Option<Arc<dyn SecurityEventSink>>,
    state: RwLock<FirewallState>,
}

impl FirewallPlugin {
    /// Build the plugin, loading persisted configuration when present
    /// and falling back to `defaults` otherwise.
    pub async fn new(
        client: Arc<dyn ChatClient>,
        config_storage: Arc<dyn FirewallConfigStorage>,
        kv: Arc<dyn KvStore>,
        security_sink: Option<Arc<dyn SecurityEventSink>>,
        defaults: FirewallConfig,
    ) -> Self {
        let config = match config_storage.load().await {
            Ok(Some(config)) => {
                info!(
                    blocked = config.blocked_users.len(),
                    keywords = config.keywords.len(),
                    "Loaded firewall configuration"
                );
                config
            }
            Ok(None) => {
                debug!("No persisted firewall configuration, using defaults");
                defaults
            }
            Err(e) => {
                warn!(error = ?e, "Failed to load firewall configuration, using defaults");
                defaults
            }
        };

        Self {
            client,
            config_storage,
            kv,
            security_sink,
            state: RwLock::new(FirewallState::from_config(&config)),
        }
    }

    /// Current configuration snapshot.
    pub async fn snapshot(&self) -> FirewallConfig {
        self.state.read().await.to_config()
    }

    /// Persist the current configuration. Callers on the moderation
    /// path log failures instead of aborting, so a storage outage never
    /// blocks message handling.
    pub async fn persist(&self) -> Result<()> {
        let config = self.snapshot().await;
        self.config_storage.save(&config).await?;
        debug!("Persisted firewall configuration");
        Ok(())
    }

    /// In-window message count currently tracked for a user.
    pub async fn spam_window_len(&self, user_id: &str) -> usize {
        self.state.read().await.spam.window_len(user_id)
    }

    /// Periodic spam-window pruning loop; run as a managed background
    /// task.
    pub async fn run_pruner(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    let mut state = self.state.write().await;
                    let window = state.settings.window();
                    let pruned = state.spam.prune(Utc::now(), window);
                    if pruned > 0 {
                        debug!(count = pruned, "Pruned stale spam windows");
                    }
                }
            }
        }
        Ok(())
    }

    async fn emit_event(
        &self,
        kind: SecurityEventKind,
        message: &InboundMessage,
        detail: Option<String>,
    ) {
        let event = SecurityEvent::new(kind, &message.sender_id, &message.chat_id, detail);

        if let Some(sink) = &self.security_sink {
            if let Err(e) = sink.record_event(event.clone()).await {
                warn!(error = ?e, "Failed to record security event");
            }
        }

        match serde_json::to_value(&event) {
            Ok(value) => {
                if let Err(e) = self.kv.publish(keys::FIREWALL_EVENTS_CHANNEL, &value).await {
                    warn!(error = ?e, "Failed to publish security event");
                }
            }
            Err(e) => warn!(error = ?e, "Failed to encode security event"),
        }
    }

    async fn delete_message(&self, message: &InboundMessage) {
        if let Err(e) = self
            .client
            .delete_message(&message.chat_id, &message.id)
            .await
        {
            warn!(
                chat = %message.chat_id,
                message = %message.id,
                error = ?e,
                "Failed to delete message"
            );
        }
    }

    async fn notify(&self, message: &InboundMessage, text: &str) {
        if let Err(e) = self.client.send_message(&message.chat_id, text).await {
            warn!(chat = %message.chat_id, error = ?e, "Failed to send notice");
        }
    }

    async fn handle_message(&self, message: &InboundMessage) -> MessageVerdict {
        // Screen against the rule set under a single read lock; actions
        // happen after the lock is released.
        let screening = {
            let state = self.state.read().await;

            if state
                .rules
                .is_whitelisted(&message.sender_id, &message.chat_id)
            {
                Screening::Whitelisted
            } else if state.rules.is_user_blocked(&message.sender_id) {
                Screening::Blocked
            } else if let Some(keyword) = state.rules.match_keyword(&message.text) {
                Screening::Keyword(keyword)
            } else {
                Screening::CheckSpam
            }
        };

        match screening {
            Screening::Whitelisted => {
                // Whitelisted traffic bypasses every other check,
                // including the spam counters.
                return MessageVerdict::Pass;
            }
            Screening::Blocked => {
                info!(
                    user = %message.sender_id,
                    chat = %message.chat_id,
                    "Dropped message from blocklisted user"
                );
                self.delete_message(message).await;
                self.emit_event(SecurityEventKind::BlockedUser, message, None)
                    .await;
                return MessageVerdict::Drop {
                    reason: "blocklisted user".to_string(),
                };
            }
            Screening::Keyword(keyword) => {
                info!(
                    user = %message.sender_id,
                    chat = %message.chat_id,
                    keyword = %keyword,
                    "Dropped message matching blocklisted keyword"
                );
                self.delete_message(message).await;

                let notify_chat = self.state.read().await.notify_chat;
                if notify_chat {
                    self.notify(message, "message removed: blocklisted keyword")
                        .await;
                }

                self.emit_event(
                    SecurityEventKind::KeywordMatch,
                    message,
                    Some(format!("keyword: {}", keyword)),
                )
                .await;
                return MessageVerdict::Drop {
                    reason: format!("keyword: {}", keyword),
                };
            }
            Screening::CheckSpam => {}
        }

        let (detected, delete_on_spam, notify_chat, threshold, window_seconds) = {
            let mut state = self.state.write().await;

            state.messages_seen += 1;
            if state.messages_seen % PRUNE_EVERY_MESSAGES == 0 {
                let window = state.settings.window();
                state.spam.prune(Utc::now(), window);
            }

            let threshold = state.settings.threshold;
            let window = state.settings.window();
            let detected =
                state
                    .spam
                    .record(&message.sender_id, message.timestamp, threshold, window);

            (
                detected,
                state.settings.delete_message,
                state.notify_chat,
                threshold,
                state.settings.window_seconds,
            )
        };

        if detected {
            info!(
                user = %message.sender_id,
                chat = %message.chat_id,
                threshold = threshold,
                window_seconds = window_seconds,
                "Spam burst detected"
            );

            if delete_on_spam {
                self.delete_message(message).await;
            }
            if notify_chat {
                self.notify(message, "slow down: message rate limit exceeded")
                    .await;
            }

            self.emit_event(
                SecurityEventKind::SpamDetected,
                message,
                Some(format!(
                    "more than {} messages in {}s",
                    threshold, window_seconds
                )),
            )
            .await;

            return MessageVerdict::Drop {
                reason: "spam rate exceeded".to_string(),
            };
        }

        MessageVerdict::Pass
    }

    async fn handle_command(&self, command: FirewallCommand) -> Result<Option<String>> {
        let mutating = command.is_mutating();

        let reply = {
            let mut state = self.state.write().await;

            match command {
                FirewallCommand::Block { user_id } => {
                    if state.rules.block_user(&user_id) {
                        format!("blocked {}", user_id)
                    } else {
                        format!("{} is already blocked", user_id)
                    }
                }
                FirewallCommand::Unblock { user_id } => {
                    if state.rules.unblock_user(&user_id) {
                        format!("unblocked {}", user_id)
                    } else {
                        format!("{} is not blocked", user_id)
                    }
                }
                FirewallCommand::KeywordAdd { keyword } => {
                    if state.rules.add_keyword(&keyword) {
                        format!("keyword added: {}", keyword.to_lowercase())
                    } else {
                        format!("keyword already present: {}", keyword.to_lowercase())
                    }
                }
                FirewallCommand::KeywordRemove { keyword } => {
                    if state.rules.remove_keyword(&keyword) {
                        format!("keyword removed: {}", keyword.to_lowercase())
                    } else {
                        format!("keyword not found: {}", keyword.to_lowercase())
                    }
                }
                FirewallCommand::KeywordList => {
                    let keywords = state.rules.keywords();
                    if keywords.is_empty() {
                        "no keywords configured".to_string()
                    } else {
                        format!("keywords: {}", keywords.join(", "))
                    }
                }
                FirewallCommand::WhitelistAddUser { user_id } => {
                    if state.rules.whitelist_user(&user_id) {
                        format!("whitelisted user {}", user_id)
                    } else {
                        format!("user {} is already whitelisted", user_id)
                    }
                }
                FirewallCommand::WhitelistRemoveUser { user_id } => {
                    if state.rules.unwhitelist_user(&user_id) {
                        format!("removed user {} from whitelist", user_id)
                    } else {
                        format!("user {} is not whitelisted", user_id)
                    }
                }
                FirewallCommand::WhitelistAddChat { chat_id } => {
                    if state.rules.whitelist_chat(&chat_id) {
                        format!("whitelisted chat {}", chat_id)
                    } else {
                        format!("chat {} is already whitelisted", chat_id)
                    }
                }
                FirewallCommand::WhitelistRemoveChat { chat_id } => {
                    if state.rules.unwhitelist_chat(&chat_id) {
                        format!("removed chat {} from whitelist", chat_id)
                    } else {
                        format!("chat {} is not whitelisted", chat_id)
                    }
                }
                FirewallCommand::WhitelistList => {
                    let users: Vec<&String> = state.rules.whitelisted_users().collect();
                    let chats: Vec<&String> = state.rules.whitelisted_chats().collect();
                    format!(
                        "whitelisted users: {}; chats: {}",
                        if users.is_empty() {
                            "none".to_string()
                        } else {
                            users
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        },
                        if chats.is_empty() {
                            "none".to_string()
                        } else {
                            chats
                                .iter()
                                .map(|s| s.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        }
                    )
                }
                FirewallCommand::SpamThreshold { threshold } => {
                    state.settings.threshold = threshold;
                    format!("spam threshold set to {}", threshold)
                }
                FirewallCommand::SpamWindow { seconds } => {
                    state.settings.window_seconds = seconds;
                    format!("spam window set to {}s", seconds)
                }
                FirewallCommand::SpamDelete { enabled } => {
                    state.settings.delete_message = enabled;
                    format!(
                        "spam message deletion {}",
                        if enabled { "enabled" } else { "disabled" }
                    )
                }
                FirewallCommand::Notify { enabled } => {
                    state.notify_chat = enabled;
                    format!(
                        "chat notifications {}",
                        if enabled { "enabled" } else { "disabled" }
                    )
                }
                FirewallCommand::Status => {
                    format!(
                        "firewall: {} blocked, {} keywords, spam {}/{} s (delete: {}), notify: {}, tracking {} users",
                        state.rules.blocked_count(),
                        state.rules.keywords().len(),
                        state.settings.threshold,
                        state.settings.window_seconds,
                        state.settings.delete_message,
                        state.notify_chat,
                        state.spam.tracked_users(),
                    )
                }
            }
        };

        if mutating {
            if let Err(e) = self.persist().await {
                warn!(error = ?e, "Failed to persist firewall configuration after command");
            }
        }

        Ok(Some(reply))
    }
}

#[async_trait]
impl Plugin for FirewallPlugin {
    fn name(&self) -> &str {
        "firewall"
    }

    async fn on_message(&self, message: &InboundMessage) -> Result<MessageVerdict> {
        Ok(self.handle_message(message).await)
    }

    async fn on_command(
        &self,
        command: &str,
        args: &[&str],
        _message: &InboundMessage,
    ) -> Result<Option<String>> {
        match FirewallCommand::parse(command, args) {
            Ok(parsed) => self.handle_command(parsed).await,
            Err(e) => Ok(Some(e.to_string())),
        }
    }

    fn commands(&self) -> Vec<&'static str> {
        FirewallCommand::COMMANDS.to_vec()
    }

    async fn cleanup(&self) -> Result<()> {
        self.persist().await
    }
}
