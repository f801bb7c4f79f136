//! Firewall rule set: whitelist, blocklist, and keyword matching.

use regex::Regex;
use std::collections::BTreeSet;
use tracing::warn;

/// Mutable rule state consulted on every inbound message.
///
/// Keyword matching is case-insensitive whole-word: the pattern is
/// rebuilt whenever the keyword list changes, with every keyword
/// escaped, so keywords containing regex metacharacters are matched
/// literally.
#[derive(Debug, Default)]
pub struct RuleSet {
    blocked_users: BTreeSet<String>,
    whitelisted_users: BTreeSet<String>,
    whitelisted_chats: BTreeSet<String>,
    keywords: Vec<String>,
    keyword_pattern: Option<Regex>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_user_blocked(&self, user_id: &str) -> bool {
        self.blocked_users.contains(user_id)
    }

    /// Whitelisted senders and chats are exempt from every check.
    pub fn is_whitelisted(&self, user_id: &str, chat_id: &str) -> bool {
        self.whitelisted_users.contains(user_id) || self.whitelisted_chats.contains(chat_id)
    }

    /// Returns false when the user was already blocked.
    pub fn block_user(&mut self, user_id: &str) -> bool {
        self.blocked_users.insert(user_id.to_string())
    }

    /// Returns false when the user was not blocked.
    pub fn unblock_user(&mut self, user_id: &str) -> bool {
        self.blocked_users.remove(user_id)
    }

    pub fn whitelist_user(&mut self, user_id: &str) -> bool {
        self.whitelisted_users.insert(user_id.to_string())
    }

    pub fn unwhitelist_user(&mut self, user_id: &str) -> bool {
        self.whitelisted_users.remove(user_id)
    }

    pub fn whitelist_chat(&mut self, chat_id: &str) -> bool {
        self.whitelisted_chats.insert(chat_id.to_string())
    }

    pub fn unwhitelist_chat(&mut self, chat_id: &str) -> bool {
        self.whitelisted_chats.remove(chat_id)
    }

    /// Add a keyword. Returns false on duplicate (case-insensitive).
    pub fn add_keyword(&mut self, keyword: &str) -> bool {
        let normalized = keyword.trim().to_lowercase();
        if normalized.is_empty() || self.keywords.contains(&normalized) {
            return false;
        }

        self.keywords.push(normalized);
        self.rebuild_pattern();
        true
    }

    /// Remove a keyword. Returns false when it was not present.
    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let normalized = keyword.trim().to_lowercase();
        let before = self.keywords.len();
        self.keywords.retain(|k| k != &normalized);

        if self.keywords.len() == before {
            return false;
        }

        self.rebuild_pattern();
        true
    }

    /// Find the first blocklisted keyword appearing in the text as a
    /// whole word.
    pub fn match_keyword(&self, text: &str) -> Option<String> {
        let pattern = self.keyword_pattern.as_ref()?;
        pattern
            .find(text)
            .map(|found| found.as_str().to_lowercase())
    }

    pub fn blocked_users(&self) -> impl Iterator<Item = &String> {
        self.blocked_users.iter()
    }

    pub fn whitelisted_users(&self) -> impl Iterator<Item = &String> {
        self.whitelisted_users.iter()
    }

    pub fn whitelisted_chats(&self) -> impl Iterator<Item = &String> {
        self.whitelisted_chats.iter()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked_users.len()
    }

    fn rebuild_pattern(&mut self) {
        if self.keywords.is_empty() {
            self.keyword_pattern = None;
            return;
        }

        let escaped: Vec<String> = self.keywords.iter().map(|k| regex::escape(k)).collect();
        let pattern = format!(r"(?i)\b(?:{})\b", escaped.join("|"));

        match Regex::new(&pattern) {
            Ok(regex) => self.keyword_pattern = Some(regex),
            Err(e) => {
                // Escaped alternation should always compile; keep the
                // previous pattern if it somehow does not.
                warn!(error = ?e, "Keyword pattern rebuild failed");
            }
        }
    }
}
