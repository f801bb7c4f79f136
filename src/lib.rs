//! # firewatch
//!
//! firewatch is a plugin-driven automation layer for a messaging
//! platform. It runs user-defined automations against a chat API: a
//! firewall plugin moderates inbound messages
//! (blocklist/keyword/spam-rate checks), and a background task subsystem
//! queues, dispatches, and retries units of work. Queueing and task
//! records live in Redis; the firewall's configuration and security
//! events persist to Postgres through thin trait abstractions.
//!
//! ## Architecture Overview
//!
//! ### Task Subsystem
//! - Tasks are created by arbitrary call sites, serialized to the
//!   key-value store, and queued onto one of three priority lanes
//!   (high/normal/low)
//! - One consumer loop per lane pops ids with a short blocking timeout
//!   and hands off execution without awaiting completion, bounded by a
//!   per-lane semaphore
//! - Handlers are resolved through a registry populated at startup;
//!   unknown handler keys fail closed
//! - Failures consume bounded retry attempts, then the task stays failed
//!
//! ### Firewall Plugin
//! - Whitelisted users and chats bypass every check
//! - Blocklisted senders and keyword matches are dropped and logged
//! - A per-user sliding window flags spam bursts
//! - Moderation commands (`block`, `keyword`, `spam`, ...) mutate and
//!   persist the configuration
//!
//! ### Storage
//! - `kv`: get/set/delete/exists/publish/enqueue/dequeue over Redis or
//!   memory, with JSON value coding
//! - `storage`: structured-descriptor CRUD over Postgres, plus firewall
//!   config persistence
//!
//! ## Configuration
//!
//! The service is configured via environment variables. Key variables:
//! - `REDIS_URL`: Redis connection (default `redis://localhost:6379/0`)
//! - `DATABASE_URL`: Postgres connection (optional)
//! - `TASK_LANE_CONCURRENCY`: per-lane execution bound
//! - `SPAM_THRESHOLD` / `SPAM_WINDOW_SECONDS`: firewall defaults
//!
//! ## Error Handling
//!
//! All error strings use the format:
//! `error-firewatch-<domain>-<number> <message>: <details>`

/// Messaging client abstraction: outbound capabilities and the inbound
/// message event type. The platform connection itself is an external
/// collaborator.
pub mod client;

/// Configuration management loaded from environment variables.
pub mod config;

pub(crate) mod errors;

/// Firewall moderation plugin: whitelist/blocklist/keyword/spam checks
/// and moderation commands.
pub mod firewall;

/// Key-value store abstraction over Redis with an in-memory twin, used
/// for task records, priority queues, and pub/sub.
pub mod kv;

/// Plugin lifecycle, host-side dispatch, and security-event sinks.
pub mod plugin;

/// Relational storage layer: structured-descriptor CRUD and firewall
/// configuration persistence.
pub mod storage;

/// Background task management: records, registry, manager, and per-lane
/// dispatch loops.
pub mod tasks;

pub use errors::{ConfigError, KvError, PluginError, StorageError, TaskError};

#[cfg(test)]
pub mod test_helpers;
