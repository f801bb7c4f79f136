//! Relational storage layer: generic CRUD surface and firewall config
//! persistence.
//!
//! The backend's native interface is a query builder, not a raw SQL
//! executor, so the boundary here is a structured query descriptor
//! ([`Query`]) rather than free-text SQL: callers name the table, an
//! equality condition list, and an optional projection/limit. Equality is
//! the only supported predicate shape; conjunctions of equalities are
//! supported, ranges and joins are not.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::StorageError;
use crate::firewall::FirewallConfig;

mod memory;
mod postgres;

pub use memory::{MemoryFirewallConfigStorage, MemoryRecordStore};
pub use postgres::{PostgresFirewallConfigStorage, PostgresRecordStore};

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A stored row, represented as a JSON object.
pub type Row = serde_json::Map<String, Value>;

/// Single equality predicate: `column = value`.
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub value: Value,
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Structured query descriptor.
///
/// Replaces ad-hoc SQL strings at the adapter boundary. An empty
/// projection selects all columns.
#[derive(Debug, Clone)]
pub struct Query {
    pub table: String,
    pub conditions: Vec<Condition>,
    pub projection: Vec<String>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            conditions: Vec::new(),
            projection: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::eq(column, value));
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.projection = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Generic CRUD surface over the relational backend.
///
/// Rows cross this boundary as JSON objects; the implementation is
/// responsible for translating descriptors into backend calls. Reads
/// return `Ok(None)`/empty collections for absence so callers can tell
/// not-found apart from a failed operation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the first row matching the query.
    async fn fetch_one(&self, query: Query) -> StorageResult<Option<Row>>;

    /// Fetch all rows matching the query.
    async fn fetch_all(&self, query: Query) -> StorageResult<Vec<Row>>;

    /// Insert a row into a table.
    async fn insert(&self, table: &str, row: Row) -> StorageResult<()>;

    /// Update matching rows. Returns the number of rows changed.
    async fn update(&self, table: &str, changes: Row, conditions: Vec<Condition>)
    -> StorageResult<u64>;

    /// Delete matching rows. Returns the number of rows removed.
    async fn delete(&self, table: &str, conditions: Vec<Condition>) -> StorageResult<u64>;

    /// Create the schema this service depends on. Idempotent.
    async fn create_tables(&self) -> StorageResult<()>;
}

/// Core storage trait for health monitoring.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Verify that the storage backend is reachable and functioning.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Persistence for the firewall plugin's configuration.
///
/// Saved on shutdown and on each mutating moderation command; loaded
/// once at plugin construction.
#[async_trait]
pub trait FirewallConfigStorage: Send + Sync {
    async fn load(&self) -> StorageResult<Option<FirewallConfig>>;

    async fn save(&self, config: &FirewallConfig) -> StorageResult<()>;
}

/// Validate a SQL identifier before it is interpolated into a statement.
///
/// Identifiers must start with a letter or underscore and contain only
/// alphanumerics and underscores.
pub(crate) fn validate_identifier(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();

    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && name.len() <= 63
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}
