//! In-memory implementations of the storage traits for tests and
//! database-less deployments.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    Condition, FirewallConfigStorage, Query, RecordStore, Row, Storage, StorageResult,
};
use crate::errors::StorageError;
use crate::firewall::FirewallConfig;

/// In-memory implementation of [`RecordStore`].
///
/// Tables are created lazily on first insert; `create_tables` is a
/// no-op.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(row: &Row, conditions: &[Condition]) -> bool {
        conditions.iter().all(|condition| {
            row.get(&condition.column)
                .map(|value| value == &condition.value)
                .unwrap_or(condition.value.is_null())
        })
    }

    fn project(row: &Row, projection: &[String]) -> Row {
        if projection.is_empty() {
            return row.clone();
        }

        let mut projected = Row::new();
        for column in projection {
            if let Some(value) = row.get(column) {
                projected.insert(column.clone(), value.clone());
            }
        }
        projected
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_one(&self, query: Query) -> StorageResult<Option<Row>> {
        let tables = self.tables.read().await;
        let rows = match tables.get(&query.table) {
            Some(rows) => rows,
            None => return Ok(None),
        };

        Ok(rows
            .iter()
            .find(|row| Self::matches(row, &query.conditions))
            .map(|row| Self::project(row, &query.projection)))
    }

    async fn fetch_all(&self, query: Query) -> StorageResult<Vec<Row>> {
        let tables = self.tables.read().await;
        let rows = match tables.get(&query.table) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };

        let mut matched: Vec<Row> = rows
            .iter()
            .filter(|row| Self::matches(row, &query.conditions))
            .map(|row| Self::project(row, &query.projection))
            .collect();

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn insert(&self, table: &str, row: Row) -> StorageResult<()> {
        if row.is_empty() {
            return Err(StorageError::InvalidInput {
                details: "insert requires at least one column".to_string(),
            });
        }

        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(row);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        conditions: Vec<Condition>,
    ) -> StorageResult<u64> {
        if changes.is_empty() {
            return Err(StorageError::InvalidInput {
                details: "update requires at least one changed column".to_string(),
            });
        }

        let mut tables = self.tables.write().await;
        let rows = match tables.get_mut(table) {
            Some(rows) => rows,
            None => return Ok(0),
        };

        let mut changed = 0;
        for row in rows.iter_mut() {
            if Self::matches(row, &conditions) {
                for (column, value) in &changes {
                    row.insert(column.clone(), value.clone());
                }
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn delete(&self, table: &str, conditions: Vec<Condition>) -> StorageResult<u64> {
        let mut tables = self.tables.write().await;
        let rows = match tables.get_mut(table) {
            Some(rows) => rows,
            None => return Ok(0),
        };

        let before = rows.len();
        rows.retain(|row| !Self::matches(row, &conditions));
        Ok((before - rows.len()) as u64)
    }

    async fn create_tables(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryRecordStore {
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-memory firewall configuration storage.
#[derive(Default)]
pub struct MemoryFirewallConfigStorage {
    config: RwLock<Option<FirewallConfig>>,
}

impl MemoryFirewallConfigStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FirewallConfigStorage for MemoryFirewallConfigStorage {
    async fn load(&self) -> StorageResult<Option<FirewallConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn save(&self, config: &FirewallConfig) -> StorageResult<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_row(user_id: &str, kind: &str) -> Row {
        let mut row = Row::new();
        row.insert("kind".to_string(), json!(kind));
        row.insert("user_id".to_string(), json!(user_id));
        row.insert("chat_id".to_string(), json!("c1"));
        row
    }

    #[tokio::test]
    async fn test_insert_fetch_one() {
        let store = MemoryRecordStore::new();
        store
            .insert("security_events", event_row("u1", "blocked_user"))
            .await
            .unwrap();

        let found = store
            .fetch_one(Query::table("security_events").filter("user_id", "u1"))
            .await
            .unwrap();
        assert_eq!(found.unwrap()["kind"], "blocked_user");

        let missing = store
            .fetch_one(Query::table("security_events").filter("user_id", "u9"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_fetch_all_with_projection_and_limit() {
        let store = MemoryRecordStore::new();
        for i in 0..5 {
            store
                .insert("security_events", event_row(&format!("u{}", i), "spam"))
                .await
                .unwrap();
        }

        let rows = store
            .fetch_all(
                Query::table("security_events")
                    .filter("kind", "spam")
                    .select(&["user_id"])
                    .limit(3),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| !row.contains_key("kind")));
    }

    #[tokio::test]
    async fn test_update_matching_rows() {
        let store = MemoryRecordStore::new();
        store
            .insert("security_events", event_row("u1", "spam"))
            .await
            .unwrap();
        store
            .insert("security_events", event_row("u2", "spam"))
            .await
            .unwrap();

        let mut changes = Row::new();
        changes.insert("kind".to_string(), json!("reviewed"));

        let changed = store
            .update(
                "security_events",
                changes,
                vec![Condition::eq("user_id", "u1")],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let updated = store
            .fetch_one(Query::table("security_events").filter("user_id", "u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["kind"], "reviewed");
    }

    #[tokio::test]
    async fn test_delete_returns_removed_count() {
        let store = MemoryRecordStore::new();
        store
            .insert("security_events", event_row("u1", "spam"))
            .await
            .unwrap();
        store
            .insert("security_events", event_row("u1", "keyword_match"))
            .await
            .unwrap();

        let removed = store
            .delete("security_events", vec![Condition::eq("user_id", "u1")])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = store
            .fetch_all(Query::table("security_events"))
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_firewall_config_storage_roundtrip() {
        let storage = MemoryFirewallConfigStorage::new();
        assert!(storage.load().await.unwrap().is_none());

        let mut config = FirewallConfig::default();
        config.blocked_users.push("spammer".to_string());
        storage.save(&config).await.unwrap();

        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded.blocked_users, vec!["spammer"]);
    }
}
