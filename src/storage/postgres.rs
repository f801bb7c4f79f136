//! PostgreSQL-backed implementations of the storage traits.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query as SqlxQuery;
use sqlx::{PgPool, Postgres, Row as _};
use tracing::debug;

use super::{
    Condition, FirewallConfigStorage, Query, RecordStore, Row, Storage, StorageResult,
    validate_identifier,
};
use crate::errors::StorageError;
use crate::firewall::FirewallConfig;

/// PostgreSQL implementation of [`RecordStore`].
///
/// Identifiers (table and column names) are validated before being
/// interpolated into statements; values are always bound positionally.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Render the WHERE clause for a condition list, starting parameter
    /// numbering at `first_param`. Null values compare with IS NULL and
    /// consume no parameter.
    fn where_clause(
        conditions: &[Condition],
        first_param: usize,
    ) -> StorageResult<(String, Vec<&Value>)> {
        if conditions.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut fragments = Vec::with_capacity(conditions.len());
        let mut binds = Vec::new();
        let mut param = first_param;

        for condition in conditions {
            validate_identifier(&condition.column)?;

            if condition.value.is_null() {
                fragments.push(format!("{} IS NULL", condition.column));
            } else {
                fragments.push(format!("{} = ${}", condition.column, param));
                binds.push(&condition.value);
                param += 1;
            }
        }

        Ok((format!(" WHERE {}", fragments.join(" AND ")), binds))
    }

    fn bind_value<'q>(
        statement: SqlxQuery<'q, Postgres, PgArguments>,
        value: &'q Value,
    ) -> SqlxQuery<'q, Postgres, PgArguments> {
        match value {
            Value::String(s) => statement.bind(s.as_str()),
            Value::Bool(b) => statement.bind(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    statement.bind(i)
                } else {
                    statement.bind(n.as_f64())
                }
            }
            // Null is handled by IS NULL in the clause builders; arrays
            // and objects bind as JSONB.
            _ => statement.bind(value),
        }
    }

    fn projection_sql(query: &Query) -> StorageResult<String> {
        if query.projection.is_empty() {
            return Ok("*".to_string());
        }

        for column in &query.projection {
            validate_identifier(column)?;
        }
        Ok(query.projection.join(", "))
    }

    async fn fetch_rows(&self, query: Query) -> StorageResult<Vec<Row>> {
        validate_identifier(&query.table)?;
        let projection = Self::projection_sql(&query)?;
        let (where_sql, binds) = Self::where_clause(&query.conditions, 1)?;

        let limit_sql = query
            .limit
            .map(|n| format!(" LIMIT {}", n))
            .unwrap_or_default();

        // Wrap the inner select so rows come back as a single JSON column
        // regardless of the table's schema.
        let sql = format!(
            "SELECT row_to_json(t) AS row FROM (SELECT {} FROM {}{}{}) t",
            projection, query.table, where_sql, limit_sql
        );

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = Self::bind_value(statement, value);
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Value = row.get("row");
            match value {
                Value::Object(map) => decoded.push(map),
                other => {
                    return Err(StorageError::RowDecodingFailed {
                        details: format!("expected JSON object row, got {}", other),
                    });
                }
            }
        }

        Ok(decoded)
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn fetch_one(&self, query: Query) -> StorageResult<Option<Row>> {
        let mut query = query;
        query.limit = Some(1);
        Ok(self.fetch_rows(query).await?.into_iter().next())
    }

    async fn fetch_all(&self, query: Query) -> StorageResult<Vec<Row>> {
        self.fetch_rows(query).await
    }

    async fn insert(&self, table: &str, row: Row) -> StorageResult<()> {
        validate_identifier(table)?;

        if row.is_empty() {
            return Err(StorageError::InvalidInput {
                details: "insert requires at least one column".to_string(),
            });
        }

        let mut columns = Vec::with_capacity(row.len());
        let mut placeholders = Vec::with_capacity(row.len());
        let mut binds = Vec::with_capacity(row.len());

        for (param, (column, value)) in row.iter().enumerate() {
            validate_identifier(column)?;
            columns.push(column.as_str());
            placeholders.push(format!("${}", param + 1));
            binds.push(value);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        );

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = Self::bind_value(statement, value);
        }

        statement
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        debug!(table = %table, "Inserted row");
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        changes: Row,
        conditions: Vec<Condition>,
    ) -> StorageResult<u64> {
        validate_identifier(table)?;

        if changes.is_empty() {
            return Err(StorageError::InvalidInput {
                details: "update requires at least one changed column".to_string(),
            });
        }

        let mut assignments = Vec::with_capacity(changes.len());
        let mut binds = Vec::new();
        let mut param = 1;

        for (column, value) in changes.iter() {
            validate_identifier(column)?;
            if value.is_null() {
                assignments.push(format!("{} = NULL", column));
            } else {
                assignments.push(format!("{} = ${}", column, param));
                binds.push(value);
                param += 1;
            }
        }

        let (where_sql, condition_binds) = Self::where_clause(&conditions, param)?;
        binds.extend(condition_binds);

        let sql = format!(
            "UPDATE {} SET {}{}",
            table,
            assignments.join(", "),
            where_sql
        );

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = Self::bind_value(statement, value);
        }

        let result = statement
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, conditions: Vec<Condition>) -> StorageResult<u64> {
        validate_identifier(table)?;
        let (where_sql, binds) = Self::where_clause(&conditions, 1)?;

        let sql = format!("DELETE FROM {}{}", table, where_sql);

        let mut statement = sqlx::query(&sql);
        for value in binds {
            statement = Self::bind_value(statement, value);
        }

        let result = statement
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        Ok(result.rows_affected())
    }

    async fn create_tables(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS firewall_config (
                id INTEGER PRIMARY KEY DEFAULT 1 CHECK (id = 1),
                config JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                id BIGSERIAL PRIMARY KEY,
                kind TEXT NOT NULL,
                user_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        debug!("Ensured firewatch schema");
        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresRecordStore {
    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;
        Ok(())
    }
}

/// PostgreSQL-backed firewall configuration storage.
///
/// The configuration is stored as a single JSONB row; saves upsert in
/// place.
pub struct PostgresFirewallConfigStorage {
    pool: PgPool,
}

impl PostgresFirewallConfigStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FirewallConfigStorage for PostgresFirewallConfigStorage {
    async fn load(&self) -> StorageResult<Option<FirewallConfig>> {
        let row = sqlx::query("SELECT config FROM firewall_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed { source: e })?;

        match row {
            Some(row) => {
                let value: Value = row.get("config");
                let config = serde_json::from_value(value).map_err(|e| {
                    StorageError::RowDecodingFailed {
                        details: format!("firewall_config: {}", e),
                    }
                })?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, config: &FirewallConfig) -> StorageResult<()> {
        let value = serde_json::to_value(config).map_err(|e| StorageError::InvalidInput {
            details: format!("firewall config serialization: {}", e),
        })?;

        sqlx::query(
            r#"
            INSERT INTO firewall_config (id, config, updated_at)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                config = EXCLUDED.config,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed { source: e })?;

        debug!("Persisted firewall configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;

    /// Helper to check if test database is available
    async fn test_db_available() -> bool {
        let database_url = match std::env::var("TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return false,
        };

        PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await
            .is_ok()
    }

    async fn setup_test_db() -> PgPool {
        let database_url =
            std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");

        PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    async fn cleanup_test_db(pool: &PgPool) {
        sqlx::query("DROP TABLE IF EXISTS firewall_config")
            .execute(pool)
            .await
            .expect("Failed to drop firewall_config");
        sqlx::query("DROP TABLE IF EXISTS security_events")
            .execute(pool)
            .await
            .expect("Failed to drop security_events");
    }

    #[tokio::test]
    async fn test_insert_and_fetch() {
        if !test_db_available().await {
            eprintln!("Skipping test: Database not available. Set TEST_DATABASE_URL to enable.");
            return;
        }

        let pool = setup_test_db().await;
        let store = PostgresRecordStore::new(pool.clone());
        store.create_tables().await.unwrap();

        let mut row = Row::new();
        row.insert("kind".to_string(), json!("spam_detected"));
        row.insert("user_id".to_string(), json!("u1"));
        row.insert("chat_id".to_string(), json!("c1"));
        row.insert("created_at".to_string(), json!("2026-01-01T00:00:00Z"));
        store.insert("security_events", row).await.unwrap();

        let fetched = store
            .fetch_one(Query::table("security_events").filter("user_id", "u1"))
            .await
            .unwrap()
            .expect("row should exist");
        assert_eq!(fetched["kind"], "spam_detected");

        let missing = store
            .fetch_one(Query::table("security_events").filter("user_id", "nobody"))
            .await
            .unwrap();
        assert!(missing.is_none());

        cleanup_test_db(&pool).await;
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        if !test_db_available().await {
            eprintln!("Skipping test: Database not available. Set TEST_DATABASE_URL to enable.");
            return;
        }

        let pool = setup_test_db().await;
        let store = PostgresRecordStore::new(pool.clone());
        store.create_tables().await.unwrap();

        let mut row = Row::new();
        row.insert("kind".to_string(), json!("blocked_user"));
        row.insert("user_id".to_string(), json!("u2"));
        row.insert("chat_id".to_string(), json!("c1"));
        row.insert("created_at".to_string(), json!("2026-01-01T00:00:00Z"));
        store.insert("security_events", row).await.unwrap();

        let mut changes = Row::new();
        changes.insert("detail".to_string(), json!("updated"));
        let changed = store
            .update(
                "security_events",
                changes,
                vec![Condition::eq("user_id", "u2")],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let removed = store
            .delete("security_events", vec![Condition::eq("user_id", "u2")])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        cleanup_test_db(&pool).await;
    }

    #[tokio::test]
    async fn test_firewall_config_roundtrip() {
        if !test_db_available().await {
            eprintln!("Skipping test: Database not available. Set TEST_DATABASE_URL to enable.");
            return;
        }

        let pool = setup_test_db().await;
        let store = PostgresRecordStore::new(pool.clone());
        store.create_tables().await.unwrap();

        let config_storage = PostgresFirewallConfigStorage::new(pool.clone());
        assert!(config_storage.load().await.unwrap().is_none());

        let mut config = FirewallConfig::default();
        config.blocked_users.push("u1".to_string());
        config.keywords.push("casino".to_string());
        config_storage.save(&config).await.unwrap();

        let loaded = config_storage.load().await.unwrap().unwrap();
        assert_eq!(loaded.blocked_users, vec!["u1"]);
        assert_eq!(loaded.keywords, vec!["casino"]);

        // Second save overwrites in place
        config.spam_threshold = 9;
        config_storage.save(&config).await.unwrap();
        let reloaded = config_storage.load().await.unwrap().unwrap();
        assert_eq!(reloaded.spam_threshold, 9);

        cleanup_test_db(&pool).await;
    }

    #[tokio::test]
    async fn test_rejects_invalid_table_name() {
        if !test_db_available().await {
            eprintln!("Skipping test: Database not available. Set TEST_DATABASE_URL to enable.");
            return;
        }

        let pool = setup_test_db().await;
        let store = PostgresRecordStore::new(pool.clone());

        let result = store
            .fetch_all(Query::table("security_events; DROP TABLE x"))
            .await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidIdentifier { .. })
        ));
    }
}
