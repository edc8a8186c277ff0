//! SQLite-backed store.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::info;

use crate::store::{RawWrite, Store, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }
}

/// Open (creating if needed) the database at `db_path`, configure pragmas and
/// run migrations.
pub async fn init_store(db_path: &str) -> Result<SqliteStore, StoreError> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await
        .map_err(StoreError::Database)?;

    run_migrations(&pool).await?;

    info!("store initialized at {}", db_path);
    Ok(SqliteStore::new(pool))
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    let schema_sql = include_str!("schema.sql");
    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the actual mode set; must use fetch to get result
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    info!("sqlite journal_mode set to {}", journal_mode);

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_raw(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM records WHERE table_name = ? AND record_key = ?",
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    async fn commit(&self, writes: Vec<RawWrite>) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for write in &writes {
            let value = serde_json::to_string(&write.value)?;
            sqlx::query(
                r#"
                INSERT INTO records (table_name, record_key, value, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(table_name, record_key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(write.table)
            .bind(&write.key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
