//! In-memory store used by tests and quick local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{RawWrite, Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_raw(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&(table.to_string(), key.to_string())).cloned())
    }

    async fn commit(&self, writes: Vec<RawWrite>) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        for write in writes {
            rows.insert((write.table.to_string(), write.key), write.value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let store = MemoryStore::new();
        store
            .commit(vec![RawWrite {
                table: "t",
                key: "k".to_string(),
                value: serde_json::json!(1),
            }])
            .await
            .unwrap();
        store
            .commit(vec![RawWrite {
                table: "t",
                key: "k".to_string(),
                value: serde_json::json!(2),
            }])
            .await
            .unwrap();
        assert_eq!(store.row_count().await, 1);
        assert_eq!(
            store.get_raw("t", "k").await.unwrap(),
            Some(serde_json::json!(2))
        );
    }

    #[tokio::test]
    async fn test_missing_row_is_none() {
        let store = MemoryStore::new();
        assert!(store.get_raw("t", "missing").await.unwrap().is_none());
    }
}
