//! Per-event write buffer with read-through caching.
//!
//! One `EventCtx` lives for exactly one event. Reads hit the buffer first,
//! then a cache, then the store; writes stay buffered until `commit`. A
//! handler that fails mid-way simply drops the context, so no partial state
//! ever reaches the store.

use std::collections::BTreeMap;

use crate::store::{RawWrite, Record, Store, StoreError};

pub struct EventCtx<'a> {
    store: &'a dyn Store,
    /// Negative and positive read cache of rows fetched from the store.
    cache: BTreeMap<(&'static str, String), Option<serde_json::Value>>,
    /// Pending upserts, keyed so a later put overwrites an earlier one.
    buffer: BTreeMap<(&'static str, String), serde_json::Value>,
}

impl<'a> EventCtx<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        EventCtx {
            store,
            cache: BTreeMap::new(),
            buffer: BTreeMap::new(),
        }
    }

    /// Read a record, seeing this event's own uncommitted writes.
    pub async fn get<R: Record>(&mut self, key: &str) -> Result<Option<R>, StoreError> {
        let slot = (R::TABLE, key.to_string());
        if let Some(value) = self.buffer.get(&slot) {
            return Ok(Some(serde_json::from_value(value.clone())?));
        }
        if let Some(cached) = self.cache.get(&slot) {
            return match cached {
                Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
                None => Ok(None),
            };
        }
        let fetched = self.store.get_raw(R::TABLE, key).await?;
        self.cache.insert(slot, fetched.clone());
        match fetched {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Buffer an upsert for this record.
    pub fn put<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.buffer.insert((R::TABLE, record.key()), value);
        Ok(())
    }

    /// True if a row exists either in the store or in this event's buffer.
    pub async fn exists<R: Record>(&mut self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get::<R>(key).await?.is_some())
    }

    pub fn pending_writes(&self) -> usize {
        self.buffer.len()
    }

    /// Flush every buffered write as one atomic batch.
    pub async fn commit(self) -> Result<usize, StoreError> {
        let count = self.buffer.len();
        if count == 0 {
            return Ok(0);
        }
        let writes = self
            .buffer
            .into_iter()
            .map(|((table, key), value)| RawWrite { table, key, value })
            .collect();
        self.store.commit(writes).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, Address};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_get_sees_buffered_write() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);

        let mut account = Account::new(Address::zero());
        account.deposit_count = 3;
        ctx.put(&account).unwrap();

        let read: Account = ctx
            .get(Address::zero().as_str())
            .await
            .unwrap()
            .expect("buffered row visible");
        assert_eq!(read.deposit_count, 3);
    }

    #[tokio::test]
    async fn test_drop_discards_buffer() {
        let store = MemoryStore::new();
        {
            let mut ctx = EventCtx::new(&store);
            ctx.put(&Account::new(Address::zero())).unwrap();
        }
        let mut ctx = EventCtx::new(&store);
        let read: Option<Account> = ctx.get(Address::zero().as_str()).await.unwrap();
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_commit_persists_and_counts() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        ctx.put(&Account::new(Address::zero())).unwrap();
        let written = ctx.commit().await.unwrap();
        assert_eq!(written, 1);

        let mut ctx = EventCtx::new(&store);
        let read: Option<Account> = ctx.get(Address::zero().as_str()).await.unwrap();
        assert!(read.is_some());
    }

    #[tokio::test]
    async fn test_later_put_overwrites_earlier() {
        let store = MemoryStore::new();
        let mut ctx = EventCtx::new(&store);
        let mut account = Account::new(Address::zero());
        ctx.put(&account).unwrap();
        account.borrow_count = 1;
        ctx.put(&account).unwrap();
        assert_eq!(ctx.pending_writes(), 1);
        ctx.commit().await.unwrap();

        let mut ctx = EventCtx::new(&store);
        let read: Account = ctx.get(Address::zero().as_str()).await.unwrap().unwrap();
        assert_eq!(read.borrow_count, 1);
    }
}
