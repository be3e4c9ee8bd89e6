// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The store-facade boundary of the coordination protocol.
//!
//! [`KeyValueStore`] is the entire capability surface the protocol needs
//! from the external store: upsert, point read, single and recursive
//! delete, prefix listing, an advisory lock, and an atomic counter
//! increment. The production implementation is
//! [`crate::transports::etcd::EtcdStore`]; [`MemoryStore`] backs the tests
//! so the whole protocol suite runs in-process.

use crate::{error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

/// Release token for a held advisory lock.
///
/// For etcd this is the lock ownership key returned by the lock RPC; for
/// the memory store it is the lock name itself.
#[derive(Debug, Clone)]
pub struct LockToken(pub(crate) Vec<u8>);

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Upsert one key. The value is an opaque blob.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Point read; `None` when the key is absent. Never partial.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove one key; no-op if absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All `(key, value)` pairs under a prefix, order unspecified.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Remove every key under a prefix.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Block until an exclusive advisory lock on `name` is held.
    async fn lock(&self, name: &str) -> Result<LockToken>;

    /// Release a previously acquired advisory lock.
    async fn unlock(&self, token: LockToken) -> Result<()>;

    /// Atomically add one to the decimal integer stored at `key` (absent
    /// counts as zero) and return the new value. Must be linearizable
    /// across concurrent callers; shared protocol counters rely on it.
    async fn increment(&self, key: &str) -> Result<i64>;
}

#[derive(Default)]
struct MemoryState {
    data: BTreeMap<String, Vec<u8>>,
    locks: HashSet<String>,
}

/// In-process store used by the test suite.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored; used by cleanup assertions.
    pub async fn len(&self) -> usize {
        self.state.lock().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys currently present under a prefix; used by cleanup assertions.
    pub async fn keys_under(&self, prefix: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.state.lock().await.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.data.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.lock().await.data.remove(key);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let state = self.state.lock().await;
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.data.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn lock(&self, name: &str) -> Result<LockToken> {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.locks.insert(name.to_string()) {
                    return Ok(LockToken(name.as_bytes().to_vec()));
                }
            }
            sleep(Duration::from_millis(1)).await;
        }
    }

    async fn unlock(&self, token: LockToken) -> Result<()> {
        let name = String::from_utf8(token.0)
            .map_err(|_| error!("lock token is not a valid lock name"))?;
        self.state.lock().await.locks.remove(&name);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut state = self.state.lock().await;
        let current = match state.data.get(key) {
            Some(raw) => std::str::from_utf8(raw)?.trim().parse::<i64>()?,
            None => 0,
        };
        let next = current + 1;
        state
            .data
            .insert(key.to_string(), next.to_string().into_bytes());
        Ok(next)
    }
}
