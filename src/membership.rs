// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Rank assignment and membership records.
//!
//! Joining processes take the namespace lock, read the `size` counter to
//! obtain the next free rank, and write back `size + 1` together with their
//! own registration record. The lock serializes assignment, so ranks come
//! out as the contiguous sequence 0..k-1 in registration order regardless
//! of arrival interleaving.

use crate::namespace::KeyNamespace;
use crate::storage::key_value_store::KeyValueStore;
use crate::{ErrorContext, Result};
use std::sync::Arc;

pub struct Registrar {
    store: Arc<dyn KeyValueStore>,
    keys: KeyNamespace,
}

impl Registrar {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeyNamespace) -> Self {
        Self { store, keys }
    }

    /// Register this process and return its assigned rank.
    ///
    /// A connect or lock failure here is unrecoverable for the run; the
    /// error propagates out of runtime construction.
    pub async fn register(&self, group_size: usize) -> Result<usize> {
        let token = self
            .store
            .lock(&self.keys.lock())
            .await
            .context("failed to acquire registration lock")?;

        let result = self.assign_rank().await;

        // Release the lock before surfacing any assignment error; a held
        // lock would wedge every other joiner.
        self.store.unlock(token).await?;

        let rank = result?;
        tracing::info!("registered as rank {rank} of {group_size}");
        Ok(rank)
    }

    async fn assign_rank(&self) -> Result<usize> {
        let rank = match self.store.get(&self.keys.size()).await? {
            Some(raw) => std::str::from_utf8(&raw)?
                .trim()
                .parse::<usize>()
                .context("size counter is not a number")?,
            None => 0,
        };

        self.store
            .put(&self.keys.size(), (rank + 1).to_string().into_bytes())
            .await?;
        self.store
            .put(&self.keys.rank(rank), b"active".to_vec())
            .await?;
        Ok(rank)
    }

    /// Remove this rank's registration record. The owner (rank 0)
    /// additionally erases the shared `size` counter, the barrier subtree
    /// and the whole namespace; callers must make sure every participant
    /// is finished before invoking that path.
    pub async fn deregister(&self, rank: usize, is_owner: bool) -> Result<()> {
        self.store.delete(&self.keys.rank(rank)).await?;

        if is_owner {
            self.store.delete(&self.keys.size()).await?;
            self.store.delete_prefix(&self.keys.barrier_root()).await?;
            self.store.delete_prefix(self.keys.prefix()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key_value_store::MemoryStore;
    use std::collections::HashSet;

    fn registrar(store: &MemoryStore) -> Registrar {
        Registrar::new(
            Arc::new(store.clone()),
            KeyNamespace::new("xbench/"),
        )
    }

    #[tokio::test]
    async fn test_concurrent_joins_get_contiguous_ranks() {
        let store = MemoryStore::new();
        let group_size = 8;

        let mut tasks = Vec::new();
        for _ in 0..group_size {
            let registrar = registrar(&store);
            tasks.push(tokio::spawn(
                async move { registrar.register(group_size).await },
            ));
        }

        let mut ranks = HashSet::new();
        for task in tasks {
            ranks.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(ranks, (0..group_size).collect::<HashSet<_>>());

        let size = store.get("xbench/size").await.unwrap().unwrap();
        assert_eq!(size, group_size.to_string().into_bytes());
    }

    #[tokio::test]
    async fn test_deregister_non_owner_removes_only_own_record() {
        let store = MemoryStore::new();
        let registrar = registrar(&store);
        registrar.register(2).await.unwrap();
        registrar.register(2).await.unwrap();

        registrar.deregister(1, false).await.unwrap();
        assert_eq!(store.get("xbench/rank/1").await.unwrap(), None);
        assert!(store.get("xbench/rank/0").await.unwrap().is_some());
        assert!(store.get("xbench/size").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deregister_owner_purges_namespace() {
        let store = MemoryStore::new();
        let registrar = registrar(&store);
        registrar.register(1).await.unwrap();
        store
            .put("xbench/barrier/b1/count", b"1".to_vec())
            .await
            .unwrap();

        registrar.deregister(0, true).await.unwrap();
        assert!(store.is_empty().await);
    }
}
