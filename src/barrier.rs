// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! N-party rendezvous.
//!
//! Each participant writes an arrival marker and atomically increments the
//! shared arrival counter; the participant whose increment lands exactly on
//! the group size sets the `ready` flag, so the flag is written at most
//! once. Everyone then waits on the counter and the flag with bounded
//! polls. A timeout is terminal for this call; whether to retry the whole
//! barrier is the caller's decision.
//!
//! Rank 0 deletes the barrier subtree afterwards, behind a grace delay that
//! covers stragglers still reading the `ready` flag.

use crate::namespace::KeyNamespace;
use crate::retry::RetryPolicy;
use crate::storage::key_value_store::KeyValueStore;
use crate::{ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const READY_VALUE: &[u8] = b"true";

#[derive(Clone)]
pub struct Barrier {
    store: Arc<dyn KeyValueStore>,
    keys: KeyNamespace,
    rank: usize,
    group_size: usize,
    count_retry: RetryPolicy,
    ready_retry: RetryPolicy,
    grace: Duration,
}

impl Barrier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: KeyNamespace,
        rank: usize,
        group_size: usize,
        count_retry: RetryPolicy,
        ready_retry: RetryPolicy,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            rank,
            group_size,
            count_retry,
            ready_retry,
            grace,
        }
    }

    /// Block until all `group_size` participants have entered the barrier
    /// identified by `id`, or fail with a timeout error.
    pub async fn enter(&self, id: &str) -> Result<()> {
        let count_key = self.keys.barrier_count(id);
        let ready_key = self.keys.barrier_ready(id);
        let proc_key = self.keys.barrier_proc(id, self.rank);

        self.store.put(&proc_key, b"arrived".to_vec()).await?;

        let arrived = self
            .store
            .increment(&count_key)
            .await
            .with_context(|| format!("failed to count arrival at barrier {id}"))?;

        // Exactly one participant observes the transition to the full count.
        if arrived == self.group_size as i64 {
            self.store.put(&ready_key, READY_VALUE.to_vec()).await?;
        }

        self.wait_for_count(id, &count_key).await?;
        self.wait_for_ready(id, &ready_key).await?;

        self.store.delete(&proc_key).await?;

        if self.rank == 0 {
            // Give everyone time to finish reading the ready flag.
            sleep(self.grace).await;
            // Terminating separator: cleaning up "phase1" must not touch a
            // live "phase10".
            self.store
                .delete_prefix(&format!("{}/", self.keys.barrier(id)))
                .await?;
        }

        tracing::debug!("rank {} passed barrier {id}", self.rank);
        Ok(())
    }

    async fn wait_for_count(&self, id: &str, count_key: &str) -> Result<()> {
        let expected = self.group_size as i64;
        let store = self.store.clone();
        let key = count_key.to_string();
        self.count_retry
            .poll(&format!("barrier {id} arrival count"), move || {
                let store = store.clone();
                let key = key.clone();
                async move {
                    let Some(raw) = store.get(&key).await? else {
                        return Ok(None);
                    };
                    let count: i64 = std::str::from_utf8(&raw)?.trim().parse()?;
                    Ok((count >= expected).then_some(()))
                }
            })
            .await
    }

    async fn wait_for_ready(&self, id: &str, ready_key: &str) -> Result<()> {
        let store = self.store.clone();
        let key = ready_key.to_string();
        self.ready_retry
            .poll(&format!("barrier {id} ready signal"), move || {
                let store = store.clone();
                let key = key.clone();
                async move {
                    match store.get(&key).await? {
                        Some(v) if v == READY_VALUE => Ok(Some(())),
                        _ => Ok(None),
                    }
                }
            })
            .await
    }
}
