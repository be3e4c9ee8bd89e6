// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Many-to-one sum reduction.
//!
//! Each participant writes its contribution under a per-rank sub-key of a
//! reduction context; the destination rank folds foreign contributions into
//! its accumulator as they appear, deleting each one it consumes, then
//! erases the context. Non-destination ranks return as soon as their
//! contribution is written.
//!
//! Context ids come from a per-runtime monotonic sequence. Collectives are
//! invoked in program order by every rank, so the sequence numbers agree
//! across the group and consecutive reductions never share a context.

use crate::namespace::KeyNamespace;
use crate::retry::RetryPolicy;
use crate::storage::key_value_store::KeyValueStore;
use crate::{raise, ErrorContext, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::sleep;

pub struct Reduce {
    store: Arc<dyn KeyValueStore>,
    keys: KeyNamespace,
    rank: usize,
    group_size: usize,
    retry: RetryPolicy,
    sequence: AtomicU64,
}

impl Reduce {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: KeyNamespace,
        rank: usize,
        group_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            keys,
            rank,
            group_size,
            retry,
            sequence: AtomicU64::new(0),
        }
    }

    /// Sum `local_value` across the group, gathered at `dest_rank`.
    ///
    /// Returns `Some(global_sum)` on the destination rank, `None` on every
    /// other rank; non-destination calls do not wait for the fold.
    pub async fn reduce_sum(&self, local_value: f64, dest_rank: usize) -> Result<Option<f64>> {
        let reduce_id = self.sequence.fetch_add(1, Ordering::SeqCst).to_string();
        // The terminating separator keeps listing and purging scoped to this
        // context alone; context "1" must never match "10" or "11".
        let context = format!("{}/", self.keys.reduce(&reduce_id));
        let own_key = self.keys.reduce_rank(&reduce_id, self.rank);

        self.store
            .put(&own_key, format!("{local_value:.16}").into_bytes())
            .await?;

        if self.rank != dest_rank {
            return Ok(None);
        }

        // Seed with our own value; our key is skipped while folding.
        let mut global = local_value;
        let mut received = 0usize;
        let expected = self.group_size - 1;

        let mut rounds = 0;
        while received < expected && rounds < self.retry.max_attempts() {
            let entries = match self.store.list_prefix(&context).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("listing reduction context {reduce_id} failed: {e:#}");
                    Vec::new()
                }
            };

            for (key, raw) in entries {
                if key == own_key {
                    continue;
                }
                let contribution: f64 = std::str::from_utf8(&raw)?
                    .trim()
                    .parse()
                    .with_context(|| format!("malformed reduction contribution at {key}"))?;
                global += contribution;

                self.store.delete(&key).await?;
                received += 1;
            }

            if received < expected {
                sleep(self.retry.interval()).await;
                rounds += 1;
            }
        }

        self.store.delete_prefix(&context).await?;

        if received < expected {
            raise!(
                "timed out gathering reduction contributions ({received}/{expected} received)"
            );
        }

        Ok(Some(global))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key_value_store::MemoryStore;
    use std::time::Duration;

    fn reduce(store: &MemoryStore, rank: usize, group_size: usize, attempts: u32) -> Reduce {
        Reduce::new(
            Arc::new(store.clone()),
            KeyNamespace::new("xbench/"),
            rank,
            group_size,
            RetryPolicy::new(attempts, Duration::from_millis(2)),
        )
    }

    #[tokio::test]
    async fn test_sum_gathered_at_destination() {
        let store = MemoryStore::new();
        let group_size = 3;

        let mut tasks = Vec::new();
        for rank in 0..group_size {
            let reduce = reduce(&store, rank, group_size, 100);
            tasks.push(tokio::spawn(async move {
                reduce.reduce_sum((rank + 1) as f64, 0).await.unwrap()
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        assert!((results[0].unwrap() - 6.0).abs() < 1e-9);
        assert_eq!(results[1], None);
        assert_eq!(results[2], None);

        // The destination erased the whole context.
        assert!(store.keys_under("xbench/reduce/").await.is_empty());
    }

    #[tokio::test]
    async fn test_single_participant_sum_is_local_value() {
        let store = MemoryStore::new();
        let reduce = reduce(&store, 0, 1, 5);
        let global = reduce.reduce_sum(2.5, 0).await.unwrap();
        assert_eq!(global, Some(2.5));
    }

    #[tokio::test]
    async fn test_missing_contribution_times_out_without_partial_sum() {
        let store = MemoryStore::new();
        // Destination expects 2 foreign contributions but only its own is written.
        let reduce = reduce(&store, 0, 3, 3);
        let err = reduce.reduce_sum(1.0, 0).await.unwrap_err();
        assert!(err.to_string().contains("0/2"));
        assert!(store.keys_under("xbench/reduce/").await.is_empty());
    }

    #[tokio::test]
    async fn test_context_ids_do_not_collide_across_reductions() {
        let store = MemoryStore::new();
        let dest = reduce(&store, 0, 2, 5);
        let other = reduce(&store, 1, 2, 5);

        // Rank 1 runs far ahead: non-destination calls return as soon as
        // the contribution is written, so contexts 0..=11 are all
        // populated before the destination folds its second reduction.
        for _ in 0..12 {
            assert_eq!(other.reduce_sum(100.0, 0).await.unwrap(), None);
        }

        // Context "1" must not pick up contributions from "10" or "11".
        assert_eq!(dest.reduce_sum(1.0, 0).await.unwrap(), Some(101.0));
        let second = dest.reduce_sum(1.0, 0).await.unwrap().unwrap();
        assert!((second - 101.0).abs() < 1e-9);

        // And purging context "1" must not destroy the later contexts.
        assert_eq!(store.keys_under("xbench/reduce/10/").await.len(), 1);
        assert_eq!(store.keys_under("xbench/reduce/11/").await.len(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_reductions_use_distinct_contexts() {
        let store = MemoryStore::new();
        let reduce = reduce(&store, 0, 1, 5);
        assert_eq!(reduce.reduce_sum(1.0, 0).await.unwrap(), Some(1.0));
        assert_eq!(reduce.reduce_sum(2.0, 0).await.unwrap(), Some(2.0));
        assert_eq!(reduce.sequence.load(Ordering::SeqCst), 2);
    }
}
