// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One-to-many delivery of a fixed-size integer buffer.
//!
//! The root rank serializes the buffer into a slot key; a `_write` barrier
//! guarantees readers never observe a missing or partially visible slot,
//! and a `_read` barrier guarantees the root only removes the slot after
//! every reader has copied it out.

use crate::barrier::Barrier;
use crate::namespace::KeyNamespace;
use crate::retry::RetryPolicy;
use crate::storage::key_value_store::KeyValueStore;
use crate::Result;
use std::sync::Arc;

pub struct Broadcast {
    store: Arc<dyn KeyValueStore>,
    keys: KeyNamespace,
    rank: usize,
    barrier: Barrier,
    retry: RetryPolicy,
}

impl Broadcast {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: KeyNamespace,
        rank: usize,
        barrier: Barrier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            keys,
            rank,
            barrier,
            retry,
        }
    }

    /// Broadcast `buffer` from `root_rank` to every participant. On return
    /// every rank's `buffer` holds the root's values.
    pub async fn broadcast_int(&self, buffer: &mut [i32], root_rank: usize) -> Result<()> {
        let slot_key = self.keys.broadcast_int(root_rank);
        let barrier_id = format!("bcast_int_{root_rank}");

        if self.rank == root_rank {
            let mut encoded = Vec::with_capacity(buffer.len() * 4);
            for v in buffer.iter() {
                encoded.extend_from_slice(&v.to_le_bytes());
            }
            self.store.put(&slot_key, encoded).await?;
        }

        // Bound the write phase: the slot is complete before anyone reads.
        self.barrier.enter(&format!("{barrier_id}_write")).await?;

        if self.rank != root_rank {
            let expected_len = buffer.len() * 4;
            let raw = {
                let store = self.store.clone();
                let key = slot_key.clone();
                self.retry
                    .poll(
                        &format!("broadcast slot from rank {root_rank}"),
                        move || {
                            let store = store.clone();
                            let key = key.clone();
                            async move {
                                let Some(raw) = store.get(&key).await? else {
                                    return Ok(None);
                                };
                                // A short read means the slot is not ready
                                // yet, not a hard error.
                                if raw.len() < expected_len {
                                    tracing::debug!(
                                        "broadcast slot has {} of {expected_len} bytes",
                                        raw.len()
                                    );
                                    return Ok(None);
                                }
                                Ok(Some(raw))
                            }
                        },
                    )
                    .await?
            };

            for (chunk, v) in raw.chunks_exact(4).zip(buffer.iter_mut()) {
                *v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }

        // Bound the read phase: nobody still has a poll in flight against
        // the slot once this returns.
        self.barrier.enter(&format!("{barrier_id}_read")).await?;

        if self.rank == root_rank {
            self.store.delete(&slot_key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key_value_store::MemoryStore;
    use std::time::Duration;

    fn broadcast(store: &MemoryStore, rank: usize, group_size: usize) -> Broadcast {
        let keys = KeyNamespace::new("xbench/");
        let barrier = Barrier::new(
            Arc::new(store.clone()),
            keys.clone(),
            rank,
            group_size,
            RetryPolicy::new(100, Duration::from_millis(2)),
            RetryPolicy::new(100, Duration::from_millis(2)),
            Duration::from_millis(20),
        );
        Broadcast::new(
            Arc::new(store.clone()),
            keys,
            rank,
            barrier,
            RetryPolicy::new(10, Duration::from_millis(2)),
        )
    }

    #[tokio::test]
    async fn test_every_participant_gets_the_root_buffer() {
        let store = MemoryStore::new();
        let group_size = 3;

        let mut tasks = Vec::new();
        for rank in 0..group_size {
            let bcast = broadcast(&store, rank, group_size);
            tasks.push(tokio::spawn(async move {
                let mut buffer = if rank == 0 { [1, 2, 3, 4] } else { [0; 4] };
                bcast.broadcast_int(&mut buffer, 0).await.unwrap();
                buffer
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), [1, 2, 3, 4]);
        }

        // Root removed the slot after the read barrier.
        assert_eq!(store.get("xbench/bcast/int/0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_broadcast_from_nonzero_root() {
        let store = MemoryStore::new();
        let group_size = 2;

        let mut tasks = Vec::new();
        for rank in 0..group_size {
            let bcast = broadcast(&store, rank, group_size);
            tasks.push(tokio::spawn(async move {
                let mut buffer = if rank == 1 { [-7, 9] } else { [0; 2] };
                bcast.broadcast_int(&mut buffer, 1).await.unwrap();
                buffer
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), [-7, 9]);
        }
    }
}
