// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The coordination runtime facade.
//!
//! One [`CoordRuntime`] is constructed per process; construction blocks
//! until the store connection is up and rank registration completes. All
//! primitives are methods on the runtime, which is an explicit context
//! struct owned by the caller; there is no ambient singleton.

use crate::barrier::Barrier;
use crate::broadcast::Broadcast;
use crate::channel::Channel;
use crate::config::RuntimeConfig;
use crate::membership::Registrar;
use crate::namespace::KeyNamespace;
use crate::reduce::Reduce;
use crate::storage::key_value_store::KeyValueStore;
use crate::transports::etcd::EtcdStore;
use crate::{ErrorContext, Result};
use std::sync::Arc;

/// Barrier id of the final rendezvous run during shutdown.
const SHUTDOWN_BARRIER_ID: &str = "shutdown";

pub struct CoordRuntime {
    config: RuntimeConfig,
    registrar: Registrar,
    channel: Channel,
    barrier: Barrier,
    broadcast: Broadcast,
    reduce: Reduce,
    rank: usize,
    group_size: usize,
}

impl CoordRuntime {
    /// Connect to etcd and register into the group described by `config`.
    pub async fn connect(config: RuntimeConfig) -> Result<Self> {
        tracing::info!(
            "connecting to etcd at {}",
            config.etcd_endpoints.join(", ")
        );
        let store = EtcdStore::connect(config.etcd_endpoints.clone())
            .await
            .context("coordination is impossible without the store")?;
        Self::with_store(Arc::new(store), config).await
    }

    /// Build the runtime over any store implementation. Tests use this with
    /// [`crate::MemoryStore`] to run the whole protocol in-process.
    pub async fn with_store(
        store: Arc<dyn KeyValueStore>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let keys = KeyNamespace::new(config.namespace_prefix.clone());
        let group_size = config.group_size;

        let registrar = Registrar::new(store.clone(), keys.clone());
        let rank = registrar.register(group_size).await?;

        let channel = Channel::new(
            store.clone(),
            keys.clone(),
            rank,
            config.message_retry(),
            config.ack_delay(),
        );
        let barrier = Barrier::new(
            store.clone(),
            keys.clone(),
            rank,
            group_size,
            config.barrier_count_retry(),
            config.barrier_ready_retry(),
            config.barrier_grace(),
        );
        let broadcast = Broadcast::new(
            store.clone(),
            keys.clone(),
            rank,
            barrier.clone(),
            config.broadcast_retry(),
        );
        let reduce = Reduce::new(store, keys, rank, group_size, config.reduce_retry());

        Ok(Self {
            config,
            registrar,
            channel,
            barrier,
            broadcast,
            reduce,
            rank,
            group_size,
        })
    }

    /// This process's zero-based rank within the group.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Total number of participants in the group.
    pub fn size(&self) -> usize {
        self.group_size
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Send one integer to `dest_rank`, waiting for its acknowledgment.
    pub async fn send_int(&self, value: i32, dest_rank: usize) -> Result<()> {
        self.channel.send_int(value, dest_rank).await
    }

    /// Receive one integer from `src_rank`.
    pub async fn recv_int(&self, src_rank: usize) -> Result<i32> {
        self.channel.recv_int(src_rank).await
    }

    /// Send a byte buffer to `dest_rank`, waiting for its acknowledgment.
    pub async fn send_bytes(&self, buffer: &[u8], dest_rank: usize) -> Result<()> {
        self.channel.send_bytes(buffer, dest_rank).await
    }

    /// Receive bytes from `src_rank` into `buffer`; returns the copied
    /// length. Longer payloads are silently truncated to the buffer.
    pub async fn recv_bytes(&self, buffer: &mut [u8], src_rank: usize) -> Result<usize> {
        self.channel.recv_bytes(buffer, src_rank).await
    }

    /// Rendezvous with every other participant at `barrier_id`.
    pub async fn barrier(&self, barrier_id: &str) -> Result<()> {
        self.barrier.enter(barrier_id).await
    }

    /// Broadcast `buffer` from `root_rank` to the whole group.
    pub async fn broadcast_int(&self, buffer: &mut [i32], root_rank: usize) -> Result<()> {
        self.broadcast.broadcast_int(buffer, root_rank).await
    }

    /// Sum `local_value` across the group at `dest_rank`. `Some(sum)` on
    /// the destination rank, `None` elsewhere.
    pub async fn reduce_sum(&self, local_value: f64, dest_rank: usize) -> Result<Option<f64>> {
        self.reduce.reduce_sum(local_value, dest_rank).await
    }

    /// Leave the group. Runs a final rendezvous so nobody tears shared
    /// state down while another participant is still coordinating, then
    /// deregisters; rank 0 purges the namespace afterwards.
    pub async fn shutdown(self) -> Result<()> {
        if let Err(e) = self.barrier.enter(SHUTDOWN_BARRIER_ID).await {
            // Cleanup is best-effort from here; the run is over either way.
            tracing::warn!("shutdown rendezvous incomplete: {e:#}");
        }

        self.registrar
            .deregister(self.rank, self.rank == 0)
            .await
            .context("deregistration failed")?;
        tracing::info!("rank {} left the group", self.rank);
        Ok(())
    }
}
