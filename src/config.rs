// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration.
//!
//! Settings are layered: serialized defaults first, then environment
//! variables with the `XBENCH_` prefix (e.g. `XBENCH_GROUP_SIZE=4`,
//! `XBENCH_ETCD_ENDPOINTS='["http://etcd-0:2379"]'`). All timing knobs are
//! plain millisecond/attempt counts so a run against a slow store can be
//! tuned without rebuilding, and tests can shrink them to keep polling
//! loops fast.

use crate::retry::RetryPolicy;
use crate::Result;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ENV prefix for all runtime settings
const ENV_PREFIX: &str = "XBENCH_";

/// Default etcd endpoint, matching a local single-node cluster
pub const DEFAULT_ETCD_ENDPOINT: &str = "http://localhost:2379";

/// Default key prefix scoping one benchmark run
pub const DEFAULT_NAMESPACE_PREFIX: &str = "xbench/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Etcd endpoints to connect to
    pub etcd_endpoints: Vec<String>,

    /// Key prefix under which all coordination state for this run lives
    pub namespace_prefix: String,

    /// Total number of participants expected in the group
    pub group_size: usize,

    /// Sleep between poll attempts for the slow loops (ack, barrier, reduce)
    pub poll_interval_ms: u64,

    /// Sleep between poll attempts for fast-turnaround loops (broadcast slot)
    pub fast_poll_interval_ms: u64,

    /// Receiver-side delay between writing an ack and deleting the payload,
    /// so the sender's ack poll is not raced
    pub ack_delay_ms: u64,

    /// Poll attempts for message payload/ack delivery
    pub message_attempts: u32,

    /// Poll attempts for the barrier arrival counter
    pub barrier_count_attempts: u32,

    /// Poll attempts for the barrier ready flag
    pub barrier_ready_attempts: u32,

    /// Poll attempts for the broadcast slot
    pub broadcast_attempts: u32,

    /// Listing rounds for gathering reduction contributions
    pub reduce_attempts: u32,

    /// Grace delay rank 0 waits before deleting a completed barrier subtree
    pub barrier_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            group_size: 1,
            poll_interval_ms: 1000,
            fast_poll_interval_ms: 100,
            ack_delay_ms: 100,
            message_attempts: 60,
            barrier_count_attempts: 30,
            barrier_ready_attempts: 60,
            broadcast_attempts: 10,
            reduce_attempts: 30,
            barrier_grace_ms: 5000,
        }
    }
}

impl RuntimeConfig {
    /// Config for a group of `group_size` with default timing.
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size,
            ..Default::default()
        }
    }

    /// Load config from the environment layered over the defaults.
    pub fn from_settings() -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(config)
    }

    /// Millisecond-scale timing for in-process tests.
    pub fn for_testing(group_size: usize) -> Self {
        Self {
            group_size,
            poll_interval_ms: 5,
            fast_poll_interval_ms: 2,
            ack_delay_ms: 2,
            barrier_grace_ms: 50,
            ..Default::default()
        }
    }

    pub fn ack_delay(&self) -> Duration {
        Duration::from_millis(self.ack_delay_ms)
    }

    pub fn barrier_grace(&self) -> Duration {
        Duration::from_millis(self.barrier_grace_ms)
    }

    pub fn message_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.message_attempts, Duration::from_millis(self.poll_interval_ms))
    }

    pub fn barrier_count_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.barrier_count_attempts,
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn barrier_ready_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.barrier_ready_attempts,
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn broadcast_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.broadcast_attempts,
            Duration::from_millis(self.fast_poll_interval_ms),
        )
    }

    pub fn reduce_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.reduce_attempts, Duration::from_millis(self.poll_interval_ms))
    }
}
