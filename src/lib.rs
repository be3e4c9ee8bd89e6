// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Group-coordination runtime for the transfer benchmark harness.
//!
//! A fixed-size group of independent processes discovers each other and
//! coordinates (rank assignment, control messages, barrier, broadcast,
//! sum-reduction) using nothing but a shared etcd cluster as transport.
//! The data plane being benchmarked lives elsewhere; this crate only moves
//! small control messages through key-naming conventions and bounded
//! polling loops.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod config;
pub use config::RuntimeConfig;

pub mod barrier;
pub mod broadcast;
pub mod channel;
pub mod logging;
pub mod membership;
pub mod namespace;
pub mod reduce;
pub mod retry;
pub mod runtime;
pub mod storage;
pub mod transports;

pub use namespace::KeyNamespace;
pub use retry::RetryPolicy;
pub use runtime::CoordRuntime;
pub use storage::key_value_store::{KeyValueStore, LockToken, MemoryStore};
