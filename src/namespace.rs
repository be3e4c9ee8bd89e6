// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Key construction rules.
//!
//! All coordination state for one benchmark run lives under a single string
//! prefix. Layout:
//!
//! ```text
//! size
//! rank/<r>
//! <op>+<int_data|char_data>/src=<s>/dst=<d>[/data][/ack]
//! barrier/<id>/count | ready | proc-<r>
//! bcast/int/<root>
//! reduce/<id>/rank-<r>
//! ```

/// Payload kind carried by a point-to-point message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Int,
    Bytes,
}

impl PayloadKind {
    fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Int => "int_data",
            PayloadKind::Bytes => "char_data",
        }
    }
}

/// Store keys for one in-flight point-to-point message.
#[derive(Debug, Clone)]
pub struct MessageKeys {
    /// Primary key: the value itself for ints, `src:dst:len` metadata for bytes
    pub meta: String,
    /// Raw byte payload, only used for [`PayloadKind::Bytes`]
    pub data: String,
    /// Receiver writes `"received"` here; the sender reads and clears it
    pub ack: String,
}

/// Deterministic key construction under one run-scoped prefix.
#[derive(Debug, Clone)]
pub struct KeyNamespace {
    prefix: String,
}

impl KeyNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix }
    }

    /// The run-scoped prefix itself, with trailing slash.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Advisory lock guarding rank assignment.
    pub fn lock(&self) -> String {
        format!("{}lock", self.prefix)
    }

    /// Counter of processes registered so far.
    pub fn size(&self) -> String {
        format!("{}size", self.prefix)
    }

    /// Registration record for one rank.
    pub fn rank(&self, rank: usize) -> String {
        format!("{}rank/{rank}", self.prefix)
    }

    /// Keys for a `(operation, src, dst, kind)` message tuple. Only one
    /// in-flight message per tuple is supported; overlapping sends on the
    /// same tuple are a caller error.
    pub fn message(&self, op: &str, src: usize, dst: usize, kind: PayloadKind) -> MessageKeys {
        let meta = format!(
            "{}{op}+{}/src={src}/dst={dst}",
            self.prefix,
            kind.as_str()
        );
        let data = format!("{meta}/data");
        let ack = format!("{meta}/ack");
        MessageKeys { meta, data, ack }
    }

    /// Root of all barrier state.
    pub fn barrier_root(&self) -> String {
        format!("{}barrier", self.prefix)
    }

    /// Root of one barrier's state.
    pub fn barrier(&self, id: &str) -> String {
        format!("{}barrier/{id}", self.prefix)
    }

    /// Shared arrival counter for one barrier.
    pub fn barrier_count(&self, id: &str) -> String {
        format!("{}/count", self.barrier(id))
    }

    /// Flag set once the arrival counter reaches the group size.
    pub fn barrier_ready(&self, id: &str) -> String {
        format!("{}/ready", self.barrier(id))
    }

    /// Per-process arrival marker for one barrier.
    pub fn barrier_proc(&self, id: &str, rank: usize) -> String {
        format!("{}/proc-{rank}", self.barrier(id))
    }

    /// Slot holding the root's serialized buffer during one broadcast.
    pub fn broadcast_int(&self, root: usize) -> String {
        format!("{}bcast/int/{root}", self.prefix)
    }

    /// Root of one reduction context.
    pub fn reduce(&self, id: &str) -> String {
        format!("{}reduce/{id}", self.prefix)
    }

    /// One rank's contribution to a reduction context.
    pub fn reduce_rank(&self, id: &str, rank: usize) -> String {
        format!("{}/rank-{rank}", self.reduce(id))
    }
}
