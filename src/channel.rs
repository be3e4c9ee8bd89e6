// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Point-to-point control messages.
//!
//! Store-and-acknowledge delivery between two ranks: the sender writes the
//! payload key(s) and polls the matching `/ack` key; the receiver polls the
//! payload, writes `"received"` into the ack, waits a short delay so it does
//! not race the sender's ack poll, and deletes the payload. The ack key is
//! cleaned up by the sender (sender-owns-ack-cleanup). On a send timeout
//! the payload is left in place for a later attempt or manual cleanup.
//!
//! Only one in-flight message per `(operation, src, dst, kind)` tuple is
//! supported; overlapping sends on the same tuple are a caller error and
//! are not guarded here.

use crate::namespace::{KeyNamespace, MessageKeys, PayloadKind};
use crate::retry::RetryPolicy;
use crate::storage::key_value_store::KeyValueStore;
use crate::{raise, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Operation tag used for plain control messages.
const MSG_OP: &str = "msg";

/// Ack body written by the receiver.
const ACK_VALUE: &[u8] = b"received";

pub struct Channel {
    store: Arc<dyn KeyValueStore>,
    keys: KeyNamespace,
    rank: usize,
    retry: RetryPolicy,
    ack_delay: Duration,
}

impl Channel {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: KeyNamespace,
        rank: usize,
        retry: RetryPolicy,
        ack_delay: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            rank,
            retry,
            ack_delay,
        }
    }

    /// Send one integer to `dest_rank` and wait for its acknowledgment.
    pub async fn send_int(&self, value: i32, dest_rank: usize) -> Result<()> {
        let keys = self.keys.message(MSG_OP, self.rank, dest_rank, PayloadKind::Int);
        self.store
            .put(&keys.meta, value.to_string().into_bytes())
            .await?;
        self.wait_for_ack(&keys, dest_rank).await
    }

    /// Receive one integer from `src_rank`.
    pub async fn recv_int(&self, src_rank: usize) -> Result<i32> {
        let keys = self.keys.message(MSG_OP, src_rank, self.rank, PayloadKind::Int);

        let raw = {
            let store = self.store.clone();
            let key = keys.meta.clone();
            self.retry
                .poll(
                    &format!("int message from rank {src_rank}"),
                    move || {
                        let store = store.clone();
                        let key = key.clone();
                        async move { store.get(&key).await }
                    },
                )
                .await?
        };

        // A malformed payload is a local error, not retried.
        let value: i32 = std::str::from_utf8(&raw)?
            .trim()
            .parse()
            .with_context(|| format!("malformed int message from rank {src_rank}"))?;

        self.acknowledge(&keys, false).await?;
        Ok(value)
    }

    /// Send a byte buffer to `dest_rank` and wait for its acknowledgment.
    pub async fn send_bytes(&self, buffer: &[u8], dest_rank: usize) -> Result<()> {
        let keys = self
            .keys
            .message(MSG_OP, self.rank, dest_rank, PayloadKind::Bytes);
        self.store.put(&keys.data, buffer.to_vec()).await?;

        let meta = format!("{}:{}:{}", self.rank, dest_rank, buffer.len());
        self.store.put(&keys.meta, meta.into_bytes()).await?;

        self.wait_for_ack(&keys, dest_rank).await
    }

    /// Receive a byte buffer from `src_rank` into `buffer`.
    ///
    /// Copies at most `buffer.len()` bytes; a longer payload is silently
    /// truncated. Returns the number of bytes copied.
    pub async fn recv_bytes(&self, buffer: &mut [u8], src_rank: usize) -> Result<usize> {
        let keys = self
            .keys
            .message(MSG_OP, src_rank, self.rank, PayloadKind::Bytes);

        let raw = {
            let store = self.store.clone();
            let meta_key = keys.meta.clone();
            let data_key = keys.data.clone();
            self.retry
                .poll(
                    &format!("byte message from rank {src_rank}"),
                    move || {
                        let store = store.clone();
                        let meta_key = meta_key.clone();
                        let data_key = data_key.clone();
                        async move {
                            // Metadata is written last by the sender, so its
                            // presence means the data key is complete.
                            if store.get(&meta_key).await?.is_none() {
                                return Ok(None);
                            }
                            store.get(&data_key).await
                        }
                    },
                )
                .await?
        };

        let copied = raw.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&raw[..copied]);

        self.acknowledge(&keys, true).await?;
        Ok(copied)
    }

    async fn wait_for_ack(&self, keys: &MessageKeys, dest_rank: usize) -> Result<()> {
        let acked = {
            let store = self.store.clone();
            let ack_key = keys.ack.clone();
            self.retry
                .poll(
                    &format!("acknowledgment from rank {dest_rank}"),
                    move || {
                        let store = store.clone();
                        let ack_key = ack_key.clone();
                        async move {
                            match store.get(&ack_key).await? {
                                Some(v) if v == ACK_VALUE => Ok(Some(())),
                                _ => Ok(None),
                            }
                        }
                    },
                )
                .await
        };

        match acked {
            Ok(()) => {
                self.store.delete(&keys.ack).await?;
                Ok(())
            }
            // The payload stays put on timeout.
            Err(e) => raise!("send to rank {dest_rank} not acknowledged: {e}"),
        }
    }

    async fn acknowledge(&self, keys: &MessageKeys, has_data: bool) -> Result<()> {
        self.store.put(&keys.ack, ACK_VALUE.to_vec()).await?;

        // Let the sender observe the ack before its keys disappear.
        sleep(self.ack_delay).await;

        if has_data {
            self.store.delete(&keys.data).await?;
        }
        self.store.delete(&keys.meta).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::key_value_store::MemoryStore;

    fn channel(store: &MemoryStore, rank: usize, attempts: u32) -> Channel {
        Channel::new(
            Arc::new(store.clone()),
            KeyNamespace::new("xbench/"),
            rank,
            RetryPolicy::new(attempts, Duration::from_millis(2)),
            Duration::from_millis(2),
        )
    }

    #[tokio::test]
    async fn test_int_roundtrip_leaves_no_keys() {
        let store = MemoryStore::new();
        let sender = channel(&store, 0, 60);
        let receiver = channel(&store, 1, 60);

        let send = tokio::spawn(async move { sender.send_int(42, 1).await });
        let value = receiver.recv_int(0).await.unwrap();
        assert_eq!(value, 42);
        send.await.unwrap().unwrap();

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_bytes_roundtrip() {
        let store = MemoryStore::new();
        let sender = channel(&store, 0, 60);
        let receiver = channel(&store, 1, 60);

        let send = tokio::spawn(async move { sender.send_bytes(b"control-plane", 1).await });
        let mut buffer = [0u8; 32];
        let copied = receiver.recv_bytes(&mut buffer, 0).await.unwrap();
        assert_eq!(&buffer[..copied], b"control-plane");
        send.await.unwrap().unwrap();

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_bytes_truncated_to_receiver_capacity() {
        let store = MemoryStore::new();
        let sender = channel(&store, 0, 60);
        let receiver = channel(&store, 1, 60);

        let send = tokio::spawn(async move { sender.send_bytes(b"0123456789", 1).await });
        let mut buffer = [0u8; 4];
        let copied = receiver.recv_bytes(&mut buffer, 0).await.unwrap();
        assert_eq!(copied, 4);
        assert_eq!(&buffer, b"0123");
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_timeout_leaves_payload() {
        let store = MemoryStore::new();
        let sender = channel(&store, 0, 3);

        let err = sender.send_int(7, 1).await.unwrap_err();
        assert!(err.to_string().contains("not acknowledged"));
        assert_eq!(
            store.get("xbench/msg+int_data/src=0/dst=1").await.unwrap(),
            Some(b"7".to_vec())
        );
    }

    #[tokio::test]
    async fn test_malformed_int_is_immediate_error() {
        let store = MemoryStore::new();
        store
            .put(
                "xbench/msg+int_data/src=0/dst=1",
                b"not-a-number".to_vec(),
            )
            .await
            .unwrap();

        let receiver = channel(&store, 1, 3);
        let err = receiver.recv_int(0).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
        // no ack was written
        assert_eq!(
            store
                .get("xbench/msg+int_data/src=0/dst=1/ack")
                .await
                .unwrap(),
            None
        );
    }
}
