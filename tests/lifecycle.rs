// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Full-lifecycle coordination tests: a group of in-process participants
//! sharing one memory store walks through registration, point-to-point
//! exchange, barrier, broadcast, reduction and teardown using only the
//! public runtime facade.

use std::sync::Arc;
use xbench_runtime::{CoordRuntime, MemoryStore, RuntimeConfig};

async fn join_group(store: &MemoryStore, group_size: usize) -> Vec<CoordRuntime> {
    let mut tasks = Vec::new();
    for _ in 0..group_size {
        let store: Arc<MemoryStore> = Arc::new(store.clone());
        tasks.push(tokio::spawn(async move {
            CoordRuntime::with_store(store, RuntimeConfig::for_testing(group_size)).await
        }));
    }
    let mut runtimes = Vec::new();
    for task in tasks {
        runtimes.push(task.await.unwrap().unwrap());
    }
    runtimes.sort_by_key(|rt| rt.rank());
    runtimes
}

#[tokio::test]
async fn test_ranks_are_contiguous() {
    let store = MemoryStore::new();
    let runtimes = join_group(&store, 4).await;
    let ranks: Vec<usize> = runtimes.iter().map(|rt| rt.rank()).collect();
    assert_eq!(ranks, vec![0, 1, 2, 3]);
    assert!(runtimes.iter().all(|rt| rt.size() == 4));
}

#[tokio::test]
async fn test_full_lifecycle() {
    let store = MemoryStore::new();
    let group_size = 3;
    let runtimes = join_group(&store, group_size).await;

    let mut tasks = Vec::new();
    for rt in runtimes {
        tasks.push(tokio::spawn(async move {
            let rank = rt.rank();

            rt.barrier("start").await.unwrap();

            // Control message 0 -> 1.
            if rank == 0 {
                rt.send_int(42, 1).await.unwrap();
            } else if rank == 1 {
                assert_eq!(rt.recv_int(0).await.unwrap(), 42);
            }

            // Broadcast from root 0.
            let mut buffer = if rank == 0 { [1, 2, 3, 4] } else { [0; 4] };
            rt.broadcast_int(&mut buffer, 0).await.unwrap();
            assert_eq!(buffer, [1, 2, 3, 4]);

            // Sum of 1.0 + 2.0 + 3.0 gathered at rank 0.
            let global = rt.reduce_sum((rank + 1) as f64, 0).await.unwrap();
            if rank == 0 {
                assert!((global.unwrap() - 6.0).abs() < 1e-9);
            } else {
                assert_eq!(global, None);
            }

            rt.shutdown().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Rank 0 purged the whole namespace on the way out.
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_byte_messages_between_ranks() {
    let store = MemoryStore::new();
    let runtimes = join_group(&store, 2).await;

    let mut tasks = Vec::new();
    for rt in runtimes {
        tasks.push(tokio::spawn(async move {
            if rt.rank() == 0 {
                rt.send_bytes(b"ready-to-transfer", 1).await.unwrap();
            } else {
                let mut buffer = [0u8; 64];
                let copied = rt.recv_bytes(&mut buffer, 0).await.unwrap();
                assert_eq!(&buffer[..copied], b"ready-to-transfer");
            }
            rt.shutdown().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(store.is_empty().await);
}
