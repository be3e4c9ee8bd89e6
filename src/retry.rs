// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bounded poll loops.
//!
//! Every blocking wait in the coordination protocol is a fixed number of
//! attempts with a fixed sleep in between; there is no exponential backoff
//! and no external cancellation. [`RetryPolicy`] makes that loop an explicit
//! value so the attempt count and interval are visible at the call site and
//! configurable from [`crate::RuntimeConfig`].

use crate::{raise, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// A fixed-count, fixed-interval retry bound for one polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run `attempt` until it yields a value or the retry budget is spent.
    ///
    /// `Ok(Some(v))` completes the wait, `Ok(None)` means not ready yet.
    /// An `Err` from an individual attempt (a failed remote call) is logged
    /// and counted as not-ready rather than aborting the wait, matching the
    /// retry-on-error behavior of the polling loops this replaces. Spending
    /// the whole budget is a timeout error naming `what` was awaited.
    pub async fn poll<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        for n in 1..=self.max_attempts {
            match attempt().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("poll attempt {n} for {what} failed: {e:#}");
                }
            }
            if n < self.max_attempts {
                sleep(self.interval).await;
            }
        }
        raise!(
            "timed out waiting for {what} after {} attempts",
            self.max_attempts
        );
    }
}
