// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! Filters are configured through the `XBENCH_LOG` environment variable
//! using the usual comma-separated `target=level` directives; the default
//! level is `info`.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// ENV used to set the log level
const FILTER_ENV: &str = "XBENCH_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// Initialize the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    });
}
