//! # Runtime Configuration Module
//!
//! Environment-variable configuration for the `may` coroutine runtime that
//! hosts the worker pool.
//!
//! ## Environment Variables
//!
//! ### `PARLEY_STACK_SIZE`
//!
//! Stack size for worker coroutines. Accepts decimal (`131072`) or
//! hexadecimal (`0x20000`). Default: `0x20000` (128 KB).
//!
//! Handlers run arbitrary code (JSON encoding, file I/O, logging) on the worker
//! stack, so the default is larger than a pure routing workload needs.
//!
//! ### `PARLEY_SCHEDULER_THREADS`
//!
//! Number of OS threads backing the coroutine scheduler. Default: the worker
//! capacity, so a handler that blocks its thread cannot starve another pooled
//! worker.
//!
//! ## Usage
//!
//! ```rust
//! use parley::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env(4);
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use std::env;

/// Default coroutine stack size (128 KB)
pub const DEFAULT_STACK_SIZE: usize = 0x20000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for worker coroutines in bytes
    pub stack_size: usize,
    /// OS threads backing the coroutine scheduler
    pub scheduler_threads: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// `workers` is the pool capacity, used as the default thread count.
    pub fn from_env(workers: usize) -> Self {
        let stack_size = env::var("PARLEY_STACK_SIZE")
            .ok()
            .and_then(|val| parse_size(&val))
            .unwrap_or(DEFAULT_STACK_SIZE);
        let scheduler_threads = env::var("PARLEY_SCHEDULER_THREADS")
            .ok()
            .and_then(|val| val.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or_else(|| workers.max(1));
        RuntimeConfig {
            stack_size,
            scheduler_threads,
        }
    }

    /// Push the settings into the global `may` configuration.
    ///
    /// Only effective before the first coroutine is spawned.
    pub fn apply(&self) {
        may::config()
            .set_workers(self.scheduler_threads)
            .set_stack_size(self.stack_size);
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal size.
pub fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    if let Some(hex) = val.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        val.parse().ok()
    }
}
