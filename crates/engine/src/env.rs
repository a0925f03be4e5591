// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the runtime.

use pq_storage::StateBackend;

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

/// Maximum retryable tool failures per step before dead-lettering.
pub fn retry_max() -> u32 {
    parse_var("QUEUE_RETRY_MAX").unwrap_or(5)
}

/// Base for exponential retry backoff. Absent means the broker's default
/// redelivery timing; zero disables the delay outright.
pub fn retry_backoff_ms() -> Option<u64> {
    parse_var("QUEUE_RETRY_BACKOFF_MS")
}

/// Bounded attempts for the initialize retry loop (at least 1).
pub fn init_max_attempts() -> u32 {
    parse_var::<u32>("QUEUE_INIT_MAX_ATTEMPTS").unwrap_or(5).max(1)
}

/// Base for initialize backoff. Absent means retry without delay.
pub fn init_backoff_ms() -> Option<u64> {
    parse_var("QUEUE_INIT_BACKOFF_MS")
}

/// Persisted-state retention in days. Zero disables the retention sweep.
pub fn plan_state_days() -> u32 {
    parse_var("PLAN_STATE_DAYS").unwrap_or(0)
}

/// When false, step `output` is never persisted or published.
pub fn content_capture_enabled() -> bool {
    parse_var("CONTENT_CAPTURE_ENABLED").unwrap_or(true)
}

/// Which state store backend to run.
pub fn state_backend() -> StateBackend {
    parse_var("PLAN_STATE_BACKEND").unwrap_or_default()
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
