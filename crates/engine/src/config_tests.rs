// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backoff math and config tests

use super::*;
use proptest::prelude::*;
use yare::parameterized;

#[parameterized(
    first = { 100, 0, 100 },
    second = { 100, 1, 200 },
    third = { 100, 2, 400 },
    capped = { 100, 12, MAX_BACKOFF_MS },
    zero_base_disables = { 0, 5, 0 },
    huge_exponent_saturates = { 1_000, 63, MAX_BACKOFF_MS },
)]
fn backoff_doubles_and_saturates(base: u64, exponent: u32, expected: u64) {
    assert_eq!(backoff_delay_ms(base, exponent), expected);
}

#[test]
fn backoff_never_overflows_on_extreme_inputs() {
    assert_eq!(backoff_delay_ms(u64::MAX, u32::MAX), MAX_BACKOFF_MS);
}

proptest! {
    #[test]
    fn backoff_is_bounded_and_monotone(base in 0u64..10_000, exponent in 0u32..64) {
        let delay = backoff_delay_ms(base, exponent);
        prop_assert!(delay <= MAX_BACKOFF_MS);
        if base > 0 {
            prop_assert!(delay >= backoff_delay_ms(base, exponent.saturating_sub(1)).min(MAX_BACKOFF_MS));
        } else {
            prop_assert_eq!(delay, 0);
        }
    }
}

#[test]
fn default_config_matches_documented_defaults() {
    let config = RuntimeConfig::default();
    assert_eq!(config.retry_max, 5);
    assert_eq!(config.retry_backoff_ms, None);
    assert_eq!(config.init_max_attempts, 5);
    assert_eq!(config.init_backoff_ms, None);
    assert_eq!(config.history_retention_ms, DEFAULT_HISTORY_RETENTION_MS);
    assert_eq!(config.plan_state_days, 0);
    assert!(config.capture_output);
}

#[test]
fn setters_chain() {
    let config = RuntimeConfig::default()
        .retry_max(2)
        .retry_backoff_ms(250u64)
        .capture_output(false);
    assert_eq!(config.retry_max, 2);
    assert_eq!(config.retry_backoff_ms, Some(250));
    assert!(!config.capture_output);
}
