// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment configuration tests
//!
//! Serialized: these mutate process-wide environment variables.

use super::*;
use crate::config::RuntimeConfig;
use pq_storage::StateBackend;
use serial_test::serial;

fn with_env<T>(pairs: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    for (name, value) in pairs {
        std::env::set_var(name, value);
    }
    let out = f();
    for (name, _) in pairs {
        std::env::remove_var(name);
    }
    out
}

#[test]
#[serial]
fn defaults_when_unset() {
    with_env(&[], || {
        assert_eq!(retry_max(), 5);
        assert_eq!(retry_backoff_ms(), None);
        assert_eq!(init_max_attempts(), 5);
        assert_eq!(init_backoff_ms(), None);
        assert_eq!(plan_state_days(), 0);
        assert!(content_capture_enabled());
        assert_eq!(state_backend(), StateBackend::File);
    });
}

#[test]
#[serial]
fn recognized_keys_are_read() {
    with_env(
        &[
            ("QUEUE_RETRY_MAX", "2"),
            ("QUEUE_RETRY_BACKOFF_MS", "250"),
            ("QUEUE_INIT_MAX_ATTEMPTS", "7"),
            ("QUEUE_INIT_BACKOFF_MS", "100"),
            ("PLAN_STATE_DAYS", "30"),
            ("CONTENT_CAPTURE_ENABLED", "false"),
            ("PLAN_STATE_BACKEND", "relational"),
        ],
        || {
            assert_eq!(retry_max(), 2);
            assert_eq!(retry_backoff_ms(), Some(250));
            assert_eq!(init_max_attempts(), 7);
            assert_eq!(init_backoff_ms(), Some(100));
            assert_eq!(plan_state_days(), 30);
            assert!(!content_capture_enabled());
            assert_eq!(state_backend(), StateBackend::Relational);
        },
    );
}

#[test]
#[serial]
fn init_attempts_floor_at_one() {
    with_env(&[("QUEUE_INIT_MAX_ATTEMPTS", "0")], || {
        assert_eq!(init_max_attempts(), 1);
    });
}

#[test]
#[serial]
fn unparseable_values_fall_back() {
    with_env(
        &[("QUEUE_RETRY_MAX", "many"), ("PLAN_STATE_BACKEND", "oracle")],
        || {
            assert_eq!(retry_max(), 5);
            assert_eq!(state_backend(), StateBackend::File);
        },
    );
}

#[test]
#[serial]
fn runtime_config_from_env_picks_everything_up() {
    with_env(
        &[("QUEUE_RETRY_MAX", "3"), ("CONTENT_CAPTURE_ENABLED", "false")],
        || {
            let config = RuntimeConfig::from_env();
            assert_eq!(config.retry_max, 3);
            assert!(!config.capture_output);
        },
    );
}
