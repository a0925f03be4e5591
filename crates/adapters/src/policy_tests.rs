// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decision type tests

use super::*;

#[test]
fn approval_required_is_pending_not_blocking() {
    let decision = Decision::deny(vec![DenyReason::approval_required("mail.send")]);
    assert!(!decision.allow);
    assert!(decision.blocking().is_empty());
    assert!(!decision.is_blocked());
}

#[test]
fn other_denials_block() {
    let decision = Decision::deny(vec![
        DenyReason::approval_required("mail.send"),
        DenyReason::for_capability("tenant suspended", "mail.send"),
    ]);
    assert!(decision.is_blocked());
    assert_eq!(decision.blocking().len(), 1);
    assert_eq!(
        decision.blocking_summary(),
        "policy denied: tenant suspended (mail.send)"
    );
}

#[test]
fn allow_has_no_denials() {
    let decision = Decision::allow();
    assert!(decision.allow);
    assert!(!decision.is_blocked());
}

#[test]
fn deny_reason_display_without_capability() {
    assert_eq!(DenyReason::new("quota exceeded").to_string(), "quota exceeded");
}

#[test]
fn deny_reasons_serialize_for_api_surfaces() {
    let reason = DenyReason::approval_required("files.write");
    let json = serde_json::to_value(&reason).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"reason": "approval_required", "capability": "files.write"})
    );
}
