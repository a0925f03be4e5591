// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subject tests

use super::*;

#[test]
fn snapshot_is_a_deep_copy() {
    let subject = PlanSubject::builder()
        .roles(["admin".to_string()].into_iter().collect())
        .build();
    let mut copy = subject.snapshot();
    copy.roles.insert("intruder".to_string());
    assert!(!subject.has_role("intruder"));
    assert!(copy.has_role("admin"));
}

#[test]
fn role_and_scope_lookups() {
    let subject = PlanSubject::builder()
        .roles(["operator".to_string()].into_iter().collect())
        .scopes(["plans:write".to_string()].into_iter().collect())
        .build();
    assert!(subject.has_role("operator"));
    assert!(!subject.has_role("admin"));
    assert!(subject.has_scope("plans:write"));
    assert!(!subject.has_scope("plans:admin"));
}

#[test]
fn optional_identity_fields_are_omitted_from_json() {
    let subject = PlanSubject::builder().build();
    let json = serde_json::to_string(&subject).unwrap();
    assert!(!json.contains("email"));
    assert!(!json.contains("roles"));
}
