// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier tests

use super::*;

#[test]
fn short_truncates() {
    assert_eq!(short("abcdef", 3), "abc");
    assert_eq!(short("ab", 3), "ab");
    assert_eq!(short("", 3), "");
}

#[test]
fn plan_id_is_opaque() {
    // Ids arrive from the frontend in whatever shape it mints them.
    let id = PlanId::new("plan/2024/😀-with-unicode");
    assert_eq!(id.as_str(), "plan/2024/😀-with-unicode");
    assert_eq!(id, "plan/2024/😀-with-unicode");
}

#[test]
fn str_ids_roundtrip_serde_transparently() {
    let id = StepId::new("s-42");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"s-42\"");
    let back: StepId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn str_ids_work_as_map_keys() {
    use std::collections::HashMap;
    let mut map: HashMap<PlanId, u32> = HashMap::new();
    map.insert(PlanId::new("p1"), 1);
    // Borrow<str> allows lookup without allocating a PlanId.
    assert_eq!(map.get("p1"), Some(&1));
}

#[test]
fn invocation_ids_are_prefixed_and_unique() {
    let a = InvocationId::generate();
    let b = InvocationId::generate();
    assert!(a.as_str().starts_with(InvocationId::PREFIX));
    assert_ne!(a, b);
}
