// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity on whose behalf a plan runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The identity a plan executes for; drives policy decisions.
///
/// Subjects are snapshotted (cloned) on every boundary crossing (into
/// queue payloads, persisted entries, and API responses) so no caller can
/// mutate runtime-held state through a shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSubject {
    pub session_id: String,
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub scopes: BTreeSet<String>,
}

impl PlanSubject {
    /// Deep-copy snapshot for handing across a boundary.
    pub fn snapshot(&self) -> PlanSubject {
        self.clone()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

crate::builder! {
    pub struct PlanSubjectBuilder => PlanSubject {
        into {
            session_id: String = "sess-1",
            tenant_id: String = "tenant-1",
            user_id: String = "user-1",
        }
        set {
            roles: BTreeSet<String> = BTreeSet::new(),
            scopes: BTreeSet<String> = BTreeSet::new(),
        }
        option {
            email: String = None,
            name: String = None,
        }
    }
}

#[cfg(test)]
#[path = "subject_tests.rs"]
mod tests;
