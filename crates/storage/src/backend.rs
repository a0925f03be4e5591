// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend selection.

use serde::{Deserialize, Serialize};

/// Which state store backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// One JSON document per key under a state directory
    #[default]
    File,
    /// Relational schema behind `sqlx`
    Relational,
}

impl std::str::FromStr for StateBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(StateBackend::File),
            "relational" => Ok(StateBackend::Relational),
            other => Err(format!("unknown state backend: {other:?}")),
        }
    }
}

pq_core::simple_display! {
    StateBackend {
        File => "file",
        Relational => "relational",
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
