// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! A capacity-bounded remote worker. `active` counts in-flight token
//! computations and always satisfies `0 <= active <= capacity`; the status
//! is a pure function of that pair except for `Terminated`, which is set
//! on shutdown or by the orchestrator's liveness sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Waiting,
    Running,
    Sleeping,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Waiting => "waiting",
            AgentStatus::Running => "running",
            AgentStatus::Sleeping => "sleeping",
            AgentStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(AgentStatus::Waiting),
            "running" => Some(AgentStatus::Running),
            "sleeping" => Some(AgentStatus::Sleeping),
            "terminated" => Some(AgentStatus::Terminated),
            _ => None,
        }
    }

    /// Status implied by the admission counters: idle agents wait, full
    /// agents sleep (refuse new work), everything in between runs.
    pub fn derive(active: u32, capacity: u32) -> Self {
        if active == 0 {
            AgentStatus::Waiting
        } else if active >= capacity {
            AgentStatus::Sleeping
        } else {
            AgentStatus::Running
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    /// Maximum concurrent token computations, fixed at creation.
    pub capacity: u32,
    /// Current in-flight computations as last persisted.
    pub active: u32,
    pub status: AgentStatus,
    /// Most recent heartbeat seen by the orchestrator.
    pub last_ping: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(capacity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: AgentId::new(),
            capacity,
            active: 0,
            status: AgentStatus::Waiting,
            last_ping: now,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation_covers_the_whole_range() {
        assert_eq!(AgentStatus::derive(0, 5), AgentStatus::Waiting);
        assert_eq!(AgentStatus::derive(1, 5), AgentStatus::Running);
        assert_eq!(AgentStatus::derive(4, 5), AgentStatus::Running);
        assert_eq!(AgentStatus::derive(5, 5), AgentStatus::Sleeping);
        assert_eq!(AgentStatus::derive(1, 1), AgentStatus::Sleeping);
    }

    #[test]
    fn status_round_trips_through_store_column() {
        for status in [
            AgentStatus::Waiting,
            AgentStatus::Running,
            AgentStatus::Sleeping,
            AgentStatus::Terminated,
        ] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }
    }
}
