// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Expression Aggregate
//!
//! An expression is submitted as infix text (`data`, immutable audit copy)
//! and lives as a mutable postfix stream (`parse_data`) that shrinks with
//! every spliced result until it collapses to a single literal.
//!
//! ## Lifecycle
//! | From | To | Trigger |
//! |------|----|---------|
//! | `ReadyForComputation` | `Computing` | first token dispatched |
//! | `Computing` | `Ready` | stream reduced to one literal |
//! | `Computing` | `Terminated` | owning agent stopped heartbeating |
//! | `Terminated` | `Computing` | restart from last-known `parse_data` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpressionId(pub Uuid);

impl ExpressionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ExpressionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExpressionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionStatus {
    ReadyForComputation,
    Computing,
    Ready,
    Terminated,
}

impl ExpressionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionStatus::ReadyForComputation => "ready_for_computation",
            ExpressionStatus::Computing => "computing",
            ExpressionStatus::Ready => "ready",
            ExpressionStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready_for_computation" => Some(ExpressionStatus::ReadyForComputation),
            "computing" => Some(ExpressionStatus::Computing),
            "ready" => Some(ExpressionStatus::Ready),
            "terminated" => Some(ExpressionStatus::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    pub id: ExpressionId,
    pub user_id: UserId,
    /// Original infix text as submitted. Never mutated.
    pub data: String,
    /// Live postfix reduction state. Cleared once the expression is ready.
    pub parse_data: String,
    pub status: ExpressionStatus,
    /// Valid only when `status == Ready`.
    pub result: Option<i64>,
    /// Dispatch epoch. Bumped on every restart so results from a reclaimed
    /// epoch can be told apart from current in-flight work.
    pub generation: i64,
    /// The agent currently holding tokens of this expression, if any.
    pub agent_id: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expression {
    pub fn new(user_id: UserId, data: String, parse_data: String) -> Self {
        let now = Utc::now();
        Self {
            id: ExpressionId::new(),
            user_id,
            data,
            parse_data,
            status: ExpressionStatus::ReadyForComputation,
            result: None,
            generation: 0,
            agent_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_computing(&mut self) {
        self.status = ExpressionStatus::Computing;
        self.updated_at = Utc::now();
    }

    /// Terminal success: the stream collapsed to `result`.
    pub fn mark_ready(&mut self, result: i64) {
        self.status = ExpressionStatus::Ready;
        self.result = Some(result);
        self.parse_data.clear();
        self.updated_at = Utc::now();
    }

    pub fn mark_terminated(&mut self) {
        self.status = ExpressionStatus::Terminated;
        self.updated_at = Utc::now();
    }

    /// Re-enter `Computing` under a fresh generation, keeping the partial
    /// reduction in `parse_data`.
    pub fn restart(&mut self) {
        self.status = ExpressionStatus::Computing;
        self.generation += 1;
        self.agent_id = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_store_column() {
        for status in [
            ExpressionStatus::ReadyForComputation,
            ExpressionStatus::Computing,
            ExpressionStatus::Ready,
            ExpressionStatus::Terminated,
        ] {
            assert_eq!(ExpressionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExpressionStatus::parse("sleeping"), None);
    }

    #[test]
    fn restart_bumps_generation_and_keeps_parse_data() {
        let mut expr = Expression::new(UserId::new(), "3+4".into(), "3 4 +".into());
        expr.mark_computing();
        expr.mark_terminated();
        expr.restart();

        assert_eq!(expr.status, ExpressionStatus::Computing);
        assert_eq!(expr.generation, 1);
        assert_eq!(expr.parse_data, "3 4 +");
        assert!(expr.agent_id.is_none());
    }

    #[test]
    fn mark_ready_clears_parse_data() {
        let mut expr = Expression::new(UserId::new(), "3+4".into(), "3 4 +".into());
        expr.mark_ready(7);
        assert_eq!(expr.result, Some(7));
        assert!(expr.parse_data.is_empty());
    }
}
