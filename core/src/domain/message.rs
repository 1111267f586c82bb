// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Queue Wire Messages
//!
//! The two message shapes exchanged over the broker. Work flows
//! orchestrator → agents, results and pings flow agents → orchestrator.
//! Delivery is at-least-once with no ordering guarantee between
//! independent messages; every consumer must tolerate duplicates.

use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::expression::{ExpressionId, UserId};

/// One dispatchable token plus the postfix snapshot it was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub expression_id: ExpressionId,
    /// `"<operand> <operand> <operator>"`.
    pub token: String,
    /// The expression's `parse_data` at dispatch time.
    pub postfix: String,
    pub user_id: UserId,
    /// Dispatch epoch of the owning expression. Echoed back in the result
    /// so the orchestrator can reject work from a reclaimed epoch.
    pub generation: i64,
    /// Shutdown broadcast. When set, every other field is ignored.
    #[serde(default)]
    pub kill: bool,
}

impl WorkMessage {
    pub fn kill() -> Self {
        Self {
            expression_id: ExpressionId(uuid::Uuid::nil()),
            token: String::new(),
            postfix: String::new(),
            user_id: UserId(uuid::Uuid::nil()),
            generation: 0,
            kill: true,
        }
    }
}

/// A computed token result, or a heartbeat when `is_ping` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub expression_id: ExpressionId,
    pub token: String,
    pub result: i64,
    #[serde(default)]
    pub is_ping: bool,
    pub agent_id: AgentId,
    pub user_id: UserId,
    pub generation: i64,
}

impl ResultMessage {
    /// Heartbeat carrying only the agent identity.
    pub fn ping(agent_id: AgentId) -> Self {
        Self {
            expression_id: ExpressionId(uuid::Uuid::nil()),
            token: String::new(),
            result: 0,
            is_ping: true,
            agent_id,
            user_id: UserId(uuid::Uuid::nil()),
            generation: 0,
        }
    }
}
