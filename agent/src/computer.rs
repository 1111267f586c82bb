// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Simple Computer
//!
//! Executes one atomic binary computation after its configured delay and
//! reports into the agent's completion channel. The delay is the
//! simulated/bounded cost of the operation, looked up per user before
//! scheduling.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::error;

use abacus_core::domain::agent::AgentId;
use abacus_core::domain::expression::{ExpressionId, UserId};
use abacus_core::domain::message::{ResultMessage, WorkMessage};
use abacus_core::domain::operation::{ComputeError, Operator};

/// Completion report from one scheduled computation.
#[derive(Debug)]
pub enum Computed {
    Result(ResultMessage),
    /// The token could not be computed (e.g. a divisor that reduced to
    /// zero). No result is published; the expression will be retried by
    /// the orchestrator's stale sweep.
    Failed {
        expression_id: ExpressionId,
        token: String,
        error: ComputeError,
    },
}

/// A validated, ready-to-schedule atomic computation.
pub struct SimpleComputer {
    expression_id: ExpressionId,
    user_id: UserId,
    generation: i64,
    token: String,
    lhs: i64,
    rhs: i64,
    operator: Operator,
}

impl SimpleComputer {
    /// Validate the work message's token shape up front, before the agent
    /// commits capacity to it.
    pub fn parse(msg: &WorkMessage) -> Result<Self> {
        let parts: Vec<&str> = msg.token.split_whitespace().collect();
        if parts.len() != 3 {
            bail!("invalid token: {:?}", msg.token);
        }
        let operator = Operator::parse(parts[2])
            .with_context(|| format!("invalid token operator: {:?}", msg.token))?;
        let lhs: i64 = parts[0]
            .parse()
            .with_context(|| format!("invalid token operand: {:?}", msg.token))?;
        let rhs: i64 = parts[1]
            .parse()
            .with_context(|| format!("invalid token operand: {:?}", msg.token))?;

        Ok(Self {
            expression_id: msg.expression_id,
            user_id: msg.user_id,
            generation: msg.generation,
            token: msg.token.clone(),
            lhs,
            rhs,
            operator,
        })
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Sleep out the configured duration, apply the operation, and report
    /// into the completion channel. A dropped receiver means the agent is
    /// already shutting down and the result is abandoned on purpose.
    pub async fn run(self, agent_id: AgentId, delay: Duration, completions: mpsc::Sender<Computed>) {
        tokio::time::sleep(delay).await;

        let report = match self.operator.apply(self.lhs, self.rhs) {
            Ok(value) => Computed::Result(ResultMessage {
                expression_id: self.expression_id,
                token: self.token,
                result: value,
                is_ping: false,
                agent_id,
                user_id: self.user_id,
                generation: self.generation,
            }),
            Err(error) => {
                error!(
                    expression_id = %self.expression_id,
                    token = %self.token,
                    %error,
                    "token computation failed"
                );
                Computed::Failed {
                    expression_id: self.expression_id,
                    token: self.token,
                    error,
                }
            }
        };

        let _ = completions.send(report).await;
    }
}
