// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator Service
//!
//! The single authority over expression lifecycle: initial tokenization
//! and dispatch, splicing of returned results, re-dispatch of tokens that
//! become ready, completion, and reclamation of work owned by dead agents.
//!
//! ## Failure policy
//! A failed publish to the work queue is fatal to the process (a lost
//! dispatch stalls its expression forever), so it cancels the process-wide
//! token instead of being dropped. Store errors bubble up to the caller;
//! when the caller is a worker-pool task its failure hook escalates the
//! same way. Stale-generation results are the one benign anomaly: they are
//! discarded, because the expression was already reclaimed and restarted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent::AgentId;
use crate::domain::broker::{Delivery, WorkProducer};
use crate::domain::expression::{Expression, ExpressionId, ExpressionStatus, UserId};
use crate::domain::message::{ResultMessage, WorkMessage};
use crate::domain::repository::{AgentRepository, ExpressionRepository};
use crate::parser;

pub struct Orchestrator {
    expressions: Arc<dyn ExpressionRepository>,
    agents: Arc<dyn AgentRepository>,
    producer: Arc<dyn WorkProducer>,
    /// Agents silent for longer than this are reclaimed.
    inactive_agent_after: Duration,
    /// Expressions untouched for longer than this are re-dispatched.
    stale_expression_after: Duration,
    shutdown: CancellationToken,
    /// Per-expression serialization of the read-splice-write sequence, so
    /// two pool workers never race on one expression's stream. The store's
    /// row-level update covers cross-process writers; this covers local
    /// ones.
    splice_locks: parking_lot::Mutex<HashMap<ExpressionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        expressions: Arc<dyn ExpressionRepository>,
        agents: Arc<dyn AgentRepository>,
        producer: Arc<dyn WorkProducer>,
        inactive_agent_after: Duration,
        stale_expression_after: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            expressions,
            agents,
            producer,
            inactive_agent_after,
            stale_expression_after,
            shutdown,
            splice_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Validate and store a new expression, then dispatch its ready
    /// tokens. Validation errors surface synchronously and mutate nothing.
    pub async fn submit(&self, user_id: UserId, text: &str) -> Result<Expression> {
        let postfix = parser::parse_expression(text)?;
        let mut expression = Expression::new(user_id, text.trim().to_string(), postfix.clone());
        self.expressions.create(&expression).await?;

        // A lone literal has nothing to compute.
        if parser::is_integer_literal(&postfix) {
            let value: i64 = postfix
                .parse()
                .map_err(|_| anyhow!("literal out of range: {postfix}"))?;
            self.expressions.make_ready(expression.id, value).await?;
            expression.mark_ready(value);
            info!(expression_id = %expression.id, value, "expression ready on submission");
            return Ok(expression);
        }

        self.expressions
            .update_status(expression.id, ExpressionStatus::Computing)
            .await?;
        expression.mark_computing();
        self.add_task(&expression).await?;
        Ok(expression)
    }

    /// Publish one work message per currently-independent token of the
    /// expression's stream. The publishes are independent; no ordering is
    /// assumed between them.
    pub async fn add_task(&self, expression: &Expression) -> Result<()> {
        let tokens = parser::get_tokens(&expression.parse_data);
        debug!(
            expression_id = %expression.id,
            count = tokens.len(),
            "dispatching ready tokens"
        );
        for token in tokens {
            let msg = WorkMessage {
                expression_id: expression.id,
                token,
                postfix: expression.parse_data.clone(),
                user_id: expression.user_id,
                generation: expression.generation,
                kill: false,
            };
            if let Err(err) = self.producer.publish(&msg).await {
                error!(expression_id = %expression.id, %err, "can't publish token to work queue");
                self.shutdown.cancel();
                return Err(err).context("work dispatch failed");
            }
        }
        Ok(())
    }

    /// Acknowledge and process one inbound agent message: heartbeat or
    /// computed result.
    pub async fn handle_message(&self, delivery: Delivery<ResultMessage>) -> Result<()> {
        let msg = delivery.ack().await;
        if msg.is_ping {
            self.handle_ping(msg.agent_id).await
        } else {
            self.handle_result(&msg).await
        }
    }

    /// Record an agent heartbeat. No other side effect.
    pub async fn handle_ping(&self, agent_id: AgentId) -> Result<()> {
        self.agents
            .update_last_ping(agent_id, Utc::now())
            .await
            .context("can't update last ping")
    }

    /// Splice a computed result into its expression, completing it or
    /// dispatching whatever the splice made ready.
    pub async fn handle_result(&self, msg: &ResultMessage) -> Result<()> {
        let lock = self.splice_lock(msg.expression_id);
        let _guard = lock.lock().await;

        let expression = self.expressions.find_by_id(msg.expression_id).await?;

        if expression.generation != msg.generation {
            warn!(
                expression_id = %expression.id,
                theirs = msg.generation,
                ours = expression.generation,
                "discarding result from a reclaimed dispatch epoch"
            );
            return Ok(());
        }

        let splice = parser::insert_result_to_token(&expression.parse_data, &msg.token, msg.result)
            .with_context(|| {
                format!(
                    "can't insert result into expression {}",
                    expression.id
                )
            })?;

        if parser::is_integer_literal(&splice.stream) {
            let value: i64 = splice
                .stream
                .parse()
                .map_err(|_| anyhow!("final literal out of range: {}", splice.stream))?;
            self.expressions.make_ready(expression.id, value).await?;
            info!(expression_id = %expression.id, value, "expression fully reduced");
            self.drop_splice_lock(expression.id);
            return Ok(());
        }

        self.expressions
            .update_parse_data(expression.id, &splice.stream)
            .await?;

        if let Some(token) = splice.next_token {
            let next = WorkMessage {
                expression_id: expression.id,
                token,
                postfix: splice.stream,
                user_id: expression.user_id,
                generation: expression.generation,
                kill: false,
            };
            if let Err(err) = self.producer.publish(&next).await {
                error!(expression_id = %expression.id, %err, "can't publish newly-ready token");
                self.shutdown.cancel();
                return Err(err).context("work dispatch failed");
            }
        }

        Ok(())
    }

    /// Liveness sweep: reap agents that stopped heartbeating and restart
    /// their expressions from the last-known stream. Agent termination and
    /// expression reclamation happen in one store transaction; the restart
    /// dispatches afterwards under fresh generations.
    pub async fn check_ping(&self) -> Result<()> {
        let reaped = self
            .agents
            .terminate_expired(self.inactive_agent_after)
            .await?;
        if reaped.is_empty() {
            debug!("all agents are alive");
            return Ok(());
        }
        warn!(count = reaped.len(), "terminated unresponsive agents");

        let expressions = self.expressions.find_terminated().await?;
        for expression in expressions {
            let restarted = self.expressions.restart(expression.id).await?;
            info!(
                expression_id = %restarted.id,
                generation = restarted.generation,
                "restarting reclaimed expression"
            );
            self.add_task(&restarted).await?;
        }
        Ok(())
    }

    /// Startup recovery: re-dispatch every expression that survived a
    /// previous orchestrator crash in `computing` state. At-least-once
    /// resumption; already-spliced sub-results are preserved.
    pub async fn reload_computing_expressions(&self) -> Result<()> {
        let survivors = self.expressions.find_computing().await?;
        if survivors.is_empty() {
            return Ok(());
        }
        info!(count = survivors.len(), "reloading computing expressions");
        for expression in survivors {
            let restarted = self.expressions.restart(expression.id).await?;
            self.add_task(&restarted).await?;
        }
        Ok(())
    }

    /// Re-dispatch expressions that have been `computing` without progress
    /// for too long (e.g. a result lost between agent and broker). The
    /// generation bump makes any late result from the first dispatch
    /// harmless.
    pub async fn find_forgotten_expressions(&self) -> Result<()> {
        let window = chrono::Duration::from_std(self.stale_expression_after)
            .context("stale-expression window out of range")?;
        let cutoff = Utc::now() - window;
        let forgotten = self.expressions.find_stale_computing(cutoff).await?;
        for expression in forgotten {
            warn!(expression_id = %expression.id, "re-dispatching forgotten expression");
            let restarted = self.expressions.restart(expression.id).await?;
            self.add_task(&restarted).await?;
        }
        Ok(())
    }

    /// Best-effort shutdown broadcast so agents stop consuming work.
    pub async fn broadcast_kill(&self, copies: usize) {
        for _ in 0..copies {
            if let Err(err) = self.producer.publish(&WorkMessage::kill()).await {
                warn!(%err, "can't send kill message to agents");
            }
        }
    }

    fn splice_lock(&self, id: ExpressionId) -> Arc<tokio::sync::Mutex<()>> {
        self.splice_locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn drop_splice_lock(&self, id: ExpressionId) {
        self.splice_locks.lock().remove(&id);
    }
}
