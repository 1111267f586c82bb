// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Runtime Loop
//!
//! Three concurrent activities per agent: admission-gated work
//! consumption, completion publishing, and the heartbeat ticker. A single
//! cancellation token stops all of them; on the way out the agent marks
//! itself terminated so the orchestrator can reclaim whatever it was
//! holding.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use abacus_core::domain::broker::{Consumer, PublishError, ResultProducer, WorkConsumer};
use abacus_core::domain::expression::ExpressionStatus;
use abacus_core::domain::message::WorkMessage;
use abacus_core::domain::repository::{
    AgentRepository, ExpressionRepository, OperationRepository,
};

use crate::agent::Agent;
use crate::computer::{Computed, SimpleComputer};

pub struct AgentApp {
    agent: Agent,
    expressions: Arc<dyn ExpressionRepository>,
    operations: Arc<dyn OperationRepository>,
    producer: Arc<dyn ResultProducer>,
    work: WorkConsumer,
    ping_interval: Duration,
    shutdown: CancellationToken,
    completions_tx: mpsc::Sender<Computed>,
    completions_rx: mpsc::Receiver<Computed>,
}

impl AgentApp {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        agents: Arc<dyn AgentRepository>,
        expressions: Arc<dyn ExpressionRepository>,
        operations: Arc<dyn OperationRepository>,
        producer: Arc<dyn ResultProducer>,
        work: WorkConsumer,
        capacity: u32,
        ping_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let agent = Agent::register(agents, capacity, shutdown.clone()).await?;
        let (completions_tx, completions_rx) =
            mpsc::channel((capacity.max(1) as usize) * 2);
        Ok(Self {
            agent,
            expressions,
            operations,
            producer,
            work,
            ping_interval,
            shutdown,
            completions_tx,
            completions_rx,
        })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Run until killed, cancelled, or the work queue closes.
    pub async fn run(mut self) -> Result<()> {
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                delivery = self.work.recv() => {
                    match delivery {
                        Some(delivery) => {
                            if delivery.message().kill {
                                info!(agent_id = %self.agent.id(), "kill signal received");
                                break;
                            }
                            if !self.agent.try_admit() {
                                // full: push backpressure to the broker
                                delivery.nack_requeue().await;
                                continue;
                            }
                            let msg = delivery.ack().await;
                            if let Err(err) = self.start_computation(msg).await {
                                error!(agent_id = %self.agent.id(), %err, "can't start computation");
                                self.shutdown.cancel();
                                break;
                            }
                        }
                        None => {
                            warn!(agent_id = %self.agent.id(), "work queue closed");
                            break;
                        }
                    }
                }
                Some(done) = self.completions_rx.recv() => {
                    if let Err(err) = self.finish_computation(done).await {
                        error!(agent_id = %self.agent.id(), %err, "can't finish computation");
                        self.shutdown.cancel();
                        break;
                    }
                }
                _ = ping.tick() => {
                    self.agent.heartbeat(self.producer.as_ref()).await;
                }
                _ = self.shutdown.cancelled() => {
                    info!(agent_id = %self.agent.id(), "agent stopping");
                    break;
                }
            }
        }

        self.agent.terminate().await;
        Ok(())
    }

    /// Claim the expression, look up the operation's duration, and
    /// schedule the computation. The local admission slot is already
    /// taken; it is released again if anything here fails.
    async fn start_computation(&self, msg: WorkMessage) -> Result<()> {
        match self.prepare_computation(&msg).await {
            Ok((computer, delay)) => {
                tokio::spawn(computer.run(
                    self.agent.id(),
                    delay,
                    self.completions_tx.clone(),
                ));
                self.agent.record_admission().await?;
                Ok(())
            }
            Err(err) => {
                self.agent.release_admission();
                Err(err)
            }
        }
    }

    async fn prepare_computation(&self, msg: &WorkMessage) -> Result<(SimpleComputer, Duration)> {
        let computer = SimpleComputer::parse(msg)?;

        self.expressions
            .assign_agent(msg.expression_id, self.agent.id())
            .await
            .context("can't assign expression to agent")?;
        self.expressions
            .update_status(msg.expression_id, ExpressionStatus::Computing)
            .await
            .context("can't mark expression computing")?;

        let delay = self
            .operations
            .execution_time(computer.operator(), msg.user_id)
            .await
            .context("can't get execution time for operation")?;

        Ok((computer, delay))
    }

    /// Publish a completed result (with exactly one reconnect-and-retry)
    /// and release the capacity slot. A failed computation releases the
    /// slot without publishing.
    async fn finish_computation(&self, done: Computed) -> Result<()> {
        match done {
            Computed::Result(msg) => {
                match self.producer.publish(&msg).await {
                    Ok(()) => {}
                    Err(PublishError::Retryable(reason)) => {
                        warn!(%reason, "result publish failed, reconnecting");
                        self.producer
                            .reconnect()
                            .await
                            .context("reconnect after failed publish")?;
                        if let Err(err) = self.producer.publish(&msg).await {
                            bail!("result lost after retry: {err}");
                        }
                    }
                    Err(err @ PublishError::Fatal(_)) => {
                        bail!("result lost: {err}");
                    }
                }
                self.agent.record_completion().await
            }
            Computed::Failed {
                expression_id,
                token,
                error,
            } => {
                error!(
                    expression_id = %expression_id,
                    token = %token,
                    %error,
                    "dropping uncomputable token"
                );
                self.agent.record_completion().await
            }
        }
    }
}
