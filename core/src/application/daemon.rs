// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Orchestrator Daemon Loop
//!
//! Three concurrent activities per orchestrator instance: the inbound
//! result/ping consumption loop feeding the worker pool, the periodic
//! liveness sweep, and the pool's fixed executors. One cancellation token
//! fans out to all of them; on cancellation the daemon broadcasts a
//! best-effort kill to the agents before draining the pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::orchestrator::Orchestrator;
use crate::domain::broker::{Consumer, Delivery, ResultConsumer};
use crate::domain::message::ResultMessage;
use crate::infrastructure::worker_pool::{PoolTask, WorkerPool};

/// Adapter wrapping one inbound delivery for pool execution. Failure
/// escalates to process shutdown: an unprocessed result would stall its
/// expression indefinitely.
struct ResultPoolTask {
    orchestrator: Arc<Orchestrator>,
    delivery: Option<Delivery<ResultMessage>>,
}

impl ResultPoolTask {
    fn new(orchestrator: Arc<Orchestrator>, delivery: Delivery<ResultMessage>) -> Self {
        Self {
            orchestrator,
            delivery: Some(delivery),
        }
    }
}

#[async_trait]
impl PoolTask for ResultPoolTask {
    async fn execute(&mut self) -> Result<()> {
        match self.delivery.take() {
            Some(delivery) => self.orchestrator.handle_message(delivery).await,
            None => Ok(()),
        }
    }

    async fn on_failure(&mut self, error: anyhow::Error) {
        tracing::error!(%error, "orchestrator message handling failed");
        self.orchestrator.shutdown_token().cancel();
    }
}

pub struct OrchestratorDaemon {
    orchestrator: Arc<Orchestrator>,
    pool: WorkerPool,
    consumer: ResultConsumer,
    sweep_interval: Duration,
    shutdown: CancellationToken,
}

impl OrchestratorDaemon {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        pool: WorkerPool,
        consumer: ResultConsumer,
        sweep_interval: Duration,
    ) -> Self {
        let shutdown = orchestrator.shutdown_token();
        Self {
            orchestrator,
            pool,
            consumer,
            sweep_interval,
            shutdown,
        }
    }

    /// Run until the result queue closes or the cancellation token fires.
    pub async fn run(mut self) -> Result<()> {
        self.pool.start();
        self.orchestrator.reload_computing_expressions().await?;

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately; there is nothing to reap yet
        sweep.tick().await;

        loop {
            tokio::select! {
                delivery = self.consumer.recv() => {
                    match delivery {
                        Some(delivery) => {
                            let task = ResultPoolTask::new(Arc::clone(&self.orchestrator), delivery);
                            self.pool.add_work(Box::new(task)).await;
                        }
                        None => {
                            warn!("result queue closed, stopping orchestrator");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    if let Err(err) = self.orchestrator.check_ping().await {
                        warn!(%err, "liveness sweep failed");
                    }
                    if let Err(err) = self.orchestrator.find_forgotten_expressions().await {
                        warn!(%err, "stale-expression sweep failed");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("orchestrator stopping");
                    break;
                }
            }
        }

        self.orchestrator.broadcast_kill(3).await;
        self.pool.stop().await;
        Ok(())
    }
}
