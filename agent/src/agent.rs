// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent State Machine
//!
//! One owned instance per agent process. The mutex-guarded local counter
//! is the admission gate; the store carries the same counters so the
//! orchestrator and the listing surface see them. Status follows the
//! counters: `waiting ⇄ running ⇄ sleeping`, with `terminated` on
//! shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use abacus_core::domain::agent::{Agent as AgentRecord, AgentId, AgentStatus};
use abacus_core::domain::broker::ResultProducer;
use abacus_core::domain::message::ResultMessage;
use abacus_core::domain::repository::AgentRepository;

pub struct Agent {
    id: AgentId,
    capacity: u32,
    active: parking_lot::Mutex<u32>,
    agents: Arc<dyn AgentRepository>,
    shutdown: CancellationToken,
}

impl Agent {
    /// Create the agent's store record and the owned runtime state.
    pub async fn register(
        agents: Arc<dyn AgentRepository>,
        capacity: u32,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let record = AgentRecord::new(capacity.max(1));
        agents
            .create(&record)
            .await
            .context("can't register agent")?;
        info!(agent_id = %record.id, capacity = record.capacity, "agent registered");
        Ok(Self {
            id: record.id,
            capacity: record.capacity,
            active: parking_lot::Mutex::new(0),
            agents,
            shutdown,
        })
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn active(&self) -> u32 {
        *self.active.lock()
    }

    /// Capacity-gated admission. A full agent takes nothing; the caller
    /// must negatively acknowledge the delivery so the broker redelivers
    /// it instead of the agent queueing it locally.
    pub fn try_admit(&self) -> bool {
        let mut active = self.active.lock();
        if *active >= self.capacity {
            return false;
        }
        *active += 1;
        true
    }

    /// Undo a local admission whose computation never started.
    pub fn release_admission(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
    }

    /// Persist an accepted admission: store counter plus derived status.
    pub async fn record_admission(&self) -> Result<()> {
        self.agents
            .increment_active(self.id)
            .await
            .context("can't increment active calculations")?;
        self.sync_status().await
    }

    /// One computation finished (published or abandoned): drop the local
    /// and stored counters and re-derive the status.
    pub async fn record_completion(&self) -> Result<()> {
        {
            let mut active = self.active.lock();
            *active = active.saturating_sub(1);
        }
        self.agents
            .decrement_active(self.id)
            .await
            .context("can't decrement active calculations")?;
        self.sync_status().await
    }

    /// Publish a heartbeat. Failure is logged but never fatal; a silent
    /// agent is exactly what the orchestrator's sweep is for.
    pub async fn heartbeat(&self, producer: &dyn ResultProducer) {
        let ping = ResultMessage::ping(self.id);
        if let Err(err) = producer.publish(&ping).await {
            warn!(agent_id = %self.id, %err, "can't send ping");
        }
    }

    /// Mark the agent terminated in the store and cancel its runtime.
    /// In-flight computations are abandoned for the liveness sweep.
    pub async fn terminate(&self) {
        if let Err(err) = self.agents.terminate(self.id).await {
            error!(agent_id = %self.id, %err, "can't terminate agent");
        }
        self.shutdown.cancel();
    }

    async fn sync_status(&self) -> Result<()> {
        let status = AgentStatus::derive(self.active(), self.capacity);
        self.agents
            .update_status(self.id, status)
            .await
            .context("can't update agent status")
    }
}
