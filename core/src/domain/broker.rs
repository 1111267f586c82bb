// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Broker Capability Traits
//!
//! The orchestrator and agents never talk to a concrete broker client;
//! they hold these capabilities. Two logical unidirectional queues exist:
//! *work* (orchestrator → agents) and *results/pings* (agents →
//! orchestrator). Consumption is explicit-acknowledge, and a negative
//! acknowledge requests redelivery so a capacity-refused message is
//! retried by the broker instead of queued inside the agent.
//!
//! Publish failures are typed (`Retryable` vs `Fatal`) so the caller,
//! not the transport, decides the escalation path: one bounded retry,
//! then process-level cancellation.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::{ResultMessage, WorkMessage};

#[derive(Debug, Error)]
pub enum PublishError {
    /// Worth one reconnect-and-retry before giving up.
    #[error("transient publish failure: {0}")]
    Retryable(String),
    /// The message is lost; the process must not continue as if it wasn't.
    #[error("fatal publish failure: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait WorkProducer: Send + Sync {
    async fn publish(&self, msg: &WorkMessage) -> Result<(), PublishError>;

    /// Re-establish the underlying channel after a retryable failure.
    async fn reconnect(&self) -> Result<(), PublishError>;
}

#[async_trait]
pub trait ResultProducer: Send + Sync {
    async fn publish(&self, msg: &ResultMessage) -> Result<(), PublishError>;

    async fn reconnect(&self) -> Result<(), PublishError>;
}

/// Transport-side acknowledgement for one delivery.
#[async_trait]
pub trait DeliveryHandle: Send {
    async fn ack(self: Box<Self>);

    /// Negative acknowledge with redelivery requested.
    async fn nack_requeue(self: Box<Self>);
}

/// One consumed message plus its acknowledgement handle. Dropping a
/// delivery without acking counts as at-least-once slack: the in-memory
/// transport treats it as acked, a real broker would redeliver.
pub struct Delivery<M> {
    message: M,
    handle: Box<dyn DeliveryHandle>,
}

impl<M> Delivery<M> {
    pub fn new(message: M, handle: Box<dyn DeliveryHandle>) -> Self {
        Self { message, handle }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// Acknowledge and take ownership of the message.
    pub async fn ack(self) -> M {
        self.handle.ack().await;
        self.message
    }

    /// Hand the message back for redelivery.
    pub async fn nack_requeue(self) {
        self.handle.nack_requeue().await;
    }
}

#[async_trait]
pub trait Consumer<M: Send + 'static>: Send + Sync {
    /// Next delivery, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Delivery<M>>;
}

pub type WorkConsumer = Box<dyn Consumer<WorkMessage>>;
pub type ResultConsumer = Box<dyn Consumer<ResultMessage>>;
