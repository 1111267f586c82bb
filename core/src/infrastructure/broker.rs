// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Queue
//!
//! Channel-backed implementation of the broker capability traits:
//! bounded unicast delivery with explicit acknowledge and
//! negative-acknowledge-with-redelivery. Backs the embedded
//! single-process mode and every test; a real broker client would
//! implement the same traits at the process boundary.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::broker::{
    Consumer, Delivery, DeliveryHandle, PublishError, ResultProducer, WorkProducer,
};
use crate::domain::message::{ResultMessage, WorkMessage};

/// Create one bounded queue. Producers and consumers both clone freely;
/// cloned consumers compete for messages the way multiple agents compete
/// for work on a shared broker queue.
pub fn queue<M: Clone + Send + 'static>(
    capacity: usize,
) -> (InMemoryProducer<M>, InMemoryConsumer<M>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        InMemoryProducer { tx: tx.clone() },
        InMemoryConsumer {
            rx: std::sync::Arc::new(tokio::sync::Mutex::new(rx)),
            tx,
        },
    )
}

#[derive(Clone)]
pub struct InMemoryProducer<M> {
    tx: mpsc::Sender<M>,
}

impl<M: Clone + Send + 'static> InMemoryProducer<M> {
    async fn send(&self, msg: &M) -> Result<(), PublishError> {
        self.tx
            .send(msg.clone())
            .await
            .map_err(|_| PublishError::Fatal("queue closed".to_string()))
    }
}

#[async_trait]
impl WorkProducer for InMemoryProducer<WorkMessage> {
    async fn publish(&self, msg: &WorkMessage) -> Result<(), PublishError> {
        self.send(msg).await
    }

    async fn reconnect(&self) -> Result<(), PublishError> {
        // a channel has no connection to re-establish
        Ok(())
    }
}

#[async_trait]
impl ResultProducer for InMemoryProducer<ResultMessage> {
    async fn publish(&self, msg: &ResultMessage) -> Result<(), PublishError> {
        self.send(msg).await
    }

    async fn reconnect(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

pub struct InMemoryConsumer<M> {
    rx: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<M>>>,
    /// Requeue side for negative acknowledgements.
    tx: mpsc::Sender<M>,
}

impl<M> Clone for InMemoryConsumer<M> {
    fn clone(&self) -> Self {
        Self {
            rx: std::sync::Arc::clone(&self.rx),
            tx: self.tx.clone(),
        }
    }
}

/// Throttle between a capacity refusal and redelivery, standing in for a
/// real broker's redelivery latency so a full agent cannot hot-spin on
/// its own nacked message.
const REDELIVERY_DELAY: std::time::Duration = std::time::Duration::from_millis(25);

struct InMemoryDeliveryHandle<M> {
    requeue: Option<(mpsc::Sender<M>, M)>,
}

#[async_trait]
impl<M: Send + 'static> DeliveryHandle for InMemoryDeliveryHandle<M> {
    async fn ack(self: Box<Self>) {}

    async fn nack_requeue(mut self: Box<Self>) {
        if let Some((tx, msg)) = self.requeue.take() {
            tokio::time::sleep(REDELIVERY_DELAY).await;
            // the consumer just freed a slot, so this cannot deadlock
            let _ = tx.send(msg).await;
        }
    }
}

#[async_trait]
impl<M: Clone + Send + 'static> Consumer<M> for InMemoryConsumer<M> {
    async fn recv(&mut self) -> Option<Delivery<M>> {
        let msg = {
            let mut rx = self.rx.lock().await;
            rx.recv().await?
        };
        let handle = InMemoryDeliveryHandle {
            requeue: Some((self.tx.clone(), msg.clone())),
        };
        Some(Delivery::new(msg, Box::new(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;

    #[tokio::test]
    async fn publish_then_consume() {
        let (producer, mut consumer) = queue::<ResultMessage>(8);
        let msg = ResultMessage::ping(AgentId::new());
        ResultProducer::publish(&producer, &msg).await.unwrap();

        let delivery = consumer.recv().await.unwrap();
        assert_eq!(delivery.message(), &msg);
        let taken = delivery.ack().await;
        assert_eq!(taken, msg);
    }

    #[tokio::test]
    async fn nack_redelivers_the_message() {
        let (producer, mut consumer) = queue::<ResultMessage>(8);
        let msg = ResultMessage::ping(AgentId::new());
        ResultProducer::publish(&producer, &msg).await.unwrap();

        let delivery = consumer.recv().await.unwrap();
        delivery.nack_requeue().await;

        let redelivered = consumer.recv().await.unwrap();
        assert_eq!(redelivered.message(), &msg);
    }

    #[tokio::test]
    async fn cloned_consumers_compete_for_messages() {
        let (producer, consumer_a) = queue::<ResultMessage>(8);
        let mut consumer_b = consumer_a.clone();
        let mut consumer_a = consumer_a;

        let first = ResultMessage::ping(AgentId::new());
        let second = ResultMessage::ping(AgentId::new());
        ResultProducer::publish(&producer, &first).await.unwrap();
        ResultProducer::publish(&producer, &second).await.unwrap();

        let got_a = consumer_a.recv().await.unwrap().ack().await;
        let got_b = consumer_b.recv().await.unwrap().ack().await;
        // each message is delivered exactly once across the group
        assert_ne!(got_a.agent_id, got_b.agent_id);
        assert!(got_a == first || got_a == second);
        assert!(got_b == first || got_b == second);
    }

    #[tokio::test]
    async fn publish_to_closed_queue_is_fatal() {
        let (producer, consumer) = queue::<ResultMessage>(8);
        drop(consumer);
        let err = ResultProducer::publish(&producer, &ResultMessage::ping(AgentId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Fatal(_)));
    }
}
