// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Worker Pool
//!
//! A fixed-size pool of executors draining a single bounded task queue.
//! Decouples message arrival rate from processing rate without unbounded
//! task growth. `start` and `stop` are both idempotent; work submitted
//! after `stop` is dropped, so callers must not submit after shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One unit of pool work. A failing `execute` triggers `on_failure`,
/// which in this system escalates to orchestrator shutdown rather than a
/// silent retry: an unprocessed result message would stall its
/// expression indefinitely.
#[async_trait]
pub trait PoolTask: Send {
    async fn execute(&mut self) -> anyhow::Result<()>;
    async fn on_failure(&mut self, error: anyhow::Error);
}

struct PoolState {
    sender: Option<mpsc::Sender<Box<dyn PoolTask>>>,
    receiver: Option<mpsc::Receiver<Box<dyn PoolTask>>>,
    workers: Vec<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

pub struct WorkerPool {
    num_workers: usize,
    state: parking_lot::Mutex<PoolState>,
}

impl WorkerPool {
    /// `queue_size` bounds how many tasks may wait before `add_work`
    /// applies backpressure.
    pub fn new(num_workers: usize, queue_size: usize) -> anyhow::Result<Self> {
        if num_workers == 0 {
            anyhow::bail!("worker pool needs at least one worker");
        }
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        Ok(Self {
            num_workers,
            state: parking_lot::Mutex::new(PoolState {
                sender: Some(sender),
                receiver: Some(receiver),
                workers: Vec::new(),
                started: false,
                stopped: false,
            }),
        })
    }

    /// Spin up exactly `num_workers` executors. Subsequent calls are
    /// no-ops.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.started {
            return;
        }
        state.started = true;

        let receiver = match state.receiver.take() {
            Some(receiver) => Arc::new(tokio::sync::Mutex::new(receiver)),
            None => return,
        };

        for _ in 0..self.num_workers {
            let receiver = Arc::clone(&receiver);
            state.workers.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    match task {
                        Some(mut task) => {
                            if let Err(err) = task.execute().await {
                                task.on_failure(err).await;
                            }
                        }
                        None => break,
                    }
                }
            }));
        }
    }

    /// Submit a task. Applies backpressure when the queue is full and
    /// silently drops the task once the pool has stopped.
    pub async fn add_work(&self, task: Box<dyn PoolTask>) {
        let sender = {
            let state = self.state.lock();
            if state.stopped {
                None
            } else {
                state.sender.clone()
            }
        };
        match sender {
            Some(sender) => {
                if sender.send(task).await.is_err() {
                    warn!("worker pool queue closed, dropping task");
                }
            }
            None => debug!("worker pool stopped, dropping task"),
        }
    }

    /// Close the queue and wait for every executor to drain. Subsequent
    /// calls are no-ops.
    pub async fn stop(&self) {
        let workers = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.sender.take();
            std::mem::take(&mut state.workers)
        };
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(%err, "pool worker panicked");
            }
        }
    }
}
