// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Full-system tests: orchestrator daemon, worker pool, and real agents
//! wired over the in-memory broker. These exercise the whole dispatch →
//! compute → splice → re-dispatch cycle, including capacity backpressure
//! and the heartbeat protocol.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use abacus_agent::AgentApp;
use abacus_core::application::daemon::OrchestratorDaemon;
use abacus_core::application::orchestrator::Orchestrator;
use abacus_core::domain::agent::AgentStatus;
use abacus_core::domain::expression::{ExpressionId, ExpressionStatus, UserId};
use abacus_core::domain::message::{ResultMessage, WorkMessage};
use abacus_core::domain::repository::{
    AgentRepository, ExpressionRepository, OperationRepository,
};
use abacus_core::infrastructure::broker;
use abacus_core::infrastructure::repositories::InMemoryStore;
use abacus_core::infrastructure::worker_pool::WorkerPool;

struct SystemOptions {
    agents: usize,
    capacity: u32,
    operation_time: Duration,
    ping_interval: Duration,
    inactive_agent_after: Duration,
    sweep_interval: Duration,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            agents: 2,
            capacity: 5,
            operation_time: Duration::from_millis(10),
            ping_interval: Duration::from_secs(100),
            inactive_agent_after: Duration::from_secs(200),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct System {
    store: Arc<InMemoryStore>,
    orchestrator: Arc<Orchestrator>,
    shutdown: CancellationToken,
}

async fn start_system(opts: SystemOptions) -> System {
    let store = Arc::new(InMemoryStore::with_default_operation_time(
        opts.operation_time,
    ));
    let (work_tx, work_rx) = broker::queue::<WorkMessage>(64);
    let (result_tx, result_rx) = broker::queue::<ResultMessage>(64);
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store) as Arc<dyn ExpressionRepository>,
        Arc::clone(&store) as Arc<dyn AgentRepository>,
        Arc::new(work_tx),
        opts.inactive_agent_after,
        Duration::from_secs(600),
        shutdown.clone(),
    ));

    let pool = WorkerPool::new(5, 10).unwrap();
    let daemon = OrchestratorDaemon::new(
        Arc::clone(&orchestrator),
        pool,
        Box::new(result_rx),
        opts.sweep_interval,
    );
    tokio::spawn(daemon.run());

    for _ in 0..opts.agents {
        let app = AgentApp::new(
            Arc::clone(&store) as Arc<dyn AgentRepository>,
            Arc::clone(&store) as Arc<dyn ExpressionRepository>,
            Arc::clone(&store) as Arc<dyn OperationRepository>,
            Arc::new(result_tx.clone()),
            Box::new(work_rx.clone()),
            opts.capacity,
            opts.ping_interval,
            shutdown.child_token(),
        )
        .await
        .unwrap();
        tokio::spawn(app.run());
    }

    System {
        store,
        orchestrator,
        shutdown,
    }
}

impl System {
    async fn wait_ready(&self, id: ExpressionId, timeout: Duration) -> Result<i64> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let row = ExpressionRepository::find_by_id(self.store.as_ref(), id).await?;
            if row.status == ExpressionStatus::Ready {
                return row.result.ok_or_else(|| anyhow::anyhow!("ready without result"));
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("expression still {} after {timeout:?}", row.status.as_str());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn evaluates_mixed_precedence_end_to_end() {
    let system = start_system(SystemOptions::default()).await;

    let submitted = system
        .orchestrator
        .submit(UserId::new(), "3+4*5")
        .await
        .unwrap();
    let value = system
        .wait_ready(submitted.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(value, 23);

    system.shutdown.cancel();
}

#[tokio::test]
async fn parallel_additions_with_a_single_saturated_agent() {
    // one agent with capacity 1: two of the three dispatched tokens must
    // be declined and redelivered until the slot frees up
    let system = start_system(SystemOptions {
        agents: 1,
        capacity: 1,
        ..SystemOptions::default()
    })
    .await;

    let submitted = system
        .orchestrator
        .submit(UserId::new(), "1+1+2+2+3+3")
        .await
        .unwrap();
    let value = system
        .wait_ready(submitted.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(value, 12);

    system.shutdown.cancel();
}

#[tokio::test]
async fn several_expressions_share_the_agent_pool() {
    let system = start_system(SystemOptions::default()).await;
    let user = UserId::new();

    let cases = [
        ("(3+4)*5-6/2", 32),
        ("-3+4*5", 17),
        ("2*3+4*5", 26),
        ("10-2-3", 5),
    ];
    let mut ids = Vec::new();
    for (text, _) in &cases {
        ids.push(system.orchestrator.submit(user, text).await.unwrap().id);
    }
    for (id, (text, want)) in ids.into_iter().zip(cases) {
        let value = system.wait_ready(id, Duration::from_secs(10)).await.unwrap();
        assert_eq!(value, want, "{text}");
    }

    system.shutdown.cancel();
}

#[tokio::test]
async fn heartbeats_keep_a_slow_agent_alive() {
    // the computation outlives the inactivity threshold; only the
    // heartbeat keeps the agent from being reaped mid-flight
    let system = start_system(SystemOptions {
        agents: 1,
        operation_time: Duration::from_millis(600),
        ping_interval: Duration::from_millis(50),
        inactive_agent_after: Duration::from_millis(300),
        sweep_interval: Duration::from_millis(100),
        ..SystemOptions::default()
    })
    .await;

    let submitted = system
        .orchestrator
        .submit(UserId::new(), "3+4*5")
        .await
        .unwrap();
    let value = system
        .wait_ready(submitted.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(value, 23);

    // the expression never went through a reclaim cycle
    let row = ExpressionRepository::find_by_id(system.store.as_ref(), submitted.id)
        .await
        .unwrap();
    assert_eq!(row.generation, 0);

    let agents = AgentRepository::list_all(system.store.as_ref()).await.unwrap();
    assert_eq!(agents.len(), 1);
    assert_ne!(agents[0].status, AgentStatus::Terminated);

    system.shutdown.cancel();
}

#[tokio::test]
async fn dead_agent_work_is_reclaimed_and_finished_elsewhere() {
    // agent A claims the token, then goes silent without completing;
    // the sweep reaps it and the restarted dispatch lands on agent B
    let store = Arc::new(InMemoryStore::with_default_operation_time(
        Duration::from_millis(20),
    ));
    let (work_tx, work_rx) = broker::queue::<WorkMessage>(64);
    let (result_tx, result_rx) = broker::queue::<ResultMessage>(64);
    let shutdown = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store) as Arc<dyn ExpressionRepository>,
        Arc::clone(&store) as Arc<dyn AgentRepository>,
        Arc::new(work_tx),
        Duration::from_millis(200),
        Duration::from_secs(600),
        shutdown.clone(),
    ));
    let pool = WorkerPool::new(5, 10).unwrap();
    let daemon = OrchestratorDaemon::new(
        Arc::clone(&orchestrator),
        pool,
        Box::new(result_rx),
        Duration::from_millis(100),
    );
    tokio::spawn(daemon.run());

    // agent A: capacity 1 and an operation catalog so slow it will never
    // finish, with heartbeats effectively disabled; destined to look dead
    let agent_a = AgentApp::new(
        Arc::clone(&store) as Arc<dyn AgentRepository>,
        Arc::clone(&store) as Arc<dyn ExpressionRepository>,
        Arc::new(InMemoryStore::with_default_operation_time(Duration::from_secs(3600)))
            as Arc<dyn OperationRepository>,
        Arc::new(result_tx.clone()),
        Box::new(work_rx.clone()),
        1,
        Duration::from_secs(3600),
        shutdown.child_token(),
    )
    .await
    .unwrap();
    let a_id = agent_a.agent().id();
    tokio::spawn(agent_a.run());

    let submitted = orchestrator.submit(UserId::new(), "3+4*5").await.unwrap();

    // wait until A has claimed the expression
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let row = ExpressionRepository::find_by_id(store.as_ref(), submitted.id)
            .await
            .unwrap();
        if row.agent_id == Some(a_id) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "agent A never claimed the expression"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // B arrives with a sane catalog and real heartbeats
    let agent_b = AgentApp::new(
        Arc::clone(&store) as Arc<dyn AgentRepository>,
        Arc::clone(&store) as Arc<dyn ExpressionRepository>,
        Arc::clone(&store) as Arc<dyn OperationRepository>,
        Arc::new(result_tx.clone()),
        Box::new(work_rx.clone()),
        5,
        Duration::from_millis(50),
        shutdown.child_token(),
    )
    .await
    .unwrap();
    tokio::spawn(agent_b.run());

    // the sweep reaps A (its registration ping ages past the threshold),
    // restarts the expression, and B finishes it
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let value = loop {
        let row = ExpressionRepository::find_by_id(store.as_ref(), submitted.id)
            .await
            .unwrap();
        if row.status == ExpressionStatus::Ready {
            break row.result.unwrap();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expression never recovered from the dead agent"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(value, 23);

    let reaped = AgentRepository::find_by_id(store.as_ref(), a_id)
        .await
        .unwrap();
    assert_eq!(reaped.status, AgentStatus::Terminated);

    let row = ExpressionRepository::find_by_id(store.as_ref(), submitted.id)
        .await
        .unwrap();
    assert!(row.generation >= 1);

    shutdown.cancel();
}
