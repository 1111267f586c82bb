// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedded runtime: the orchestrator daemon and a pool of agents wired
//! over the in-memory broker inside one process. The broker traits are
//! the seam where a networked deployment would substitute a real broker
//! client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use abacus_agent::AgentApp;
use abacus_core::application::daemon::OrchestratorDaemon;
use abacus_core::application::orchestrator::Orchestrator;
use abacus_core::domain::expression::{ExpressionId, ExpressionStatus, UserId};
use abacus_core::domain::message::{ResultMessage, WorkMessage};
use abacus_core::domain::repository::{
    AgentRepository, ExpressionRepository, OperationRepository,
};
use abacus_core::infrastructure::broker;
use abacus_core::infrastructure::config::AbacusConfig;
use abacus_core::infrastructure::db::Database;
use abacus_core::infrastructure::repositories::{
    InMemoryStore, PostgresAgentRepository, PostgresExpressionRepository,
    PostgresOperationRepository,
};
use abacus_core::infrastructure::worker_pool::WorkerPool;

pub struct EmbeddedSystem {
    pub orchestrator: Arc<Orchestrator>,
    pub expressions: Arc<dyn ExpressionRepository>,
    pub shutdown: CancellationToken,
    daemon: JoinHandle<Result<()>>,
    agents: Vec<JoinHandle<Result<()>>>,
}

pub struct EmbeddedOptions {
    pub agents: usize,
    pub in_memory: bool,
    /// Overrides the configured catalog fallback (used by `eval`).
    pub operation_time: Option<Duration>,
}

pub async fn start(config: &AbacusConfig, opts: EmbeddedOptions) -> Result<EmbeddedSystem> {
    let shutdown = CancellationToken::new();

    let (work_tx, work_rx) = broker::queue::<WorkMessage>(config.broker.work_queue_capacity);
    let (result_tx, result_rx) =
        broker::queue::<ResultMessage>(config.broker.result_queue_capacity);

    let operation_time = opts
        .operation_time
        .unwrap_or_else(|| config.default_operation_time());

    let (expressions, agents_repo, operations): (
        Arc<dyn ExpressionRepository>,
        Arc<dyn AgentRepository>,
        Arc<dyn OperationRepository>,
    ) = if opts.in_memory {
        let store = Arc::new(InMemoryStore::with_default_operation_time(operation_time));
        (store.clone(), store.clone(), store)
    } else {
        let db = Database::new(&config.database_url)
            .await
            .context("can't connect to database")?;
        db.migrate().await?;
        (
            Arc::new(PostgresExpressionRepository::new(db.pool().clone())),
            Arc::new(PostgresAgentRepository::new(db.pool().clone())),
            Arc::new(PostgresOperationRepository::new(db.pool().clone())),
        )
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&expressions),
        Arc::clone(&agents_repo),
        Arc::new(work_tx),
        config.inactive_agent_after(),
        config.stale_expression_after(),
        shutdown.clone(),
    ));

    let pool = WorkerPool::new(config.orchestrator.workers, config.orchestrator.queue_size)?;
    let daemon = OrchestratorDaemon::new(
        Arc::clone(&orchestrator),
        pool,
        Box::new(result_rx),
        config.sweep_interval(),
    );
    let daemon = tokio::spawn(daemon.run());

    let mut agents = Vec::with_capacity(opts.agents);
    for _ in 0..opts.agents.max(1) {
        let app = AgentApp::new(
            Arc::clone(&agents_repo),
            Arc::clone(&expressions),
            Arc::clone(&operations),
            Arc::new(result_tx.clone()),
            Box::new(work_rx.clone()),
            config.agent.capacity,
            config.ping_interval(),
            // child tokens: one dying agent must not stop the world,
            // while a process-wide cancel still reaches every agent
            shutdown.child_token(),
        )
        .await?;
        agents.push(tokio::spawn(app.run()));
    }

    info!(agents = agents.len(), "embedded system started");
    Ok(EmbeddedSystem {
        orchestrator,
        expressions,
        shutdown,
        daemon,
        agents,
    })
}

impl EmbeddedSystem {
    /// Poll the store until the expression settles or the timeout passes.
    pub async fn wait_for_result(&self, id: ExpressionId, timeout: Duration) -> Result<i64> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let row = self.expressions.find_by_id(id).await?;
            match row.status {
                ExpressionStatus::Ready => {
                    return row
                        .result
                        .context("expression ready without a result");
                }
                _ if tokio::time::Instant::now() >= deadline => {
                    bail!("expression {id} still {} after {:?}", row.status.as_str(), timeout);
                }
                _ => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        if let Err(err) = self.daemon.await {
            warn!(%err, "orchestrator task panicked");
        }
        for agent in self.agents {
            if let Err(err) = agent.await {
                warn!(%err, "agent task panicked");
            }
        }
        Ok(())
    }
}

/// `abacus run`: embedded daemon until ctrl-c.
pub async fn run_daemon(config: &AbacusConfig, agents: usize, in_memory: bool) -> Result<()> {
    let system = start(
        config,
        EmbeddedOptions {
            agents,
            in_memory,
            operation_time: None,
        },
    )
    .await?;

    println!(
        "{} orchestrator with {} agent(s); ctrl-c to stop",
        "running".green(),
        agents.max(1)
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = system.shutdown.cancelled() => {}
    }
    system.stop().await
}

/// `abacus eval`: one-shot in-memory evaluation.
pub async fn eval(
    config: &AbacusConfig,
    expression: &str,
    agents: usize,
    op_millis: u64,
    timeout_secs: u64,
) -> Result<()> {
    let system = start(
        config,
        EmbeddedOptions {
            agents,
            in_memory: true,
            operation_time: Some(Duration::from_millis(op_millis)),
        },
    )
    .await?;

    let submitted = match system
        .orchestrator
        .submit(UserId::new(), expression)
        .await
    {
        Ok(expression) => expression,
        Err(err) => {
            println!("{} {}", "invalid:".red(), err);
            system.stop().await?;
            return Ok(());
        }
    };

    let value = system
        .wait_for_result(submitted.id, Duration::from_secs(timeout_secs))
        .await?;
    println!("{} = {}", expression.trim(), value.to_string().green());

    system.stop().await
}
