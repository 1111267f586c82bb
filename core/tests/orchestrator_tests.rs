// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the orchestrator service: tokenization and
//! dispatch, result splicing under arbitrary interleavings, duplicate and
//! stale-delivery handling, and liveness recovery, all over the
//! in-memory store and broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use abacus_core::application::orchestrator::Orchestrator;
use abacus_core::domain::agent::{Agent, AgentId, AgentStatus};
use abacus_core::domain::broker::Consumer;
use abacus_core::domain::expression::{Expression, ExpressionStatus, UserId};
use abacus_core::domain::message::{ResultMessage, WorkMessage};
use abacus_core::domain::operation::Operator;
use abacus_core::domain::repository::{AgentRepository, ExpressionRepository};
use abacus_core::infrastructure::broker::{self, InMemoryConsumer};
use abacus_core::infrastructure::repositories::InMemoryStore;

struct Harness {
    store: Arc<InMemoryStore>,
    orchestrator: Orchestrator,
    work: InMemoryConsumer<WorkMessage>,
    shutdown: CancellationToken,
}

fn harness_with(inactive_agent: Duration, stale_expression: Duration) -> Harness {
    let store = Arc::new(InMemoryStore::with_default_operation_time(Duration::ZERO));
    let (work_tx, work_rx) = broker::queue::<WorkMessage>(64);
    let shutdown = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn ExpressionRepository>,
        Arc::clone(&store) as Arc<dyn AgentRepository>,
        Arc::new(work_tx),
        inactive_agent,
        stale_expression,
        shutdown.clone(),
    );
    Harness {
        store,
        orchestrator,
        work: work_rx,
        shutdown,
    }
}

fn harness() -> Harness {
    harness_with(Duration::from_secs(60), Duration::from_secs(600))
}

impl Harness {
    fn expressions(&self) -> &dyn ExpressionRepository {
        self.store.as_ref()
    }

    fn agents(&self) -> &dyn AgentRepository {
        self.store.as_ref()
    }

    /// Pull every currently queued work message.
    async fn drain_work(&mut self) -> Vec<WorkMessage> {
        let mut messages = Vec::new();
        while let Ok(Some(delivery)) =
            tokio::time::timeout(Duration::from_millis(50), self.work.recv()).await
        {
            messages.push(delivery.ack().await);
        }
        messages
    }

    /// Compute a token the way an agent would and report it back.
    async fn resolve(&self, msg: &WorkMessage) -> anyhow::Result<()> {
        let result = compute(&msg.token);
        self.orchestrator
            .handle_result(&ResultMessage {
                expression_id: msg.expression_id,
                token: msg.token.clone(),
                result,
                is_ping: false,
                agent_id: AgentId::new(),
                user_id: msg.user_id,
                generation: msg.generation,
            })
            .await
    }
}

fn compute(token: &str) -> i64 {
    let parts: Vec<&str> = token.split_whitespace().collect();
    let lhs: i64 = parts[0].parse().unwrap();
    let rhs: i64 = parts[1].parse().unwrap();
    Operator::parse(parts[2]).unwrap().apply(lhs, rhs).unwrap()
}

#[tokio::test]
async fn three_plus_four_times_five_reduces_to_23() {
    let mut h = harness();
    let user = UserId::new();

    let submitted = h.orchestrator.submit(user, "3+4*5").await.unwrap();
    assert_eq!(submitted.parse_data, "3 4 5 * +");
    assert_eq!(submitted.status, ExpressionStatus::Computing);

    // exactly one token is independent at first
    let work = h.drain_work().await;
    assert_eq!(work.len(), 1);
    assert_eq!(work[0].token, "4 5 *");
    h.resolve(&work[0]).await.unwrap();

    let stored = h.expressions().find_by_id(submitted.id).await.unwrap();
    assert_eq!(stored.parse_data, "3 20 +");

    // the splice made the final addition ready without a rescan
    let work = h.drain_work().await;
    assert_eq!(work.len(), 1);
    assert_eq!(work[0].token, "3 20 +");
    h.resolve(&work[0]).await.unwrap();

    let stored = h.expressions().find_by_id(submitted.id).await.unwrap();
    assert_eq!(stored.status, ExpressionStatus::Ready);
    assert_eq!(stored.result, Some(23));
    assert!(stored.parse_data.is_empty());
}

#[tokio::test]
async fn parallel_additions_converge_under_any_interleaving() {
    for reverse in [false, true] {
        let mut h = harness();
        let user = UserId::new();

        let submitted = h.orchestrator.submit(user, "1+1+2+2+3+3").await.unwrap();
        assert_eq!(submitted.parse_data, "1 1 + 2 2 + + 3 3 + +");

        // three independent additions dispatched by one add_task call
        let first_wave = h.drain_work().await;
        assert_eq!(
            first_wave
                .iter()
                .map(|m| m.token.as_str())
                .collect::<Vec<_>>(),
            vec!["1 1 +", "2 2 +", "3 3 +"]
        );

        let mut pending = first_wave;
        while !pending.is_empty() {
            if reverse {
                pending.reverse();
            }
            for msg in &pending {
                h.resolve(msg).await.unwrap();
            }
            pending = h.drain_work().await;
        }

        let stored = h.expressions().find_by_id(submitted.id).await.unwrap();
        assert_eq!(stored.status, ExpressionStatus::Ready, "reverse={reverse}");
        assert_eq!(stored.result, Some(12), "reverse={reverse}");
    }
}

#[tokio::test]
async fn duplicate_result_delivery_fails_without_corrupting_state() {
    let mut h = harness();
    let submitted = h.orchestrator.submit(UserId::new(), "3+4*5").await.unwrap();

    let work = h.drain_work().await;
    h.resolve(&work[0]).await.unwrap();
    let before = h.expressions().find_by_id(submitted.id).await.unwrap();
    assert_eq!(before.parse_data, "3 20 +");

    // the very same delivery arrives again
    let err = h.resolve(&work[0]).await.unwrap_err();
    assert!(err.to_string().contains("can't insert result"), "{err}");

    let after = h.expressions().find_by_id(submitted.id).await.unwrap();
    assert_eq!(after.parse_data, "3 20 +");
    assert_eq!(after.status, before.status);
}

#[tokio::test]
async fn stale_generation_results_are_discarded() {
    let mut h = harness();
    let submitted = h.orchestrator.submit(UserId::new(), "3+4*5").await.unwrap();
    let old_work = h.drain_work().await;
    assert_eq!(old_work[0].generation, 0);

    // the expression gets reclaimed and restarted under a new generation
    h.expressions().restart(submitted.id).await.unwrap();

    // the late result from the old epoch is dropped silently, not spliced
    h.resolve(&old_work[0]).await.unwrap();
    let stored = h.expressions().find_by_id(submitted.id).await.unwrap();
    assert_eq!(stored.parse_data, "3 4 5 * +");
    assert_eq!(stored.generation, 1);
    assert_eq!(stored.status, ExpressionStatus::Computing);
}

#[tokio::test]
async fn liveness_sweep_reclaims_exactly_the_dead_agents_work() {
    let mut h = harness();
    let user = UserId::new();

    let dead = Agent::new(5);
    let alive = Agent::new(5);
    h.agents().create(&dead).await.unwrap();
    h.agents().create(&alive).await.unwrap();
    h.agents()
        .update_last_ping(dead.id, Utc::now() - chrono::Duration::seconds(300))
        .await
        .unwrap();

    // two partially reduced expressions owned by the dead agent
    let mut owned = Vec::new();
    for parse_data in ["3 20 +", "1 1 + 4 +"] {
        let mut expr = Expression::new(user, "x".into(), parse_data.to_string());
        expr.mark_computing();
        expr.agent_id = Some(dead.id);
        h.expressions().create(&expr).await.unwrap();
        owned.push(expr);
    }
    let mut other = Expression::new(user, "y".into(), "7 8 *".to_string());
    other.mark_computing();
    other.agent_id = Some(alive.id);
    h.expressions().create(&other).await.unwrap();

    h.orchestrator.check_ping().await.unwrap();

    // exactly the dead agent was terminated
    let dead_record = h.agents().find_by_id(dead.id).await.unwrap();
    assert_eq!(dead_record.status, AgentStatus::Terminated);
    let alive_record = h.agents().find_by_id(alive.id).await.unwrap();
    assert_ne!(alive_record.status, AgentStatus::Terminated);

    // its expressions restarted from their last-known streams
    for expr in &owned {
        let restarted = h.expressions().find_by_id(expr.id).await.unwrap();
        assert_eq!(restarted.status, ExpressionStatus::Computing);
        assert_eq!(restarted.generation, 1);
        assert_eq!(restarted.parse_data, expr.parse_data);
        assert_eq!(restarted.agent_id, None);
    }
    let untouched = h.expressions().find_by_id(other.id).await.unwrap();
    assert_eq!(untouched.generation, 0);
    assert_eq!(untouched.agent_id, Some(alive.id));

    // and their tokens were re-published under the new generation
    let redispatched = h.drain_work().await;
    let mut tokens: Vec<&str> = redispatched.iter().map(|m| m.token.as_str()).collect();
    tokens.sort_unstable();
    assert_eq!(tokens, vec!["1 1 +", "3 20 +"]);
    assert!(redispatched.iter().all(|m| m.generation == 1));
}

#[tokio::test]
async fn reload_republishes_computing_survivors() {
    let mut h = harness();
    let user = UserId::new();

    let mut survivor = Expression::new(user, "3+4*5".into(), "3 4 5 * +".into());
    survivor.mark_computing();
    h.expressions().create(&survivor).await.unwrap();
    let mut done = Expression::new(user, "1+1".into(), "1 1 +".into());
    done.mark_ready(2);
    h.expressions().create(&done).await.unwrap();

    h.orchestrator.reload_computing_expressions().await.unwrap();

    let work = h.drain_work().await;
    assert_eq!(work.len(), 1);
    assert_eq!(work[0].expression_id, survivor.id);
    assert_eq!(work[0].token, "4 5 *");
    assert_eq!(work[0].generation, 1);
}

#[tokio::test]
async fn forgotten_expressions_are_redispatched() {
    let mut h = harness_with(Duration::from_secs(60), Duration::from_millis(10));

    let mut stuck = Expression::new(UserId::new(), "1+1".into(), "1 1 +".into());
    stuck.mark_computing();
    h.expressions().create(&stuck).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    h.orchestrator.find_forgotten_expressions().await.unwrap();

    let work = h.drain_work().await;
    assert_eq!(work.len(), 1);
    assert_eq!(work[0].expression_id, stuck.id);
    assert_eq!(work[0].generation, 1);
}

#[tokio::test]
async fn invalid_submission_mutates_nothing() {
    let h = harness();
    let user = UserId::new();

    for bad in ["3/0", "", "3++", "(3+4", "3+x"] {
        assert!(h.orchestrator.submit(user, bad).await.is_err(), "{bad:?}");
    }
    assert!(h.expressions().list_for_user(user).await.unwrap().is_empty());
    assert!(!h.shutdown.is_cancelled());
}

#[tokio::test]
async fn literal_submission_is_ready_immediately() {
    let mut h = harness();
    let submitted = h.orchestrator.submit(UserId::new(), "42").await.unwrap();
    assert_eq!(submitted.status, ExpressionStatus::Ready);
    assert_eq!(submitted.result, Some(42));

    let stored = h.expressions().find_by_id(submitted.id).await.unwrap();
    assert_eq!(stored.status, ExpressionStatus::Ready);
    assert!(h.drain_work().await.is_empty());
}

#[tokio::test]
async fn ping_updates_last_ping_only() {
    let h = harness();
    let agent = Agent::new(5);
    h.agents().create(&agent).await.unwrap();
    h.agents()
        .update_last_ping(agent.id, Utc::now() - chrono::Duration::seconds(500))
        .await
        .unwrap();

    h.orchestrator.handle_ping(agent.id).await.unwrap();

    let record = h.agents().find_by_id(agent.id).await.unwrap();
    assert!(Utc::now() - record.last_ping < chrono::Duration::seconds(5));
    assert_eq!(record.status, AgentStatus::Waiting);
}
