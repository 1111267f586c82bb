// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory store implementing all three repository traits behind one
//! struct, which keeps the liveness sweep's cross-aggregate transaction
//! trivially atomic. Used by the embedded mode and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::expression::{Expression, ExpressionId, ExpressionStatus, UserId};
use crate::domain::operation::{Operation, Operator};
use crate::domain::repository::{
    AgentRepository, ExpressionRepository, OperationRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryStore {
    expressions: parking_lot::Mutex<HashMap<ExpressionId, Expression>>,
    agents: parking_lot::Mutex<HashMap<AgentId, Agent>>,
    operations: parking_lot::Mutex<HashMap<(Operator, UserId), Operation>>,
    default_operation_time: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fall back to `duration` for `(operator, user)` pairs with no
    /// catalog entry, instead of failing the lookup.
    pub fn with_default_operation_time(duration: Duration) -> Self {
        Self {
            default_operation_time: Some(duration),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ExpressionRepository for InMemoryStore {
    async fn create(&self, expression: &Expression) -> Result<(), RepositoryError> {
        self.expressions
            .lock()
            .insert(expression.id, expression.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExpressionId) -> Result<Expression, RepositoryError> {
        self.expressions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Expression>, RepositoryError> {
        let mut rows: Vec<Expression> = self
            .expressions
            .lock()
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn update_parse_data(
        &self,
        id: ExpressionId,
        parse_data: &str,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.expressions.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row.parse_data = parse_data.to_string();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.expressions.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row.status = status;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn make_ready(&self, id: ExpressionId, result: i64) -> Result<(), RepositoryError> {
        let mut rows = self.expressions.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row.mark_ready(result);
        Ok(())
    }

    async fn assign_agent(
        &self,
        id: ExpressionId,
        agent_id: AgentId,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.expressions.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row.agent_id = Some(agent_id);
        Ok(())
    }

    async fn find_computing(&self) -> Result<Vec<Expression>, RepositoryError> {
        Ok(self
            .expressions
            .lock()
            .values()
            .filter(|e| e.status == ExpressionStatus::Computing)
            .cloned()
            .collect())
    }

    async fn find_terminated(&self) -> Result<Vec<Expression>, RepositoryError> {
        Ok(self
            .expressions
            .lock()
            .values()
            .filter(|e| e.status == ExpressionStatus::Terminated)
            .cloned()
            .collect())
    }

    async fn find_stale_computing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Expression>, RepositoryError> {
        Ok(self
            .expressions
            .lock()
            .values()
            .filter(|e| e.status == ExpressionStatus::Computing && e.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn restart(&self, id: ExpressionId) -> Result<Expression, RepositoryError> {
        let mut rows = self.expressions.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row.restart();
        Ok(row.clone())
    }
}

#[async_trait]
impl AgentRepository for InMemoryStore {
    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agents.lock().insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, RepositoryError> {
        self.agents
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let mut rows: Vec<Agent> = self.agents.lock().values().cloned().collect();
        rows.sort_by_key(|a| a.created_at);
        Ok(rows)
    }

    async fn update_status(&self, id: AgentId, status: AgentStatus) -> Result<(), RepositoryError> {
        let mut rows = self.agents.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))?;
        row.status = status;
        Ok(())
    }

    async fn update_last_ping(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.agents.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))?;
        row.last_ping = at;
        Ok(())
    }

    async fn increment_active(&self, id: AgentId) -> Result<(), RepositoryError> {
        let mut rows = self.agents.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))?;
        row.active += 1;
        Ok(())
    }

    async fn decrement_active(&self, id: AgentId) -> Result<(), RepositoryError> {
        let mut rows = self.agents.lock();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))?;
        row.active = row.active.saturating_sub(1);
        Ok(())
    }

    async fn terminate(&self, id: AgentId) -> Result<(), RepositoryError> {
        AgentRepository::update_status(self, id, AgentStatus::Terminated).await
    }

    async fn terminate_expired(
        &self,
        threshold: Duration,
    ) -> Result<Vec<AgentId>, RepositoryError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| RepositoryError::Unknown(e.to_string()))?;

        // both maps under lock for the duration of the sweep: the
        // in-memory analogue of the store transaction
        let mut agents = self.agents.lock();
        let mut expressions = self.expressions.lock();

        let mut reaped = Vec::new();
        for agent in agents.values_mut() {
            if agent.status != AgentStatus::Terminated && agent.last_ping < cutoff {
                agent.status = AgentStatus::Terminated;
                reaped.push(agent.id);
            }
        }

        if !reaped.is_empty() {
            for expression in expressions.values_mut() {
                if expression.status == ExpressionStatus::Computing
                    && expression.agent_id.is_some_and(|id| reaped.contains(&id))
                {
                    expression.mark_terminated();
                }
            }
        }

        Ok(reaped)
    }
}

#[async_trait]
impl OperationRepository for InMemoryStore {
    async fn execution_time(
        &self,
        operator: Operator,
        user_id: UserId,
    ) -> Result<Duration, RepositoryError> {
        if let Some(op) = self.operations.lock().get(&(operator, user_id)) {
            return Ok(op.execution_time);
        }
        self.default_operation_time.ok_or_else(|| {
            RepositoryError::NotFound(format!("operation {operator} for user {user_id}"))
        })
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Operation>, RepositoryError> {
        Ok(self
            .operations
            .lock()
            .values()
            .filter(|op| op.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_execution_time(
        &self,
        operator: Operator,
        user_id: UserId,
        duration: Duration,
    ) -> Result<(), RepositoryError> {
        self.operations.lock().insert(
            (operator, user_id),
            Operation {
                operator,
                user_id,
                execution_time: duration,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_expired_reaps_agent_and_its_expressions() {
        let store = InMemoryStore::new();

        let mut dead = Agent::new(5);
        dead.last_ping = Utc::now() - chrono::Duration::seconds(600);
        let alive = Agent::new(5);
        AgentRepository::create(&store, &dead).await.unwrap();
        AgentRepository::create(&store, &alive).await.unwrap();

        let user = UserId::new();
        let mut owned = Expression::new(user, "1+2".into(), "1 2 +".into());
        owned.mark_computing();
        owned.agent_id = Some(dead.id);
        let mut other = Expression::new(user, "3+4".into(), "3 4 +".into());
        other.mark_computing();
        other.agent_id = Some(alive.id);
        ExpressionRepository::create(&store, &owned).await.unwrap();
        ExpressionRepository::create(&store, &other).await.unwrap();

        let reaped = store
            .terminate_expired(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(reaped, vec![dead.id]);

        let owned = ExpressionRepository::find_by_id(&store, owned.id)
            .await
            .unwrap();
        assert_eq!(owned.status, ExpressionStatus::Terminated);
        let other = ExpressionRepository::find_by_id(&store, other.id)
            .await
            .unwrap();
        assert_eq!(other.status, ExpressionStatus::Computing);
    }

    #[tokio::test]
    async fn restart_bumps_generation() {
        let store = InMemoryStore::new();
        let expr = Expression::new(UserId::new(), "1+2".into(), "1 2 +".into());
        ExpressionRepository::create(&store, &expr).await.unwrap();

        let restarted = store.restart(expr.id).await.unwrap();
        assert_eq!(restarted.generation, 1);
        assert_eq!(restarted.status, ExpressionStatus::Computing);
    }

    #[tokio::test]
    async fn operation_lookup_falls_back_to_default() {
        let store = InMemoryStore::with_default_operation_time(Duration::from_millis(50));
        let got = store
            .execution_time(Operator::Add, UserId::new())
            .await
            .unwrap();
        assert_eq!(got, Duration::from_millis(50));

        let strict = InMemoryStore::new();
        assert!(strict
            .execution_time(Operator::Add, UserId::new())
            .await
            .is_err());
    }
}
