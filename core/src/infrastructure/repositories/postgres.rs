// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Repositories
//!
//! Production implementations of the store contracts backed by the
//! `expressions`, `agents` and `operations` tables via `sqlx`. The
//! liveness sweep (`terminate_expired`) runs its two updates inside one
//! transaction, which is the atomicity the orchestrator relies on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::expression::{Expression, ExpressionId, ExpressionStatus, UserId};
use crate::domain::operation::{Operation, Operator};
use crate::domain::repository::{
    AgentRepository, ExpressionRepository, OperationRepository, RepositoryError,
};

pub struct PostgresExpressionRepository {
    pool: PgPool,
}

impl PostgresExpressionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_expression(row: &sqlx::postgres::PgRow) -> Result<Expression, RepositoryError> {
    let status_str: String = row.get("status");
    let status = ExpressionStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown status: {status_str}")))?;
    let agent_id: Option<uuid::Uuid> = row.get("agent_id");

    Ok(Expression {
        id: ExpressionId(row.get("id")),
        user_id: UserId(row.get("user_id")),
        data: row.get("data"),
        parse_data: row.get("parse_data"),
        status,
        result: row.get("result"),
        generation: row.get("generation"),
        agent_id: agent_id.map(AgentId),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ExpressionRepository for PostgresExpressionRepository {
    async fn create(&self, expression: &Expression) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO expressions (
                id, user_id, data, parse_data, status, result,
                generation, agent_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(expression.id.0)
        .bind(expression.user_id.0)
        .bind(&expression.data)
        .bind(&expression.parse_data)
        .bind(expression.status.as_str())
        .bind(expression.result)
        .bind(expression.generation)
        .bind(expression.agent_id.map(|a| a.0))
        .bind(expression.created_at)
        .bind(expression.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: ExpressionId) -> Result<Expression, RepositoryError> {
        let row = sqlx::query("SELECT * FROM expressions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row_to_expression(&row)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Expression>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM expressions WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_expression).collect()
    }

    async fn update_parse_data(
        &self,
        id: ExpressionId,
        parse_data: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE expressions SET parse_data = $2, updated_at = $3 WHERE id = $1")
            .bind(id.0)
            .bind(parse_data)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE expressions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn make_ready(&self, id: ExpressionId, result: i64) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE expressions
            SET status = 'ready', result = $2, parse_data = '', updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_agent(
        &self,
        id: ExpressionId,
        agent_id: AgentId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE expressions SET agent_id = $2 WHERE id = $1")
            .bind(id.0)
            .bind(agent_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_computing(&self) -> Result<Vec<Expression>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM expressions WHERE status = 'computing'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_expression).collect()
    }

    async fn find_terminated(&self) -> Result<Vec<Expression>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM expressions WHERE status = 'terminated'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_expression).collect()
    }

    async fn find_stale_computing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Expression>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM expressions WHERE status = 'computing' AND updated_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_expression).collect()
    }

    async fn restart(&self, id: ExpressionId) -> Result<Expression, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE expressions
            SET status = 'computing', generation = generation + 1,
                agent_id = NULL, updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("expression {id}")))?;
        row_to_expression(&row)
    }
}

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_agent(row: &sqlx::postgres::PgRow) -> Result<Agent, RepositoryError> {
    let status_str: String = row.get("status");
    let status = AgentStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Serialization(format!("unknown status: {status_str}")))?;
    let capacity: i32 = row.get("capacity");
    let active: i32 = row.get("active");

    Ok(Agent {
        id: AgentId(row.get("id")),
        capacity: capacity.max(0) as u32,
        active: active.max(0) as u32,
        status,
        last_ping: row.get("last_ping"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, capacity, active, status, last_ping, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(agent.id.0)
        .bind(agent.capacity as i32)
        .bind(agent.active as i32)
        .bind(agent.status.as_str())
        .bind(agent.last_ping)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, RepositoryError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {id}")))?;
        row_to_agent(&row)
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn update_status(&self, id: AgentId, status: AgentStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET status = $2 WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_last_ping(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET last_ping = $2 WHERE id = $1")
            .bind(id.0)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_active(&self, id: AgentId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET active = active + 1 WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn decrement_active(&self, id: AgentId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET active = GREATEST(active - 1, 0) WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn terminate(&self, id: AgentId) -> Result<(), RepositoryError> {
        self.update_status(id, AgentStatus::Terminated).await
    }

    async fn terminate_expired(
        &self,
        threshold: Duration,
    ) -> Result<Vec<AgentId>, RepositoryError> {
        let window = chrono::Duration::from_std(threshold)
            .map_err(|e| RepositoryError::Unknown(e.to_string()))?;
        let cutoff = Utc::now() - window;

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'terminated'
            WHERE last_ping < $1 AND status != 'terminated'
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let reaped: Vec<uuid::Uuid> = rows.iter().map(|row| row.get("id")).collect();

        if !reaped.is_empty() {
            sqlx::query(
                r#"
                UPDATE expressions
                SET status = 'terminated', updated_at = $2
                WHERE agent_id = ANY($1) AND status = 'computing'
                "#,
            )
            .bind(&reaped)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(reaped.into_iter().map(AgentId).collect())
    }
}

pub struct PostgresOperationRepository {
    pool: PgPool,
}

impl PostgresOperationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OperationRepository for PostgresOperationRepository {
    async fn execution_time(
        &self,
        operator: Operator,
        user_id: UserId,
    ) -> Result<Duration, RepositoryError> {
        let row = sqlx::query(
            "SELECT execution_time_ms FROM operations WHERE operator = $1 AND user_id = $2",
        )
        .bind(operator.as_str())
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::NotFound(format!("operation {operator} for user {user_id}"))
        })?;
        let millis: i64 = row.get("execution_time_ms");
        Ok(Duration::from_millis(millis.max(0) as u64))
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Operation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT operator, user_id, execution_time_ms, updated_at FROM operations WHERE user_id = $1",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let operator_str: String = row.get("operator");
                let operator = Operator::parse(&operator_str)
                    .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
                let millis: i64 = row.get("execution_time_ms");
                Ok(Operation {
                    operator,
                    user_id: UserId(row.get("user_id")),
                    execution_time: Duration::from_millis(millis.max(0) as u64),
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }

    async fn set_execution_time(
        &self,
        operator: Operator,
        user_id: UserId,
        duration: Duration,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO operations (operator, user_id, execution_time_ms, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (operator, user_id) DO UPDATE SET
                execution_time_ms = EXCLUDED.execution_time_ms,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(operator.as_str())
        .bind(user_id.0)
        .bind(duration.as_millis() as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
