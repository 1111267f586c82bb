// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one repository per aggregate root, defined in
//! the domain layer and implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ExpressionRepository` | `Expression` | `InMemoryExpressionRepository`, `PostgresExpressionRepository` |
//! | `AgentRepository` | `Agent` | `InMemoryAgentRepository`, `PostgresAgentRepository` |
//! | `OperationRepository` | `Operation` | `InMemoryOperationRepository`, `PostgresOperationRepository` |
//!
//! The store is also the serialization point for concurrent splices: the
//! per-row update semantics of `update_parse_data` are what keep two
//! result arrivals for one expression from racing on its stream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{Agent, AgentId, AgentStatus};
use crate::domain::expression::{Expression, ExpressionId, ExpressionStatus, UserId};
use crate::domain::operation::{Operation, Operator};

/// Repository interface for Expression aggregates.
#[async_trait]
pub trait ExpressionRepository: Send + Sync {
    async fn create(&self, expression: &Expression) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ExpressionId) -> Result<Expression, RepositoryError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Expression>, RepositoryError>;

    /// Persist a spliced stream. The row-level update is the serialization
    /// point for concurrent result arrivals on one expression.
    async fn update_parse_data(
        &self,
        id: ExpressionId,
        parse_data: &str,
    ) -> Result<(), RepositoryError>;

    async fn update_status(
        &self,
        id: ExpressionId,
        status: ExpressionStatus,
    ) -> Result<(), RepositoryError>;

    /// Terminal success: sets `ready`, stores the result, clears the stream.
    async fn make_ready(&self, id: ExpressionId, result: i64) -> Result<(), RepositoryError>;

    async fn assign_agent(
        &self,
        id: ExpressionId,
        agent_id: AgentId,
    ) -> Result<(), RepositoryError>;

    /// Expressions still `computing` (crash survivors, candidates for
    /// reload on orchestrator startup).
    async fn find_computing(&self) -> Result<Vec<Expression>, RepositoryError>;

    /// Expressions abandoned by a terminated agent, eligible for restart.
    async fn find_terminated(&self) -> Result<Vec<Expression>, RepositoryError>;

    /// Expressions `computing` but untouched since `cutoff` (forgotten
    /// work, e.g. a result lost between agent and orchestrator).
    async fn find_stale_computing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Expression>, RepositoryError>;

    /// Re-enter `computing` under a bumped generation; returns the updated
    /// row so the caller can dispatch from its current `parse_data`.
    async fn restart(&self, id: ExpressionId) -> Result<Expression, RepositoryError>;
}

/// Repository interface for Agent aggregates.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn create(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AgentId) -> Result<Agent, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError>;

    async fn update_status(&self, id: AgentId, status: AgentStatus)
        -> Result<(), RepositoryError>;

    async fn update_last_ping(
        &self,
        id: AgentId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn increment_active(&self, id: AgentId) -> Result<(), RepositoryError>;

    async fn decrement_active(&self, id: AgentId) -> Result<(), RepositoryError>;

    async fn terminate(&self, id: AgentId) -> Result<(), RepositoryError>;

    /// Liveness sweep: mark every agent whose `last_ping` is older than
    /// `threshold` as terminated AND mark all expressions assigned to those
    /// agents as terminated, atomically in one store transaction. Returns
    /// the ids of the agents that were reaped.
    async fn terminate_expired(
        &self,
        threshold: Duration,
    ) -> Result<Vec<AgentId>, RepositoryError>;
}

/// Repository interface for the per-user operation catalog.
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Configured execution duration for `(operator, user)`.
    async fn execution_time(
        &self,
        operator: Operator,
        user_id: UserId,
    ) -> Result<Duration, RepositoryError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Operation>, RepositoryError>;

    async fn set_execution_time(
        &self,
        operator: Operator,
        user_id: UserId,
        duration: Duration,
    ) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
