// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store-backed subcommands: thin wrappers over the repositories. The
//! heavy lifting lives in the running daemon; these only read and write
//! rows.

use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use colored::Colorize;

use abacus_core::domain::expression::{Expression, UserId};
use abacus_core::domain::operation::Operator;
use abacus_core::domain::repository::{
    AgentRepository, ExpressionRepository, OperationRepository,
};
use abacus_core::infrastructure::config::AbacusConfig;
use abacus_core::infrastructure::db::Database;
use abacus_core::infrastructure::repositories::{
    PostgresAgentRepository, PostgresExpressionRepository, PostgresOperationRepository,
};
use abacus_core::parser;

#[derive(Subcommand)]
pub enum OperationsCommand {
    /// Show a user's configured operation durations
    List {
        #[arg(long)]
        user: uuid::Uuid,
    },
    /// Set the duration of one operator for one user
    Set {
        #[arg(long)]
        user: uuid::Uuid,

        /// One of + - * /
        #[arg(long)]
        operator: String,

        #[arg(long)]
        seconds: u64,
    },
}

async fn database(config: &AbacusConfig) -> Result<Database> {
    let db = Database::new(&config.database_url).await?;
    db.migrate().await?;
    Ok(db)
}

/// Parse and store an expression in `computing` state. A running daemon
/// picks it up through its stale-expression sweep.
pub async fn submit(
    config: &AbacusConfig,
    expression: &str,
    user: Option<uuid::Uuid>,
) -> Result<()> {
    let db = database(config).await?;
    let expressions = PostgresExpressionRepository::new(db.pool().clone());
    let operations = PostgresOperationRepository::new(db.pool().clone());

    let user_id = user.map(UserId).unwrap_or_default();
    let postfix = parser::parse_expression(expression)?;

    // first submission for a user seeds its operation catalog
    if operations.list_for_user(user_id).await?.is_empty() {
        for operator in [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div] {
            operations
                .set_execution_time(operator, user_id, config.default_operation_time())
                .await?;
        }
    }

    let mut row = Expression::new(user_id, expression.trim().to_string(), postfix.clone());

    if parser::is_integer_literal(&postfix) {
        let value: i64 = postfix
            .parse()
            .map_err(|_| anyhow!("literal out of range: {postfix}"))?;
        row.mark_ready(value);
        expressions.create(&row).await?;
        println!("{} {} = {}", "ready".green(), row.id, value);
        return Ok(());
    }

    row.mark_computing();
    expressions.create(&row).await?;
    println!(
        "{} {} (user {})",
        "submitted".green(),
        row.id,
        row.user_id
    );
    Ok(())
}

pub async fn list_expressions(config: &AbacusConfig, user: uuid::Uuid) -> Result<()> {
    let db = database(config).await?;
    let expressions = PostgresExpressionRepository::new(db.pool().clone());

    let rows = expressions.list_for_user(UserId(user)).await?;
    if rows.is_empty() {
        println!("{}", "no expressions".yellow());
        return Ok(());
    }
    for row in rows {
        let result = row
            .result
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<22}  {:<12}  result={}  updated={}",
            row.id,
            row.data,
            row.status.as_str(),
            result,
            row.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

pub async fn list_agents(config: &AbacusConfig) -> Result<()> {
    let db = database(config).await?;
    let agents = PostgresAgentRepository::new(db.pool().clone());

    let rows = agents.list_all().await?;
    if rows.is_empty() {
        println!("{}", "no agents".yellow());
        return Ok(());
    }
    for row in rows {
        println!(
            "{}  {:<10}  {}/{}  last_ping={}",
            row.id,
            row.status.as_str(),
            row.active,
            row.capacity,
            row.last_ping.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

pub async fn operations(config: &AbacusConfig, command: OperationsCommand) -> Result<()> {
    let db = database(config).await?;
    let operations = PostgresOperationRepository::new(db.pool().clone());

    match command {
        OperationsCommand::List { user } => {
            let rows = operations.list_for_user(UserId(user)).await?;
            if rows.is_empty() {
                println!("{}", "no configured operations".yellow());
                return Ok(());
            }
            for row in rows {
                println!("{}  {:?}", row.operator, row.execution_time);
            }
        }
        OperationsCommand::Set {
            user,
            operator,
            seconds,
        } => {
            let operator = Operator::parse(&operator)?;
            operations
                .set_execution_time(operator, UserId(user), Duration::from_secs(seconds))
                .await?;
            println!("{} {} -> {}s", "updated".green(), operator, seconds);
        }
    }
    Ok(())
}
