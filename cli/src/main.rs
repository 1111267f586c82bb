// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # ABACUS CLI
//!
//! The `abacus` binary runs the evaluator and talks to its store.
//!
//! ## Commands
//!
//! - `abacus run` - orchestrator plus a pool of agents in one process
//! - `abacus eval <expr>` - one-shot in-memory evaluation
//! - `abacus submit <expr>` - store an expression for a running daemon
//! - `abacus expressions|agents` - store listings
//! - `abacus operations list|set` - per-user operation durations

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use abacus_core::infrastructure::config::AbacusConfig;

mod commands;
mod embedded;

/// ABACUS - distributed arithmetic expression evaluator
#[derive(Parser)]
#[command(name = "abacus")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "ABACUS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ABACUS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator and a pool of agents in one process
    Run {
        /// Number of agents to start
        #[arg(long, default_value = "2")]
        agents: usize,

        /// Use the in-memory store instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },

    /// Evaluate one expression end-to-end and print the result
    Eval {
        /// Infix expression, e.g. "3+4*5"
        expression: String,

        /// Number of agents to start
        #[arg(long, default_value = "2")]
        agents: usize,

        /// Simulated execution time per operation, in milliseconds
        #[arg(long, default_value = "100")]
        op_millis: u64,

        /// Give up after this many seconds
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },

    /// Store an expression for a running daemon to pick up
    Submit {
        /// Infix expression, e.g. "3+4*5"
        expression: String,

        /// Owning user id (random if omitted)
        #[arg(long)]
        user: Option<uuid::Uuid>,
    },

    /// List a user's expressions
    Expressions {
        #[arg(long)]
        user: uuid::Uuid,
    },

    /// List registered agents
    Agents,

    /// Inspect or configure per-user operation durations
    Operations {
        #[command(subcommand)]
        command: commands::OperationsCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = AbacusConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { agents, in_memory } => embedded::run_daemon(&config, agents, in_memory).await,
        Commands::Eval {
            expression,
            agents,
            op_millis,
            timeout_secs,
        } => embedded::eval(&config, &expression, agents, op_millis, timeout_secs).await,
        Commands::Submit { expression, user } => {
            commands::submit(&config, &expression, user).await
        }
        Commands::Expressions { user } => commands::list_expressions(&config, user).await,
        Commands::Agents => commands::list_agents(&config).await,
        Commands::Operations { command } => commands::operations(&config, command).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
