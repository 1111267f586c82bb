// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # ABACUS Agent
//!
//! A capacity-bounded worker that claims atomic token computations from
//! the work queue, executes them after their configured duration, and
//! publishes results back, declining work it has no room for so the
//! broker redelivers it elsewhere.

pub mod agent;
pub mod computer;
pub mod app;

pub use agent::Agent;
pub use app::AgentApp;
