// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod broker;
pub mod config;
pub mod db;
pub mod repositories;
pub mod worker_pool;
