// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Operation Catalog
//!
//! Maps an operator to a per-user execution duration. The catalog bounds
//! the simulated cost of each atomic computation; agents look entries up
//! by `(operator, user)` before scheduling a token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::expression::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ComputeError> {
        match s {
            "+" => Ok(Operator::Add),
            "-" => Ok(Operator::Sub),
            "*" => Ok(Operator::Mul),
            "/" => Ok(Operator::Div),
            other => Err(ComputeError::UnknownOperator(other.to_string())),
        }
    }

    /// Apply the binary operation. Division by a literal zero is rejected
    /// at parse time, but a computed zero divisor can still reach an agent
    /// (`4/(2-2)`), so division stays checked here.
    pub fn apply(&self, lhs: i64, rhs: i64) -> Result<i64, ComputeError> {
        match self {
            Operator::Add => lhs.checked_add(rhs).ok_or(ComputeError::Overflow),
            Operator::Sub => lhs.checked_sub(rhs).ok_or(ComputeError::Overflow),
            Operator::Mul => lhs.checked_mul(rhs).ok_or(ComputeError::Overflow),
            Operator::Div => {
                if rhs == 0 {
                    Err(ComputeError::DivisionByZero)
                } else {
                    lhs.checked_div(rhs).ok_or(ComputeError::Overflow)
                }
            }
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry: how long `operator` takes for `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub operator: Operator,
    pub user_id: UserId,
    pub execution_time: Duration,
    pub updated_at: DateTime<Utc>,
}
