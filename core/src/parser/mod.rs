// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Expression Parser
//!
//! Pure function library turning user infix text into the postfix token
//! stream the orchestrator reduces. No I/O, no concurrency.
//!
//! Pipeline: strip spaces → validity scan → unary-sign normalization
//! (`-3` becomes `0-3`) → pairwise additive re-bracketing (so independent
//! `+` pairs can be dispatched in parallel) → shunting-yard conversion.
//!
//! After conversion the stream only ever changes through
//! [`insert_result_to_token`], which splices a computed result back in and
//! reports any token that became ready at the splice point.

mod validate;
mod brackets;
mod postfix;
mod tokens;

pub use brackets::{add_brackets, normalize_unary_signs};
pub use postfix::infix_to_postfix;
pub use tokens::{get_tokens, insert_result_to_token, Splice};
pub use validate::is_valid_expression;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid expression")]
    InvalidExpression,
    #[error("can't find token")]
    TokenNotFound,
}

/// Parse user-supplied infix text into a postfix stream ready for
/// tokenization.
pub fn parse_expression(expression: &str) -> Result<String, ParseError> {
    let raw = expression.replace(' ', "");
    if !is_valid_expression(&raw) {
        return Err(ParseError::InvalidExpression);
    }
    let normalized = normalize_unary_signs(&raw);
    let bracketed = add_brackets(&normalized);
    infix_to_postfix(&bracketed)
}

/// Whether `s` is a signed integer literal (one optional leading `-`).
/// This is the check the orchestrator uses to detect a fully reduced
/// stream, so negative intermediate results must pass.
pub fn is_integer_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

pub(crate) fn is_operator(b: u8) -> bool {
    matches!(b, b'+' | b'-' | b'*' | b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_expression_table() {
        let cases: &[(&str, Result<&str, ParseError>)] = &[
            // Valid expression with parentheses
            ("(3+4)*5", Ok("3 4 + 5 *")),
            // Valid expression with unary minus
            ("-3+4*5", Ok("0 3 - 4 5 * +")),
            // Mismatched parentheses
            ("(3+4*5", Err(ParseError::InvalidExpression)),
            // Invalid characters
            ("3+x+4*5", Err(ParseError::InvalidExpression)),
            // Leading spaces
            ("   3+4*5", Ok("3 4 5 * +")),
            // Trailing spaces
            ("3+4*5   ", Ok("3 4 5 * +")),
            // Spaces in between
            ("3 + 4 * 5", Ok("3 4 5 * +")),
            // Unary minus twice
            ("-3+-4*5", Ok("0 3 - 0 + 4 5 * -")),
            // Six unary minuses
            ("------3", Err(ParseError::InvalidExpression)),
            // Unary plus
            ("+3+4*5", Ok("0 3 + 4 5 * +")),
            // Unary plus after a binary operator
            ("3++4*5", Ok("3 0 + 4 5 * +")),
            // Division by zero
            ("3/0", Err(ParseError::InvalidExpression)),
            // Multiple operators
            ("3+4*5-6/2", Ok("3 4 5 * + 6 2 / -")),
            // Excessive parentheses
            ("(((3+4)*5)-6)/2", Ok("3 4 + 5 * 6 - 2 /")),
            // Leading unary minus with excessive parentheses
            ("-(((3+4)*5)-6)/2", Ok("0 3 4 + 5 * 6 - 2 / -")),
            // Empty input
            ("", Err(ParseError::InvalidExpression)),
            // Single number
            ("42", Ok("42")),
            // Parenthesized unary minus
            ("3+(-4)*5", Ok("3 0 4 - 5 * +")),
        ];

        for (expression, want) in cases {
            let got = parse_expression(expression);
            assert_eq!(
                got.as_deref().map_err(|&e| e),
                *want,
                "parse_expression({expression:?})"
            );
        }
    }

    #[test]
    fn integer_literal_accepts_leading_minus() {
        assert!(is_integer_literal("42"));
        assert!(is_integer_literal("-42"));
        assert!(is_integer_literal("0"));
        assert!(!is_integer_literal("-"));
        assert!(!is_integer_literal(""));
        assert!(!is_integer_literal("+"));
        assert!(!is_integer_literal("4 2"));
        assert!(!is_integer_literal("--4"));
    }
}
