// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Validity scan: a single left-to-right pass over the space-stripped
//! expression with an explicit parenthesis depth counter.

use super::is_operator;

/// Check a space-stripped infix expression for structural validity.
///
/// Rejected: empty input, unbalanced or empty parentheses, operators at
/// the ends or in illegal adjacency, more than one consecutive unary
/// sign, division by a literal zero, leading zeros in multi-digit
/// literals, and any character outside `0-9 + - * / ( )`.
pub fn is_valid_expression(expression: &str) -> bool {
    if expression.is_empty() {
        return false;
    }

    let b = expression.as_bytes();
    let len = b.len();
    let mut depth = 0usize;

    for i in 0..len {
        match b[i] {
            b'(' => {
                // an opening parenthesis cannot follow an operand
                if i > 0 && (b[i - 1].is_ascii_digit() || b[i - 1] == b')') {
                    return false;
                }
                depth += 1;
            }
            b')' => {
                if depth == 0 {
                    return false;
                }
                // "()" and "3+)" are both malformed
                if b[i - 1] == b'(' || is_operator(b[i - 1]) {
                    return false;
                }
                depth -= 1;
            }
            b'*' | b'/' => {
                if i == 0 || i == len - 1 {
                    return false;
                }
                if is_operator(b[i - 1]) || b[i - 1] == b'(' {
                    return false;
                }
                if is_operator(b[i + 1]) || b[i + 1] == b')' {
                    return false;
                }
                // literal zero divisor; "/0<digit>" also dies on the
                // leading-zero rule below
                if b[i] == b'/' && b[i + 1] == b'0' {
                    return false;
                }
            }
            b'+' | b'-' => {
                if i == len - 1 {
                    return false;
                }
                if b[i + 1] == b')' {
                    return false;
                }
                // Unary signs are legal at the start, after '(' and after
                // a binary operator. A sign following an operator is only
                // fine when that operator is itself binary, which rules
                // out a second consecutive sign.
                if i > 0 && is_operator(b[i - 1]) && (i == 1 || is_operator(b[i - 2]) || b[i - 2] == b'(') {
                    return false;
                }
            }
            c if c.is_ascii_digit() => {
                if i > 0 && b[i - 1] == b')' {
                    return false;
                }
                let starts_literal = i == 0 || !b[i - 1].is_ascii_digit();
                if starts_literal && c == b'0' && i + 1 < len && b[i + 1].is_ascii_digit() {
                    return false;
                }
            }
            _ => return false,
        }
    }

    depth == 0
}
