// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pre-conversion rewrites: unary-sign normalization and the pairwise
//! additive re-bracketing that makes independent `+` pairs extractable as
//! soon as the expression is tokenized.

use super::is_operator;

/// Insert an explicit `0` operand in front of every unary sign
/// (`-3` → `0-3`, `3+-4` → `3+0-4`, `(-4)` → `(0-4)`), reducing every
/// later stage to pure binary operators.
pub fn normalize_unary_signs(expression: &str) -> String {
    let b = expression.as_bytes();
    let mut out = String::with_capacity(b.len() + 4);
    for (i, &c) in b.iter().enumerate() {
        if (c == b'+' || c == b'-') && (i == 0 || is_operator(b[i - 1]) || b[i - 1] == b'(') {
            out.push('0');
        }
        out.push(c as char);
    }
    out
}

/// Rebracket runs of three or more top-level additive terms pairwise,
/// left to right: `1+1+2+2+3+3` → `(1+1)+(2+2)+(3+3)`.
///
/// Only pairs that are joined to the rest of the run by `+` are wrapped
/// (a pair may subtract internally, `1+(2-3)+4`, but never hang off a
/// `-`), which is exactly what keeps the rewrite meaning-preserving under
/// left-associativity. Multiplicative chains pass through untouched.
///
/// Expects a normalized expression (no unary signs).
pub fn add_brackets(expression: &str) -> String {
    let parts: Vec<&str> = expression
        .split(['+', '-'])
        .filter(|p| !p.is_empty())
        .collect();
    let orders: Vec<char> = expression.chars().filter(|&c| c == '+' || c == '-').collect();

    if parts.len() <= 2 {
        return expression.to_string();
    }

    let mut result = String::with_capacity(expression.len() + parts.len());
    let length = parts.len();
    let mut ind = 0usize;
    let mut ord = 0usize;

    while ind < length {
        if ind == 0
            && is_plain_number(parts[0])
            && is_plain_number(parts[1])
            && orders.get(1) == Some(&'+')
        {
            // leading pair, folded under the '+' that follows it
            result.push('(');
            result.push_str(parts[0]);
            result.push(orders[ord]);
            result.push_str(parts[1]);
            result.push(')');
            ord += 1;
            ind += 1;
        } else if ind == 0 {
            result.push_str(parts[0]);
        } else if ind + 1 < length
            && is_plain_number(parts[ind])
            && is_plain_number(parts[ind + 1])
            && orders[ord] == '+'
            && (ord + 2 >= orders.len() || orders[ord + 2] == '+')
        {
            result.push('+');
            result.push('(');
            result.push_str(parts[ind]);
            ord += 1;
            result.push(orders[ord]);
            result.push_str(parts[ind + 1]);
            result.push(')');
            ord += 1;
            ind += 1;
        } else {
            result.push(orders[ord]);
            result.push_str(parts[ind]);
            ord += 1;
        }
        ind += 1;
    }

    result
}

fn is_plain_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
