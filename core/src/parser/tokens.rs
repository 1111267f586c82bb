// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Token extraction and result splicing over the live postfix stream.
//!
//! A token is three consecutive stream entries `<operand> <operand>
//! <operator>`. Tokens for one expression are spatially disjoint by
//! construction, so any of them may resolve first; a splice can make two
//! previously-disjoint regions adjacent, and only then does the new token
//! surface, either through the adjacency fast path here or the caller's
//! next full scan.

use super::{is_integer_literal, ParseError};

/// Extract every currently-independent token from a postfix stream, left
/// to right. `get_tokens("1 1 + 2 2 + + 3 3 + +")` yields
/// `["1 1 +", "2 2 +", "3 3 +"]`.
pub fn get_tokens(postfix: &str) -> Vec<String> {
    let entries: Vec<&str> = postfix.split_whitespace().collect();
    let mut tokens = Vec::new();
    let mut ind = 0usize;

    while ind + 2 < entries.len() {
        if is_integer_literal(entries[ind])
            && is_integer_literal(entries[ind + 1])
            && !is_integer_literal(entries[ind + 2])
        {
            tokens.push(format!(
                "{} {} {}",
                entries[ind],
                entries[ind + 1],
                entries[ind + 2]
            ));
            ind += 2;
        }
        ind += 1;
    }

    tokens
}

/// Outcome of one result splice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    /// The updated postfix stream. A bare integer literal means the
    /// expression is fully reduced.
    pub stream: String,
    /// A token that became ready at the splice point, dispatchable
    /// without rescanning the whole stream.
    pub next_token: Option<String>,
}

/// Replace the first occurrence of `token` in `parse_data` with the
/// literal `result`.
///
/// Errors with [`ParseError::TokenNotFound`] when the token text is not
/// present (stale or duplicate delivery) and with
/// [`ParseError::InvalidExpression`] when the splice would strand an
/// operator at the stream boundary.
pub fn insert_result_to_token(
    parse_data: &str,
    token: &str,
    result: i64,
) -> Result<Splice, ParseError> {
    let entries: Vec<&str> = parse_data.split_whitespace().collect();
    let source: Vec<&str> = token.split_whitespace().collect();
    if source.len() != 3 {
        return Err(ParseError::InvalidExpression);
    }

    // A three-entry stream collapses to its final value.
    if entries.len() == 3 {
        if entries == source {
            return Ok(Splice {
                stream: result.to_string(),
                next_token: None,
            });
        }
        return Err(ParseError::TokenNotFound);
    }

    let result_str = result.to_string();
    let mut out: Vec<String> = Vec::with_capacity(entries.len());
    let mut next_token = None;
    let mut found = false;
    let mut ind = 0usize;

    while ind + 2 < entries.len() {
        if entries[ind] == source[0]
            && entries[ind + 1] == source[1]
            && entries[ind + 2] == source[2]
        {
            out.push(result_str.clone());
            found = true;

            if ind > 0 && ind + 3 >= entries.len() {
                // the spliced value has no operator to its right
                return Err(ParseError::InvalidExpression);
            }
            if ind > 0
                && is_integer_literal(entries[ind - 1])
                && !is_integer_literal(entries[ind + 3])
            {
                next_token = Some(format!(
                    "{} {} {}",
                    entries[ind - 1],
                    result_str,
                    entries[ind + 3]
                ));
            } else if ind > 0
                && ind + 4 < entries.len()
                && !is_integer_literal(entries[ind - 1])
                && is_integer_literal(entries[ind + 3])
                && !is_integer_literal(entries[ind + 4])
            {
                next_token = Some(format!(
                    "{} {} {}",
                    result_str,
                    entries[ind + 3],
                    entries[ind + 4]
                ));
            } else if ind == 0
                && ind + 4 < entries.len()
                && is_integer_literal(entries[ind + 3])
                && !is_integer_literal(entries[ind + 4])
            {
                next_token = Some(format!(
                    "{} {} {}",
                    result_str,
                    entries[ind + 3],
                    entries[ind + 4]
                ));
            }

            ind += 3;
            break;
        }
        out.push(entries[ind].to_string());
        ind += 1;
    }

    while ind < entries.len() {
        out.push(entries[ind].to_string());
        ind += 1;
    }

    if !found {
        return Err(ParseError::TokenNotFound);
    }

    Ok(Splice {
        stream: out.join(" "),
        next_token,
    })
}
