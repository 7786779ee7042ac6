//! Query text parsing.
//!
//! ```text
//! [query] <name:prefix> [where <key> <op> [<value>] (and <key> <op> [<value>])*]
//! ```
//!
//! Values are JSON literals (`1`, `true`, `"a b"`, `[1, 2]`); anything that
//! is not valid JSON is taken as a bare string.

use super::condition::{And, Condition, Operator, Where};
use super::Query;
use crate::error::{CoreError, CoreResult};
use serde_json::Value;

pub(super) fn parse(text: &str) -> CoreResult<Query> {
    let tokens = tokenize(text)?;
    let mut tokens = tokens.into_iter().peekable();

    if tokens.peek().map(String::as_str) == Some("query") {
        tokens.next();
    }
    let prefix = tokens
        .next()
        .ok_or_else(|| CoreError::invalid_query("missing database prefix"))?;
    let mut query = Query::new(&prefix);

    match tokens.next().as_deref() {
        None => return Ok(query),
        Some("where") => {}
        Some(other) => {
            return Err(CoreError::invalid_query(format!(
                "expected \"where\", found {other:?}"
            )))
        }
    }

    let mut clauses: Vec<Box<dyn Condition>> = Vec::new();
    loop {
        let key = tokens
            .next()
            .ok_or_else(|| CoreError::invalid_query("missing field after where/and"))?;
        let op_token = tokens
            .next()
            .ok_or_else(|| CoreError::invalid_query(format!("missing operator after {key}")))?;
        let operator = Operator::parse(&op_token)
            .ok_or_else(|| CoreError::invalid_query(format!("unknown operator {op_token:?}")))?;

        let value = if operator.takes_value() {
            let raw = tokens
                .next()
                .ok_or_else(|| CoreError::invalid_query(format!("missing value for {key}")))?;
            parse_value(&raw)
        } else {
            Value::Null
        };
        clauses.push(Box::new(Where::new(key, operator, value)));

        match tokens.next().as_deref() {
            None => break,
            Some("and") => {}
            Some(other) => {
                return Err(CoreError::invalid_query(format!(
                    "expected \"and\", found {other:?}"
                )))
            }
        }
    }

    query = if clauses.len() == 1 {
        match clauses.pop() {
            Some(only) => query.with_boxed_condition(only),
            None => query,
        }
    } else {
        query.with_condition(And(clauses))
    };
    Ok(query)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn tokenize(text: &str) -> CoreResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let end = match c {
            '"' => {
                chars.next();
                scan_string(&mut chars).ok_or_else(|| CoreError::invalid_query("unterminated string"))?
            }
            '[' => {
                let mut depth = 0usize;
                let mut end = None;
                while let Some(&(i, c)) = chars.peek() {
                    match c {
                        '"' => {
                            chars.next();
                            scan_string(&mut chars)
                                .ok_or_else(|| CoreError::invalid_query("unterminated string"))?;
                            continue;
                        }
                        '[' => depth += 1,
                        ']' => {
                            depth -= 1;
                            if depth == 0 {
                                chars.next();
                                end = Some(i + 1);
                                break;
                            }
                        }
                        _ => {}
                    }
                    chars.next();
                }
                end.ok_or_else(|| CoreError::invalid_query("unterminated list"))?
            }
            _ => {
                let mut end = text.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                end
            }
        };
        tokens.push(text[start..end].to_owned());
    }
    Ok(tokens)
}

/// Consumes a string body after its opening quote. Returns the byte offset
/// just past the closing quote.
fn scan_string(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in chars.by_ref() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i + 1),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tokenizer_keeps_strings_and_lists_whole() {
        let tokens = tokenize(r#"query core:a/ where name sameas "a b" and n in [1, "x y"]"#).unwrap();
        assert_eq!(
            tokens,
            vec![
                "query", "core:a/", "where", "name", "sameas", "\"a b\"", "and", "n", "in",
                "[1, \"x y\"]"
            ]
        );
    }

    #[test]
    fn tokenizer_rejects_unterminated() {
        assert!(tokenize(r#"a "b"#).is_err());
        assert!(tokenize("a [1, 2").is_err());
    }

    #[test]
    fn values() {
        assert_eq!(parse_value("1"), json!(1));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("\"x\""), json!("x"));
        assert_eq!(parse_value("bare"), json!("bare"));
    }

    #[test]
    fn prefix_only() {
        let q = parse("query core:test/").unwrap();
        assert_eq!(q.database_name(), "core");
        assert_eq!(q.database_key_prefix(), "test/");
        assert!(q.condition().is_none());
        let q = parse("core:").unwrap();
        assert_eq!(q.database_key_prefix(), "");
    }

    #[test]
    fn conditions() {
        let q = parse("query core:x where a == 1 and b exists and c startswith ab").unwrap();
        assert_eq!(
            q.to_string(),
            r#"query core:x where a == 1 and b exists and c startswith "ab""#
        );
    }

    #[test]
    fn errors() {
        assert!(parse("").is_err());
        assert!(parse("query core:x having a").is_err());
        assert!(parse("query core:x where a").is_err());
        assert!(parse("query core:x where a ~ 1").is_err());
        assert!(parse("query core:x where a == ").is_err());
        assert!(parse("query core:x where a == 1 or b == 2").is_err());
    }
}
