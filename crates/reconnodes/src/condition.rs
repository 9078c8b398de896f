//! Condition grammar shared by the conditional, filter, split and iterator
//! nodes.
//!
//! A condition is either `<operand> <operator> <operand>` or a single operand
//! tested for truthiness. Operands are quoted strings, numbers, `true`,
//! `false`, `null` or dotted paths into the data under test. The leftmost
//! operator outside quotes splits the expression; word operators must be
//! surrounded by whitespace.

use reconcore::value::{as_number, display, get_path, is_truthy};
use reconcore::{NodeError, NodeFailure, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,

    #[error("missing operand around '{operator}' in '{condition}'")]
    MissingOperand {
        operator: &'static str,
        condition: String,
    },

    #[error("unterminated string in '{0}'")]
    UnterminatedString(String),
}

impl From<ConditionError> for NodeError {
    fn from(e: ConditionError) -> Self {
        NodeError::Configuration(format!("Invalid condition: {}", e))
    }
}

impl From<ConditionError> for NodeFailure {
    fn from(e: ConditionError) -> Self {
        NodeError::from(e).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

/// Longest symbol first so `>=` is never read as `>`.
const SYMBOLS: [(&str, Operator); 8] = [
    ("===", Operator::Eq),
    ("!==", Operator::Ne),
    ("==", Operator::Eq),
    ("!=", Operator::Ne),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

const WORDS: [(&str, Operator); 3] = [
    ("contains", Operator::Contains),
    ("startsWith", Operator::StartsWith),
    ("endsWith", Operator::EndsWith),
];

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
        }
    }

    fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => loosely_equal(left, right),
            Self::Ne => !loosely_equal(left, right),
            Self::Gt => compare(left, right, |a, b| a > b),
            Self::Lt => compare(left, right, |a, b| a < b),
            Self::Ge => compare(left, right, |a, b| a >= b),
            Self::Le => compare(left, right, |a, b| a <= b),
            Self::Contains => match left {
                Value::Array(items) => items.iter().any(|item| loosely_equal(item, right)),
                _ => display(left).contains(&display(right)),
            },
            Self::StartsWith => display(left).starts_with(&display(right)),
            Self::EndsWith => display(left).ends_with(&display(right)),
        }
    }
}

/// Numbers compare numerically when both sides read as numbers; everything
/// else compares by display form.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => display(left) == display(right),
        },
    }
}

fn compare(left: &Value, right: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(Value),
    Path(String),
}

impl Operand {
    fn parse(token: &str) -> Operand {
        let quoted = token.len() >= 2
            && ((token.starts_with('"') && token.ends_with('"'))
                || (token.starts_with('\'') && token.ends_with('\'')));
        if quoted {
            return Operand::Literal(Value::String(token[1..token.len() - 1].to_string()));
        }

        match token {
            "true" => return Operand::Literal(Value::Bool(true)),
            "false" => return Operand::Literal(Value::Bool(false)),
            "null" => return Operand::Literal(Value::Null),
            _ => {}
        }

        let numeric = token
            .chars()
            .next()
            .map(|c| c.is_ascii_digit() || c == '-' || c == '.')
            .unwrap_or(false);
        if numeric {
            if let Some(n) = token.parse::<f64>().ok().filter(|n| n.is_finite()) {
                return Operand::Literal(reconcore::value::number(n));
            }
        }

        Operand::Path(token.to_string())
    }

    /// Paths that resolve to nothing are `null`, or the bare word itself when
    /// `bare_word` is set (right-hand side, so `severity == high` works).
    fn resolve(&self, data: &Value, bare_word: bool) -> Value {
        match self {
            Operand::Literal(value) => value.clone(),
            Operand::Path(path) => match get_path(data, path) {
                Some(value) => value.clone(),
                None if bare_word => Value::String(path.clone()),
                None => Value::Null,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Compare {
        left: Operand,
        op: Operator,
        right: Operand,
    },
    Truthy(Operand),
}

/// A parsed condition, reusable across many evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ConditionError::Empty);
        }

        let expr = match find_operator(trimmed)? {
            Some((at, len, op)) => {
                let left = trimmed[..at].trim();
                let right = trimmed[at + len..].trim();
                if left.is_empty() || right.is_empty() {
                    return Err(ConditionError::MissingOperand {
                        operator: op.as_str(),
                        condition: trimmed.to_string(),
                    });
                }
                Expr::Compare {
                    left: Operand::parse(left),
                    op,
                    right: Operand::parse(right),
                }
            }
            None => Expr::Truthy(Operand::parse(trimmed)),
        };

        Ok(Self {
            source: trimmed.to_string(),
            expr,
        })
    }

    pub fn evaluate(&self, data: &Value) -> bool {
        match &self.expr {
            Expr::Compare { left, op, right } => {
                op.apply(&left.resolve(data, false), &right.resolve(data, true))
            }
            Expr::Truthy(operand) => is_truthy(&operand.resolve(data, false)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Byte offset and length of the leftmost operator outside quotes.
fn find_operator(src: &str) -> Result<Option<(usize, usize, Operator)>, ConditionError> {
    let mut quote: Option<char> = None;
    let mut found = None;

    for (i, c) in src.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            continue;
        }
        if found.is_some() {
            continue;
        }

        let rest = &src[i..];
        if let Some((symbol, op)) = SYMBOLS.iter().find(|(symbol, _)| rest.starts_with(symbol)) {
            found = Some((i, symbol.len(), *op));
        } else if c.is_whitespace() {
            let after = rest.trim_start();
            let gap = rest.len() - after.len();
            found = WORDS.iter().find_map(|(word, op)| {
                (after.starts_with(word) && after[word.len()..].starts_with(char::is_whitespace))
                    .then_some((i, gap + word.len(), *op))
            });
        }
    }

    match quote {
        Some(_) => Err(ConditionError::UnterminatedString(src.to_string())),
        None => Ok(found),
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(condition: &str, data: &Value) -> Result<bool, ConditionError> {
    Ok(Condition::parse(condition)?.evaluate(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(condition: &str, data: Value) -> bool {
        evaluate(condition, &data).unwrap()
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(check("count > 0", json!({"count": 5})));
        assert!(!check("count > 0", json!({"count": 0})));
        assert!(check("count >= 5", json!({"count": 5})));
        assert!(check("count <= 5", json!({"count": "5"})));
        assert!(check("count < 10", json!({"count": 9.5})));
        assert!(!check("count > 0", json!({})));
    }

    #[test]
    fn test_equality() {
        assert!(check("status == 200", json!({"status": 200})));
        assert!(check("status == '200'", json!({"status": 200})));
        assert!(check("severity == high", json!({"severity": "high"})));
        assert!(check("severity === \"high\"", json!({"severity": "high"})));
        assert!(check("severity != low", json!({"severity": "high"})));
        assert!(check("enabled == true", json!({"enabled": true})));
        assert!(check("missing == null", json!({})));
    }

    #[test]
    fn test_string_operators() {
        let data = json!({"subdomain": "api.example.com", "tags": ["cve", "rce"]});
        assert!(check("subdomain contains 'api'", data.clone()));
        assert!(check("subdomain startsWith api.", data.clone()));
        assert!(check("subdomain endsWith \".com\"", data.clone()));
        assert!(check("tags contains rce", data.clone()));
        assert!(!check("tags contains xss", data));
    }

    #[test]
    fn test_dotted_paths() {
        let data = json!({"info": {"severity": "critical"}, "results": [{"status": 404}]});
        assert!(check("info.severity == critical", data.clone()));
        assert!(check("results.0.status == 404", data));
    }

    #[test]
    fn test_operator_inside_quotes_is_literal() {
        let data = json!({"title": "a > b"});
        assert!(check("'a > b' == title", data));
    }

    #[test]
    fn test_word_operator_needs_whitespace() {
        let condition = Condition::parse("containsAll").unwrap();
        assert!(!condition.evaluate(&json!({})));
        assert!(condition.evaluate(&json!({"containsAll": 1})));
    }

    #[test]
    fn test_truthiness() {
        assert!(check("true", json!({})));
        assert!(!check("false", json!({})));
        assert!(check("subdomains", json!({"subdomains": ["a"]})));
        assert!(!check("error", json!({"error": ""})));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Condition::parse("  "), Err(ConditionError::Empty));
        assert!(matches!(
            Condition::parse("count >"),
            Err(ConditionError::MissingOperand { operator: ">", .. })
        ));
        assert!(matches!(
            Condition::parse("name == 'open"),
            Err(ConditionError::UnterminatedString(_))
        ));

        let err: NodeError = ConditionError::Empty.into();
        assert!(matches!(err, NodeError::Configuration(_)));
    }
}
