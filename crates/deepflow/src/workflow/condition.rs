//! Step conditions (skip predicates)
//!
//! ```text
//! $fetch.output.status == 200
//! $review.output.verdict != "reject"
//! $plan.output.needs_research
//! !$inputs.dry_run
//! ```
//!
//! A condition that evaluates false skips the step. References that do not
//! resolve evaluate as `null`.

use serde_json::Value;

use super::binding::Reference;
use crate::context::ExecutionContext;
use crate::error::FlowError;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Truthy(Reference),
    Falsy(Reference),
    Equals(Reference, Value),
    NotEquals(Reference, Value),
}

/// Truthiness of a JSON value
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(arr) => !arr.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
        Value::Null => false,
    }
}

fn parse_operand(text: &str, source: &str) -> Result<Reference, FlowError> {
    Reference::parse(text.trim())
        .map_err(|e| FlowError::schema(source, e.to_string()))?
        .ok_or_else(|| FlowError::schema(source, "condition operand must be a $reference"))
}

fn parse_literal(text: &str) -> Value {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return value;
    }
    let unquoted = text
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or(text);
    Value::String(unquoted.to_string())
}

/// First `==` or `!=` outside a quoted literal, as (lhs, operator, rhs)
fn split_operator(text: &str) -> Option<(&str, &'static str, &str)> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if i + 1 < bytes.len() && bytes[i + 1] == b'=' && (b == b'=' || b == b'!') => {
                let op = if b == b'!' { "!=" } else { "==" };
                return Some((&text[..i], op, &text[i + 2..]));
            }
            None => {}
        }
        i += 1;
    }
    None
}

impl Condition {
    pub fn parse(source: &str) -> Result<Condition, FlowError> {
        let text = source.trim();
        if text.is_empty() {
            return Err(FlowError::schema(source, "empty condition"));
        }

        if let Some((lhs, op, rhs)) = split_operator(text) {
            let (operand, literal) = (parse_operand(lhs, source)?, parse_literal(rhs));
            return Ok(if op == "!=" {
                Condition::NotEquals(operand, literal)
            } else {
                Condition::Equals(operand, literal)
            });
        }
        if let Some(rest) = text.strip_prefix('!') {
            return Ok(Condition::Falsy(parse_operand(rest, source)?));
        }
        Ok(Condition::Truthy(parse_operand(text, source)?))
    }

    pub fn reference(&self) -> &Reference {
        match self {
            Condition::Truthy(r)
            | Condition::Falsy(r)
            | Condition::Equals(r, _)
            | Condition::NotEquals(r, _) => r,
        }
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        let value = self.reference().lookup(ctx).unwrap_or(Value::Null);
        match self {
            Condition::Truthy(_) => is_truthy(&value),
            Condition::Falsy(_) => !is_truthy(&value),
            Condition::Equals(_, expected) => loosely_equal(&value, expected),
            Condition::NotEquals(_, expected) => !loosely_equal(&value, expected),
        }
    }
}

/// Equality that treats `200` and `200.0` as equal
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn ctx() -> ExecutionContext {
        let mut inputs = Map::new();
        inputs.insert("dry_run".into(), json!(false));
        let ctx = ExecutionContext::new(inputs);
        ctx.record_output("fetch", json!({"status": 200, "body": "ok", "items": []}));
        ctx.record_output("review", json!({"verdict": "accept"}));
        ctx
    }

    #[test]
    fn test_equality_conditions() {
        let ctx = ctx();
        assert!(Condition::parse("$fetch.output.status == 200").unwrap().evaluate(&ctx));
        assert!(Condition::parse("$fetch.output.status == 200.0").unwrap().evaluate(&ctx));
        assert!(!Condition::parse("$fetch.output.status != 200").unwrap().evaluate(&ctx));
        assert!(Condition::parse("$review.output.verdict == \"accept\"").unwrap().evaluate(&ctx));
        assert!(Condition::parse("$review.output.verdict == accept").unwrap().evaluate(&ctx));
        assert!(Condition::parse("$review.output.verdict != 'reject'").unwrap().evaluate(&ctx));
    }

    #[test]
    fn test_operators_inside_quotes_are_literal() {
        let ctx = ctx();
        ctx.record_output("note", json!({"text": "x != y"}));

        let condition = Condition::parse(r#"$note.output.text == "x != y""#).unwrap();
        assert!(matches!(condition, Condition::Equals(_, Value::String(ref s)) if s == "x != y"));
        assert!(condition.evaluate(&ctx));

        let condition = Condition::parse("$note.output.text != 'a == b'").unwrap();
        assert!(matches!(condition, Condition::NotEquals(_, Value::String(ref s)) if s == "a == b"));
        assert!(condition.evaluate(&ctx));
    }

    #[test]
    fn test_truthiness_conditions() {
        let ctx = ctx();
        assert!(Condition::parse("$fetch.output.body").unwrap().evaluate(&ctx));
        assert!(!Condition::parse("$fetch.output.items").unwrap().evaluate(&ctx));
        assert!(Condition::parse("!$inputs.dry_run").unwrap().evaluate(&ctx));
        // Unresolved references are null
        assert!(!Condition::parse("$missing.output").unwrap().evaluate(&ctx));
        assert!(Condition::parse("$missing.output == null").unwrap().evaluate(&ctx));
    }

    #[test]
    fn test_invalid_conditions() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("status == 200").is_err());
        assert!(Condition::parse("$fetch.status").is_err());
    }

    #[test]
    fn test_reference_exposed_for_dependency_inference() {
        let c = Condition::parse("$plan.output.go").unwrap();
        assert_eq!(c.reference().step(), Some("plan"));
    }
}
