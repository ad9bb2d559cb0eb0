//! Rule evaluation against a single input document.
//!
//! An [`Evaluation`] is created per query and owns its own memo table, so
//! compiled state is never mutated and queries can run concurrently.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::ast::{dedup, CmpOp, Expr, RuleKind, Term};
use crate::compile::CompiledPackage;

/// Evaluation faults are reported as plain messages and wrapped by the caller.
pub type EvalResult<T> = std::result::Result<T, String>;

pub struct Evaluation<'a> {
    package: &'a CompiledPackage,
    input: &'a Value,
    memo: HashMap<String, Option<Value>>,
    stack: Vec<String>,
}

impl<'a> Evaluation<'a> {
    pub fn new(package: &'a CompiledPackage, input: &'a Value) -> Self {
        Self {
            package,
            input,
            memo: HashMap::new(),
            stack: Vec::new(),
        }
    }

    /// Resolve a rule by name; `None` means undefined.
    pub fn rule(&mut self, name: &str) -> EvalResult<Option<Value>> {
        if let Some(cached) = self.memo.get(name) {
            return Ok(cached.clone());
        }
        if self.stack.iter().any(|n| n == name) {
            return Err(format!(
                "recursion detected: {} -> {name}",
                self.stack.join(" -> ")
            ));
        }
        let Some(group) = self.package.rules.get(name) else {
            return Ok(None);
        };

        self.stack.push(name.to_string());
        let value = match group.kind {
            RuleKind::Complete => {
                let mut out: Option<(Value, usize)> = None;
                for def in &group.definitions {
                    if !self.body(&def.body)? {
                        continue;
                    }
                    let Some(v) = self.term(&def.value)? else {
                        continue;
                    };
                    match &out {
                        Some((existing, line)) if !values_equal(existing, &v) => {
                            return Err(format!(
                                "complete rule '{name}' produced conflicting values (lines {line} and {})",
                                def.line
                            ));
                        }
                        Some(_) => {}
                        None => out = Some((v, def.line)),
                    }
                }
                out.map(|(v, _)| v).or_else(|| group.default.clone())
            }
            RuleKind::Partial => {
                let mut values = Vec::new();
                for def in &group.definitions {
                    if self.body(&def.body)? {
                        if let Some(v) = self.term(&def.value)? {
                            values.push(v);
                        }
                    }
                }
                Some(Value::Array(dedup(values)))
            }
        };
        self.stack.pop();

        self.memo.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn body(&mut self, body: &[Expr]) -> EvalResult<bool> {
        for expr in body {
            if !self.expr(expr)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn expr(&mut self, expr: &Expr) -> EvalResult<bool> {
        match expr {
            Expr::Truthy(term) => Ok(matches!(self.term(term)?, Some(v) if v != Value::Bool(false))),
            Expr::Compare { op, lhs, rhs } => {
                let (Some(l), Some(r)) = (self.term(lhs)?, self.term(rhs)?) else {
                    return Ok(false);
                };
                compare(*op, &l, &r)
            }
            Expr::Member {
                element,
                collection,
            } => {
                let (Some(item), Some(coll)) = (self.term(element)?, self.term(collection)?) else {
                    return Ok(false);
                };
                Ok(match coll {
                    Value::Array(items) => items.iter().any(|v| values_equal(v, &item)),
                    Value::Object(map) => map.values().any(|v| values_equal(v, &item)),
                    _ => false,
                })
            }
            Expr::Not(inner) => Ok(!self.expr(inner)?),
        }
    }

    fn term(&mut self, term: &Term) -> EvalResult<Option<Value>> {
        match term {
            Term::Scalar(v) => Ok(Some(v.clone())),
            Term::Input(path) => Ok(walk(self.input, path).cloned()),
            Term::Rule { name, path } => {
                let value = self.rule(name)?;
                Ok(value.and_then(|v| walk(&v, path).cloned()))
            }
            Term::Array(items) => Ok(self.terms(items)?.map(Value::Array)),
            Term::Set(items) => Ok(self.terms(items)?.map(|v| Value::Array(dedup(v)))),
            Term::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, term) in fields {
                    match self.term(term)? {
                        Some(v) => {
                            map.insert(key.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Object(map)))
            }
        }
    }

    fn terms(&mut self, items: &[Term]) -> EvalResult<Option<Vec<Value>>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.term(item)? {
                Some(v) => out.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }
}

fn walk<'v>(mut value: &'v Value, path: &[String]) -> Option<&'v Value> {
    for segment in path {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> EvalResult<bool> {
    match op {
        CmpOp::Eq => return Ok(values_equal(l, r)),
        CmpOp::Neq => return Ok(!values_equal(l, r)),
        _ => {}
    }
    let ordering = match (l, r) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return Err(format!(
            "type error: cannot compare {} {} {}",
            type_name(l),
            op.symbol(),
            type_name(r)
        ));
    };
    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Lte => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Gte => ordering != Ordering::Less,
        CmpOp::Eq | CmpOp::Neq => unreachable!("equality handled above"),
    })
}

#[cfg(test)]
mod tests {
    use crate::compile::PolicySet;
    use crate::source::{PolicyLayer, PolicySource};
    use serde_json::{json, Value};

    fn set(text: &str) -> PolicySet {
        PolicySet::compile(vec![(
            PolicySource::new("/p/test.rego", PolicyLayer::Builtin, 0),
            text.to_string(),
        )])
        .unwrap()
    }

    fn eval(set: &PolicySet, binding: &str, input: Value) -> Option<Value> {
        set.evaluate(&format!("p.{binding}"), &input).unwrap()
    }

    #[test]
    fn test_condition_match_and_miss() {
        let s = set("package p\nstrategy := \"single-stage\" if { input.environment == \"production\" }\n");
        assert_eq!(
            eval(&s, "strategy", json!({"environment": "production"})),
            Some(json!("single-stage"))
        );
        assert_eq!(eval(&s, "strategy", json!({"environment": "development"})), None);
        assert_eq!(eval(&s, "strategy", json!({})), None);
    }

    #[test]
    fn test_default_applies_when_no_rule_matches() {
        let s = set("package p\ndefault replicas := 1\nreplicas := 3 if { input.environment == \"production\" }\n");
        assert_eq!(eval(&s, "replicas", json!({"environment": "dev"})), Some(json!(1)));
        assert_eq!(eval(&s, "replicas", json!({"environment": "production"})), Some(json!(3)));
    }

    #[test]
    fn test_multiple_agreeing_definitions_are_fine() {
        let s = set("package p\nx := 1 if { input.a == 1 }\nx := 1 if { input.b == 1 }\n");
        assert_eq!(eval(&s, "x", json!({"a": 1, "b": 1})), Some(json!(1)));
    }

    #[test]
    fn test_conflicting_definitions_are_evaluation_error() {
        let s = set("package p\nx := 1 if { input.a == 1 }\nx := 2 if { input.b == 1 }\n");
        let err = s.evaluate("p.x", &json!({"a": 1, "b": 1})).unwrap_err();
        assert!(err.to_string().contains("conflicting values"));
        // the same compiled set still answers other inputs
        assert_eq!(eval(&s, "x", json!({"a": 1})), Some(json!(1)));
    }

    #[test]
    fn test_ordering_type_error() {
        let s = set("package p\nbig := true if { input.replicas > 3 }\n");
        assert_eq!(eval(&s, "big", json!({"replicas": 5})), Some(json!(true)));
        let err = s.evaluate("p.big", &json!({"replicas": "five"})).unwrap_err();
        assert!(err.to_string().contains("cannot compare string > number"));
    }

    #[test]
    fn test_membership_and_not() {
        let s = set(
            "package p\ncompiled if {\n  input.language in {\"java\", \"go\"}\n  not input.framework == \"quarkus\"\n}\n",
        );
        assert_eq!(eval(&s, "compiled", json!({"language": "go"})), Some(json!(true)));
        assert_eq!(
            eval(&s, "compiled", json!({"language": "java", "framework": "quarkus"})),
            None
        );
        assert_eq!(eval(&s, "compiled", json!({"language": "python"})), None);
    }

    #[test]
    fn test_partial_set_collects_in_declaration_order() {
        let s = set(
            "package p\nitems contains \"b\"\nitems contains \"a\" if { input.x }\nitems contains \"b\" if { true }\n",
        );
        assert_eq!(eval(&s, "items", json!({"x": true})), Some(json!(["b", "a"])));
        assert_eq!(eval(&s, "items", json!({"x": false})), Some(json!(["b"])));
    }

    #[test]
    fn test_rule_references_and_input_in_values() {
        let s = set(
            "package p\nprod if { input.environment == \"production\" }\nconfig := {\"replicas\": 3, \"tool\": input.tool} if { prod }\n",
        );
        assert_eq!(
            eval(&s, "config", json!({"environment": "production", "tool": "generate-dockerfile"})),
            Some(json!({"replicas": 3, "tool": "generate-dockerfile"}))
        );
    }

    #[test]
    fn test_recursion_is_evaluation_error() {
        let s = set("package p\na := b\nb := a\n");
        assert!(s.evaluate("p.a", &json!({})).is_err());
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let s = set("package p\nx if { input.n == 2 }\n");
        assert_eq!(eval(&s, "x", json!({"n": 2.0})), Some(json!(true)));
    }

    #[test]
    fn test_undefined_binding_is_none() {
        let s = set("package p\nx := 1\n");
        assert_eq!(eval(&s, "missing", json!({})), None);
        assert_eq!(s.evaluate("other.x", &json!({})).unwrap(), None);
    }
}
