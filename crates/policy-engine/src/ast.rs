//! Syntax tree for the supported Rego subset.

use serde_json::Value;

/// A value-producing term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Scalar literal (string, number, boolean, null).
    Scalar(Value),
    /// `input.a.b`
    Input(Vec<String>),
    /// Reference to another rule in the same package, optionally indexed.
    Rule { name: String, path: Vec<String> },
    Array(Vec<Term>),
    /// Rego set literal `{a, b}`; evaluates to a de-duplicated array.
    Set(Vec<Term>),
    Object(Vec<(String, Term)>),
}

impl Term {
    /// The literal value of this term if it contains no references.
    pub fn as_constant(&self) -> Option<Value> {
        match self {
            Term::Scalar(v) => Some(v.clone()),
            Term::Input(_) | Term::Rule { .. } => None,
            Term::Array(items) => items
                .iter()
                .map(Term::as_constant)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Term::Set(items) => items
                .iter()
                .map(Term::as_constant)
                .collect::<Option<Vec<_>>>()
                .map(|values| Value::Array(dedup(values))),
            Term::Object(fields) => fields
                .iter()
                .map(|(k, t)| t.as_constant().map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }

    /// Names of rules referenced anywhere inside this term.
    pub fn rule_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Term::Rule { name, .. } => out.push(name),
            Term::Array(items) | Term::Set(items) => items.iter().for_each(|t| t.rule_refs(out)),
            Term::Object(fields) => fields.iter().for_each(|(_, t)| t.rule_refs(out)),
            Term::Scalar(_) | Term::Input(_) => {}
        }
    }
}

/// Keep the first occurrence of each value, preserving order.
pub fn dedup(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// A single body expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// True when the term is defined and not `false`.
    Truthy(Term),
    Compare { op: CmpOp, lhs: Term, rhs: Term },
    /// `element in collection`
    Member { element: Term, collection: Term },
    Not(Box<Expr>),
}

impl Expr {
    pub fn rule_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Truthy(t) => t.rule_refs(out),
            Expr::Compare { lhs, rhs, .. } => {
                lhs.rule_refs(out);
                rhs.rule_refs(out);
            }
            Expr::Member {
                element,
                collection,
            } => {
                element.rule_refs(out);
                collection.rule_refs(out);
            }
            Expr::Not(inner) => inner.rule_refs(out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// `name := value if { ... }`: at most one distinct value.
    Complete,
    /// `name contains value if { ... }`: values are collected.
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub kind: RuleKind,
    pub value: Term,
    pub body: Vec<Expr>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefaultRule {
    pub name: String,
    pub value: Value,
    pub line: usize,
}

/// One parsed policy file.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub package: String,
    pub package_line: usize,
    pub rules: Vec<Rule>,
    pub defaults: Vec<DefaultRule>,
}
