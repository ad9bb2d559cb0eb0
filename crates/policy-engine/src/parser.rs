//! Recursive-descent parser for the supported Rego subset.
//!
//! Newlines separate statements and body expressions but are ignored inside
//! array, object and set literals.

use serde_json::Value;

use crate::ast::{CmpOp, DefaultRule, Expr, Module, Rule, RuleKind, Term};
use crate::lexer::{tokenize, SyntaxError, Token, TokenKind};

const RESERVED: &[&str] = &[
    "package", "import", "default", "if", "contains", "not", "in", "some", "with", "else", "true",
    "false", "null", "input", "data",
];

/// Parse one policy source into a [`Module`].
pub fn parse_module(src: &str) -> Result<Module, SyntaxError> {
    let tokens = tokenize(src)?;
    Parser { tokens, pos: 0 }.module()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn is_ident(&self, word: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(name) if name == word)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        SyntaxError::new(
            self.line(),
            format!("expected {expected}, found {}", self.peek().describe()),
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), SyntaxError> {
        if *self.peek() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn end_of_statement(&mut self) -> Result<(), SyntaxError> {
        match self.peek() {
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    fn module(mut self) -> Result<Module, SyntaxError> {
        self.skip_separators();
        if !self.is_ident("package") {
            return Err(self.unexpected("'package' declaration"));
        }
        let package_line = self.line();
        self.advance();
        let mut package = self.ident()?;
        while matches!(self.peek(), TokenKind::Dot) {
            self.advance();
            package.push('.');
            package.push_str(&self.ident()?);
        }
        self.end_of_statement()?;

        let mut rules = Vec::new();
        let mut defaults = Vec::new();
        loop {
            self.skip_separators();
            if matches!(self.peek(), TokenKind::Eof) {
                break;
            }
            if self.is_ident("import") {
                while !matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                    self.advance();
                }
                continue;
            }
            if self.is_ident("package") {
                return Err(SyntaxError::new(
                    self.line(),
                    "only one package declaration is allowed per source",
                ));
            }
            if self.is_ident("default") {
                defaults.push(self.default_rule()?);
            } else {
                rules.push(self.rule()?);
            }
            self.end_of_statement()?;
        }

        Ok(Module {
            package,
            package_line,
            rules,
            defaults,
        })
    }

    fn rule_name(&mut self) -> Result<String, SyntaxError> {
        let line = self.line();
        let name = self.ident()?;
        if RESERVED.contains(&name.as_str()) {
            return Err(SyntaxError::new(
                line,
                format!("'{name}' is a keyword and cannot name a rule"),
            ));
        }
        Ok(name)
    }

    fn default_rule(&mut self) -> Result<DefaultRule, SyntaxError> {
        let line = self.line();
        self.advance();
        let name = self.rule_name()?;
        match self.advance() {
            TokenKind::Assign | TokenKind::Unify => {}
            _ => return Err(SyntaxError::new(line, "expected ':=' after default rule name")),
        }
        let term = self.term()?;
        let value = term
            .as_constant()
            .ok_or_else(|| SyntaxError::new(line, "default value must be a constant"))?;
        Ok(DefaultRule { name, value, line })
    }

    fn rule(&mut self) -> Result<Rule, SyntaxError> {
        let line = self.line();
        let name = self.rule_name()?;

        let (kind, value) = match self.peek().clone() {
            TokenKind::Assign | TokenKind::Unify => {
                self.advance();
                (RuleKind::Complete, self.term()?)
            }
            TokenKind::Ident(word) if word == "contains" => {
                self.advance();
                (RuleKind::Partial, self.term()?)
            }
            TokenKind::Ident(word) if word == "if" => (RuleKind::Complete, Term::Scalar(Value::Bool(true))),
            TokenKind::LBrace => (RuleKind::Complete, Term::Scalar(Value::Bool(true))),
            _ => return Err(self.unexpected("':=', 'contains', 'if' or rule body")),
        };

        let body = if self.is_ident("if") {
            self.advance();
            self.body()?
        } else if matches!(self.peek(), TokenKind::LBrace) {
            self.body()?
        } else {
            Vec::new()
        };

        Ok(Rule {
            name,
            kind,
            value,
            body,
            line,
        })
    }

    fn body(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect(TokenKind::LBrace, "'{' to open rule body")?;
        let mut exprs = Vec::new();
        loop {
            self.skip_separators();
            if matches!(self.peek(), TokenKind::RBrace) {
                self.advance();
                break;
            }
            if matches!(self.peek(), TokenKind::Eof) {
                return Err(self.unexpected("'}' to close rule body"));
            }
            exprs.push(self.expr()?);
            match self.peek() {
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace => {}
                _ => return Err(self.unexpected("end of expression")),
            }
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.is_ident("not") {
            self.advance();
            return Ok(Expr::Not(Box::new(self.expr()?)));
        }
        let lhs = self.term()?;
        if self.is_ident("in") {
            self.advance();
            let collection = self.term()?;
            return Ok(Expr::Member {
                element: lhs,
                collection,
            });
        }
        let op = match self.peek() {
            TokenKind::Eq | TokenKind::Unify => Some(CmpOp::Eq),
            TokenKind::Neq => Some(CmpOp::Neq),
            TokenKind::Lt => Some(CmpOp::Lt),
            TokenKind::Lte => Some(CmpOp::Lte),
            TokenKind::Gt => Some(CmpOp::Gt),
            TokenKind::Gte => Some(CmpOp::Gte),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let rhs = self.term()?;
                Ok(Expr::Compare { op, lhs, rhs })
            }
            None => Ok(Expr::Truthy(lhs)),
        }
    }

    fn path(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut path = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    path.push(self.ident()?);
                }
                TokenKind::LBracket => {
                    self.advance();
                    match self.advance() {
                        TokenKind::Str(key) => path.push(key),
                        TokenKind::Number(n) => path.push(n.to_string()),
                        _ => return Err(SyntaxError::new(self.line(), "expected string index")),
                    }
                    self.expect(TokenKind::RBracket, "']'")?;
                }
                _ => return Ok(path),
            }
        }
    }

    fn term(&mut self) -> Result<Term, SyntaxError> {
        let line = self.line();
        match self.advance() {
            TokenKind::Str(s) => Ok(Term::Scalar(Value::String(s))),
            TokenKind::Number(n) => Ok(Term::Scalar(Value::Number(n))),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => Ok(Term::Scalar(Value::Bool(true))),
                "false" => Ok(Term::Scalar(Value::Bool(false))),
                "null" => Ok(Term::Scalar(Value::Null)),
                "input" => Ok(Term::Input(self.path()?)),
                "data" => Err(SyntaxError::new(
                    line,
                    "'data' references are not supported; reference rules of the same package by name",
                )),
                other if RESERVED.contains(&other) => Err(SyntaxError::new(
                    line,
                    format!("unexpected keyword '{other}'"),
                )),
                _ => Ok(Term::Rule {
                    name: word,
                    path: self.path()?,
                }),
            },
            TokenKind::LBracket => {
                let items = self.sequence(TokenKind::RBracket)?;
                Ok(Term::Array(items))
            }
            TokenKind::LBrace => self.brace_literal(),
            TokenKind::LParen => {
                self.skip_newlines();
                let inner = self.term()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(SyntaxError::new(
                line,
                format!("expected a term, found {}", other.describe()),
            )),
        }
    }

    /// Comma-separated terms up to `close`. Trailing commas are allowed.
    fn sequence(&mut self, close: TokenKind) -> Result<Vec<Term>, SyntaxError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if *self.peek() == close {
                self.advance();
                return Ok(items);
            }
            items.push(self.term()?);
            self.skip_newlines();
            match self.peek() {
                TokenKind::Comma => {
                    self.advance();
                }
                k if *k == close => {}
                _ => return Err(self.unexpected("',' or closing bracket")),
            }
        }
    }

    /// `{}` object, `{"k": v, ...}` object, or `{a, b}` set.
    fn brace_literal(&mut self) -> Result<Term, SyntaxError> {
        self.skip_newlines();
        if matches!(self.peek(), TokenKind::RBrace) {
            self.advance();
            return Ok(Term::Object(Vec::new()));
        }

        let first_line = self.line();
        let first = self.term()?;
        self.skip_newlines();
        if !matches!(self.peek(), TokenKind::Colon) {
            let mut items = vec![first];
            if matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                items.extend(self.sequence(TokenKind::RBrace)?);
            } else {
                self.expect(TokenKind::RBrace, "'}'")?;
            }
            return Ok(Term::Set(items));
        }

        let mut fields = Vec::new();
        let mut key = object_key(first, first_line)?;
        loop {
            self.expect(TokenKind::Colon, "':'")?;
            self.skip_newlines();
            let value = self.term()?;
            fields.push((key, value));
            self.skip_newlines();
            match self.advance() {
                TokenKind::Comma => {
                    self.skip_newlines();
                    if matches!(self.peek(), TokenKind::RBrace) {
                        self.advance();
                        return Ok(Term::Object(fields));
                    }
                    let line = self.line();
                    let next = self.term()?;
                    key = object_key(next, line)?;
                    self.skip_newlines();
                }
                TokenKind::RBrace => return Ok(Term::Object(fields)),
                other => {
                    return Err(SyntaxError::new(
                        self.line(),
                        format!("expected ',' or '}}' in object, found {}", other.describe()),
                    ))
                }
            }
        }
    }
}

fn object_key(term: Term, line: usize) -> Result<String, SyntaxError> {
    match term {
        Term::Scalar(Value::String(key)) => Ok(key),
        _ => Err(SyntaxError::new(line, "object keys must be string literals")),
    }
}
