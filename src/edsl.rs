//! Builders for constructing Holmes programs from Rust.
//!
//! Facts, predicates, rules and queries can all be written directly against
//! the engine's data model, but numbering variables by hand gets old quickly.
//! The builders here let variables be named; compiling a rule or query assigns
//! numbers in order of first appearance.
//!
//! ```
//! use holmes::edsl::*;
//! use holmes::{Holmes, DB};
//!
//! let mut holmes = Holmes::new(DB::Memory).unwrap();
//! holmes.new_predicate(&predicate("parent", vec![string(), string()])).unwrap();
//! holmes.new_predicate(&predicate("grandparent", vec![string(), string()])).unwrap();
//! holmes.new_fact(&fact("parent", vec!["ann".into(), "bob".into()])).unwrap();
//! holmes.new_fact(&fact("parent", vec!["bob".into(), "cid".into()])).unwrap();
//! holmes
//!     .new_rule(
//!         rule("grandparent_by_parent")
//!             .head(atom("grandparent", vec![var("x"), var("z")]))
//!             .when(atom("parent", vec![var("x"), var("y")]))
//!             .when(atom("parent", vec![var("y"), var("z")])),
//!     )
//!     .unwrap();
//! let answers = holmes.query(&query(vec![atom("grandparent", vec![var("who"), any()])])).unwrap();
//! assert_eq!(answers[0].get("who"), Some(&"ann".into()));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::engine::{BindExpr, Expr, Func, Rule, WhereClause};
use crate::error::{Error, Result};
use crate::fact_db::{Clause, Fact, MatchExpr, Predicate};
use crate::mem_db::OtherHasher;
use crate::types::{Type, Value};

// ------------- Types -------------
pub fn bool_() -> Type {
    Type::Bool
}
pub fn uint64() -> Type {
    Type::UInt64
}
pub fn int64() -> Type {
    Type::Int64
}
pub fn string() -> Type {
    Type::String
}
pub fn blob() -> Type {
    Type::Blob
}
pub fn date() -> Type {
    Type::Date
}
pub fn tuple(types: Vec<Type>) -> Type {
    Type::Tuple(types)
}
pub fn list(elem: Type) -> Type {
    Type::List(Box::new(elem))
}

// ------------- Values -------------
impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}
impl From<u64> for Value {
    fn from(n: u64) -> Value {
        Value::UInt64(n)
    }
}
impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int64(n)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}
impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Value {
        Value::Blob(bytes)
    }
}
impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Value {
        Value::Date(d)
    }
}
pub fn tuple_val(values: Vec<Value>) -> Value {
    Value::Tuple(values)
}
pub fn list_val(values: Vec<Value>) -> Value {
    Value::List(values)
}

pub fn predicate(name: &str, types: Vec<Type>) -> Predicate {
    Predicate::new(name, types)
}
pub fn fact(pred_name: &str, args: Vec<Value>) -> Fact {
    Fact::new(pred_name, args)
}

// ------------- Clauses -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(String),
    Any,
    Val(Value),
}

pub fn var(name: &str) -> Term {
    Term::Var(name.to_string())
}
pub fn any() -> Term {
    Term::Any
}
pub fn val(value: impl Into<Value>) -> Term {
    Term::Val(value.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub pred_name: String,
    pub terms: Vec<Term>,
}

pub fn atom(pred_name: &str, terms: Vec<Term>) -> Atom {
    Atom {
        pred_name: pred_name.to_string(),
        terms,
    }
}

impl Atom {
    fn compile(&self, scope: &mut VarScope) -> Clause {
        let args = self
            .terms
            .iter()
            .map(|term| match term {
                Term::Var(name) => MatchExpr::Var(scope.bind(name)),
                Term::Any => MatchExpr::Unbound,
                Term::Val(value) => MatchExpr::Const(value.clone()),
            })
            .collect();
        Clause::new(self.pred_name.clone(), args)
    }
}

// ------------- Where clauses -------------
/// What the value of a where clause is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Bind(String),
    Skip,
    Eq(Value),
    Each(Box<Pattern>),
    Destructure(Vec<Pattern>),
}

pub fn bind(name: &str) -> Pattern {
    Pattern::Bind(name.to_string())
}
pub fn skip() -> Pattern {
    Pattern::Skip
}
pub fn eq(value: impl Into<Value>) -> Pattern {
    Pattern::Eq(value.into())
}
pub fn each(pattern: Pattern) -> Pattern {
    Pattern::Each(Box::new(pattern))
}
pub fn destructure(patterns: Vec<Pattern>) -> Pattern {
    Pattern::Destructure(patterns)
}

impl Pattern {
    fn compile(&self, scope: &mut VarScope) -> BindExpr {
        match self {
            Pattern::Bind(name) => BindExpr::Var(scope.bind(name)),
            Pattern::Skip => BindExpr::Unbound,
            Pattern::Eq(value) => BindExpr::Const(value.clone()),
            Pattern::Each(inner) => BindExpr::Iterate(Box::new(inner.compile(scope))),
            Pattern::Destructure(parts) => {
                BindExpr::Destructure(parts.iter().map(|p| p.compile(scope)).collect())
            }
        }
    }
}

/// A value computed in a where clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Var(String),
    Lit(Value),
    Call(String, Vec<Expression>),
}

pub fn var_expr(name: &str) -> Expression {
    Expression::Var(name.to_string())
}
pub fn lit(value: impl Into<Value>) -> Expression {
    Expression::Lit(value.into())
}
pub fn call(func: &str, args: Vec<Expression>) -> Expression {
    Expression::Call(func.to_string(), args)
}

impl Expression {
    fn compile(&self, scope: &VarScope) -> Result<Expr> {
        Ok(match self {
            Expression::Var(name) => Expr::Var(scope.lookup(name).ok_or_else(|| {
                Error::Query(format!("variable {} is used before being bound", name))
            })?),
            Expression::Lit(value) => Expr::Val(value.clone()),
            Expression::Call(func, args) => Expr::App(
                func.clone(),
                args.iter()
                    .map(|arg| arg.compile(scope))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

pub fn func<F>(name: &str, inputs: Vec<Type>, output: Type, run: F) -> Func
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    Func {
        name: name.to_string(),
        inputs,
        output,
        run: Arc::new(run),
    }
}

// ------------- Rules and queries -------------
#[derive(Debug, Default)]
struct VarScope {
    names: Vec<String>,
    index: HashMap<String, usize, OtherHasher>,
}

impl VarScope {
    fn bind(&mut self, name: &str) -> usize {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }
    fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

#[derive(Debug, Clone)]
pub struct RuleBuilder {
    name: String,
    head: Option<Atom>,
    body: Vec<Atom>,
    wheres: Vec<(Pattern, Expression)>,
}

pub fn rule(name: &str) -> RuleBuilder {
    RuleBuilder {
        name: name.to_string(),
        head: None,
        body: Vec::new(),
        wheres: Vec::new(),
    }
}

impl RuleBuilder {
    pub fn head(mut self, head: Atom) -> Self {
        self.head = Some(head);
        self
    }
    pub fn when(mut self, clause: Atom) -> Self {
        self.body.push(clause);
        self
    }
    pub fn bind(mut self, pattern: Pattern, expr: Expression) -> Self {
        self.wheres.push((pattern, expr));
        self
    }
    /// Numbers the variables (body first, then where clauses) and checks
    /// that every variable the head or an expression reads is bound.
    pub fn build(&self) -> Result<Rule> {
        let head = self
            .head
            .as_ref()
            .ok_or_else(|| Error::Query(format!("rule {} has no head", self.name)))?;
        let mut scope = VarScope::default();
        let body: Vec<Clause> = self.body.iter().map(|a| a.compile(&mut scope)).collect();
        let mut wheres = Vec::with_capacity(self.wheres.len());
        for (pattern, expr) in &self.wheres {
            let rhs = expr.compile(&scope)?;
            let lhs = pattern.compile(&mut scope);
            wheres.push(WhereClause { lhs, rhs });
        }
        let mut head_args = Vec::with_capacity(head.terms.len());
        for term in &head.terms {
            head_args.push(match term {
                Term::Var(name) => MatchExpr::Var(scope.lookup(name).ok_or_else(|| {
                    Error::Query(format!(
                        "variable {} in the head of {} is never bound",
                        name, self.name
                    ))
                })?),
                Term::Any => {
                    return Err(Error::Query(format!(
                        "the head of {} contains a wildcard",
                        self.name
                    )));
                }
                Term::Val(value) => MatchExpr::Const(value.clone()),
            });
        }
        Ok(Rule {
            name: self.name.clone(),
            head: Clause::new(head.pred_name.clone(), head_args),
            body,
            wheres,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    atoms: Vec<Atom>,
}

pub fn query(atoms: Vec<Atom>) -> Query {
    Query { atoms }
}

impl Query {
    /// Variable names by number, and the numbered clauses.
    pub fn compile(&self) -> (Vec<String>, Vec<Clause>) {
        let mut scope = VarScope::default();
        let clauses = self.atoms.iter().map(|a| a.compile(&mut scope)).collect();
        (scope.names, clauses)
    }
}

/// One solution of a query, with its variables in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bindings {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Bindings {
    pub fn new(names: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { names, values }
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.values[idx])
    }
    pub fn names(&self) -> &[String] {
        &self.names
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_number_by_first_appearance() {
        let (names, clauses) = query(vec![
            atom("edge", vec![var("b"), var("a")]),
            atom("edge", vec![var("a"), any()]),
        ])
        .compile();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(clauses[1].args, vec![MatchExpr::Var(1), MatchExpr::Unbound]);
    }

    #[test]
    fn where_variables_follow_body_variables() {
        let rule = rule("bump")
            .head(atom("out", vec![var("n"), var("m")]))
            .when(atom("raw", vec![var("n"), var("v")]))
            .bind(bind("m"), call("plus_two", vec![var_expr("v")]))
            .build()
            .unwrap();
        assert_eq!(rule.wheres[0].lhs, BindExpr::Var(2));
        assert_eq!(rule.wheres[0].rhs, Expr::App("plus_two".into(), vec![Expr::Var(1)]));
        assert_eq!(rule.head.args, vec![MatchExpr::Var(0), MatchExpr::Var(2)]);
    }

    #[test]
    fn unbound_head_variable_is_rejected() {
        let err = rule("broken")
            .head(atom("out", vec![var("z")]))
            .when(atom("raw", vec![var("n")]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn expression_reading_unbound_variable_is_rejected() {
        let err = rule("broken")
            .head(atom("out", vec![var("n")]))
            .when(atom("raw", vec![var("n")]))
            .bind(bind("m"), var_expr("q"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }
}
