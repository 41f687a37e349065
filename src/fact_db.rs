//! The fact database interface.
//!
//! A [`FactDB`] stores facts under registered predicates and answers
//! conjunctive searches over them. It knows nothing about rules: the
//! [`crate::engine::Engine`] drives derivation through this interface, so any
//! backend implementing it can host a full Holmes context.
//!
//! Search clauses use numbered variables. Within one search the variables must
//! be numbered `0, 1, 2, ...` in order of first appearance, and every
//! occurrence of a variable must sit at a position of the same type. Both
//! rules are checked by [`check_query`], which all backends share.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{Type, Value};

lazy_static! {
    // names double as table and rule identifiers, so keep them plain
    static ref NAME: Regex = Regex::new(r"^[a-z][a-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub name: String,
    pub types: Vec<Type>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, types: Vec<Type>) -> Self {
        Self { name: name.into(), types }
    }
    pub fn arity(&self) -> usize {
        self.types.len()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let types: Vec<String> = self.types.iter().map(|t| t.to_string()).collect();
        write!(f, "{}({})", self.name, types.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    pub pred_name: String,
    pub args: Vec<Value>,
}

impl Fact {
    pub fn new(pred_name: impl Into<String>, args: Vec<Value>) -> Self {
        Self { pred_name: pred_name.into(), args }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|v| v.to_string()).collect();
        write!(f, "{}({})", self.pred_name, args.join(", "))
    }
}

/// One argument slot of a clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchExpr {
    /// Matches anything and binds nothing.
    Unbound,
    /// Numbered variable.
    Var(usize),
    /// Matches only this value.
    Const(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    pub pred_name: String,
    pub args: Vec<MatchExpr>,
}

impl Clause {
    pub fn new(pred_name: impl Into<String>, args: Vec<MatchExpr>) -> Self {
        Self { pred_name: pred_name.into(), args }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| match arg {
                MatchExpr::Unbound => "_".to_string(),
                MatchExpr::Var(n) => format!("${}", n),
                MatchExpr::Const(v) => v.to_string(),
            })
            .collect();
        write!(f, "{}({})", self.pred_name, args.join(", "))
    }
}

pub trait FactDB: Send {
    /// Registers a predicate. Re-registering an identical signature is a
    /// no-op; a different signature under the same name is a conflict.
    fn new_predicate(&mut self, pred: &Predicate) -> Result<()>;
    fn get_predicate(&self, name: &str) -> Option<Predicate>;
    fn predicates(&self) -> Vec<Predicate>;
    /// Adds a fact, returning false if it was already present.
    fn insert_fact(&mut self, fact: &Fact) -> Result<bool>;
    /// Adds a batch of facts and returns the ones that were new. Every fact
    /// is checked before any is stored.
    fn insert_facts(&mut self, facts: Vec<Fact>) -> Result<Vec<Fact>> {
        for fact in &facts {
            check_fact(self.get_predicate(&fact.pred_name).as_ref(), fact)?;
        }
        let mut inserted = Vec::new();
        for fact in facts {
            if self.insert_fact(&fact)? {
                inserted.push(fact);
            }
        }
        Ok(inserted)
    }
    /// Finds every distinct assignment of the query variables satisfying all
    /// clauses. Each solution lists values by variable number.
    fn search_facts(&self, query: &[Clause]) -> Result<Vec<Vec<Value>>>;
    /// Releases the storage. Dropping a backend releases it as well, but
    /// closing explicitly surfaces errors raised while doing so.
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName(format!(
            "{:?}: use lowercase letters, digits and underscores, starting with a letter",
            name
        )))
    }
}

/// Shared registration policy: `Ok(true)` when the predicate is new,
/// `Ok(false)` when an identical one is already known.
pub fn check_new_predicate(existing: Option<&Predicate>, pred: &Predicate) -> Result<bool> {
    validate_name(&pred.name)?;
    match existing {
        None => Ok(true),
        Some(known) if known.types == pred.types => Ok(false),
        Some(_) => Err(Error::PredicateConflict(pred.name.clone())),
    }
}

pub fn check_fact(pred: Option<&Predicate>, fact: &Fact) -> Result<()> {
    let pred = pred.ok_or_else(|| Error::UnknownPredicate(fact.pred_name.clone()))?;
    if pred.arity() != fact.args.len() {
        return Err(Error::Arity {
            predicate: pred.name.clone(),
            expected: pred.arity(),
            found: fact.args.len(),
        });
    }
    for (idx, (value, ty)) in fact.args.iter().zip(pred.types.iter()).enumerate() {
        if !value.type_check(ty) {
            return Err(Error::Type(format!(
                "argument {} of {} expects {}, got {}",
                idx, pred.name, ty, value
            )));
        }
    }
    Ok(())
}

/// Checks a conjunction against the registered predicates and returns the
/// type of every variable, indexed by variable number.
pub fn check_query<'a, F>(query: &[Clause], lookup: F) -> Result<Vec<Type>>
where
    F: Fn(&str) -> Option<&'a Predicate>,
{
    if query.is_empty() {
        return Err(Error::Query("empty search query".to_string()));
    }
    let mut var_types: Vec<Type> = Vec::new();
    for clause in query {
        let pred = lookup(&clause.pred_name)
            .ok_or_else(|| Error::UnknownPredicate(clause.pred_name.clone()))?;
        check_clause(pred, clause, &mut var_types)?;
    }
    Ok(var_types)
}

/// Checks one clause, extending `var_types` with the variables it introduces.
pub fn check_clause(pred: &Predicate, clause: &Clause, var_types: &mut Vec<Type>) -> Result<()> {
    if pred.arity() != clause.args.len() {
        return Err(Error::Arity {
            predicate: pred.name.clone(),
            expected: pred.arity(),
            found: clause.args.len(),
        });
    }
    for (idx, slot) in clause.args.iter().enumerate() {
        let ty = &pred.types[idx];
        match slot {
            MatchExpr::Unbound => (),
            MatchExpr::Const(value) => {
                if !value.type_check(ty) {
                    return Err(Error::Type(format!(
                        "argument {} of {} expects {}, got {}",
                        idx, pred.name, ty, value
                    )));
                }
            }
            MatchExpr::Var(v) => bind_var_type(*v, ty, var_types)?,
        }
    }
    Ok(())
}

pub(crate) fn bind_var_type(v: usize, ty: &Type, var_types: &mut Vec<Type>) -> Result<()> {
    if v == var_types.len() {
        var_types.push(ty.clone());
        Ok(())
    } else if v > var_types.len() {
        Err(Error::Query(format!(
            "hole between {} and {} in variable numbering",
            var_types.len() as isize - 1,
            v
        )))
    } else if &var_types[v] != ty {
        Err(Error::Type(format!(
            "variable {} would unify incompatible types {} and {}",
            v, var_types[v], ty
        )))
    } else {
        Ok(())
    }
}
