//! The Holmes evaluator.
//!
//! The [`Engine`] owns a fact database and everything that is not a fact:
//! named types, bound functions and rules. Facts derived by rules are
//! materialized into the same fact database they were derived from, so a
//! query is answered by first bringing the store to fixpoint and then running
//! an ordinary search.
//!
//! Fixpoint evaluation works off a worklist of rules. Every rule is scheduled
//! for the first round; after that, a rule is scheduled again only when a
//! predicate in its body gained facts during the previous round, and it is
//! then only joined through those new facts. Each round's facts are stored as
//! one batch. Evaluation ends after a round that adds nothing, or fails once
//! [`EngineSettings::max_iterations`] rounds have passed without getting there.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fact_db::{bind_var_type, check_query, validate_name, Clause, Fact, FactDB, MatchExpr, Predicate};
use crate::mem_db::OtherHasher;
use crate::types::{Type, Value};

pub type FuncBody = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A native function callable from where clauses.
#[derive(Clone)]
pub struct Func {
    pub name: String,
    pub inputs: Vec<Type>,
    pub output: Type,
    pub run: FuncBody,
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inputs: Vec<String> = self.inputs.iter().map(|t| t.to_string()).collect();
        write!(f, "{} : [{}] -> {}", self.name, inputs.join(", "), self.output)
    }
}

/// Right hand side of a where clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Var(usize),
    Val(Value),
    App(String, Vec<Expr>),
}

/// Left hand side of a where clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindExpr {
    Unbound,
    Var(usize),
    /// Keeps the solution only if the value equals this one.
    Const(Value),
    Destructure(Vec<BindExpr>),
    /// Binds each element of a list, one solution per element.
    Iterate(Box<BindExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereClause {
    pub lhs: BindExpr,
    pub rhs: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub head: Clause,
    pub body: Vec<Clause>,
    pub wheres: Vec<WhereClause>,
}

impl Rule {
    fn predicates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.head.pred_name.as_str())
            .chain(self.body.iter().map(|c| c.pred_name.as_str()))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let body: Vec<String> = self.body.iter().map(|c| c.to_string()).collect();
        write!(f, "{}: {} <= {}", self.name, self.head, body.join(", "))?;
        if !self.wheres.is_empty() {
            write!(f, " where ({} bindings)", self.wheres.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on fixpoint rounds per query.
    pub max_iterations: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { max_iterations: 10_000 }
    }
}

pub struct Engine {
    db: Box<dyn FactDB>,
    settings: EngineSettings,
    types: HashMap<String, Type, OtherHasher>,
    funcs: HashMap<String, Func, OtherHasher>,
    rules: Vec<Rule>,
    rule_by_name: HashMap<String, usize, OtherHasher>,
    // body predicate -> rules to reschedule when it grows
    rules_by_body_pred: HashMap<String, Vec<usize>, OtherHasher>,
    // facts or rules changed since the last completed fixpoint
    stale: bool,
}

impl Engine {
    pub fn new(db: Box<dyn FactDB>, settings: EngineSettings) -> Self {
        Self {
            db,
            settings,
            types: Type::scalars()
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
            funcs: HashMap::default(),
            rules: Vec::new(),
            rule_by_name: HashMap::default(),
            rules_by_body_pred: HashMap::default(),
            stale: false,
        }
    }
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
    pub fn db(&self) -> &dyn FactDB {
        self.db.as_ref()
    }

    /// Registers a named type, typically an alias for a composite one.
    pub fn add_type(&mut self, name: &str, ty: Type) -> Result<()> {
        validate_name(name)?;
        if self.types.contains_key(name) {
            return Err(Error::TypeExists(name.to_string()));
        }
        debug!(name, %ty, "registering type");
        self.types.insert(name.to_string(), ty);
        Ok(())
    }
    pub fn get_type(&self, name: &str) -> Option<Type> {
        self.types.get(name).cloned()
    }

    pub fn new_predicate(&mut self, pred: &Predicate) -> Result<()> {
        self.db.new_predicate(pred)
    }
    pub fn get_predicate(&self, name: &str) -> Option<Predicate> {
        self.db.get_predicate(name)
    }
    pub fn predicates(&self) -> Vec<Predicate> {
        self.db.predicates()
    }

    /// Adds a base fact, returning false if it was already known.
    pub fn new_fact(&mut self, fact: &Fact) -> Result<bool> {
        let inserted = self.db.insert_fact(fact)?;
        if inserted {
            self.stale = true;
        }
        Ok(inserted)
    }

    pub fn new_func(&mut self, func: Func) -> Result<()> {
        validate_name(&func.name)?;
        if self.funcs.contains_key(&func.name) {
            return Err(Error::FunctionExists(func.name));
        }
        debug!(func = ?func, "registering function");
        self.funcs.insert(func.name.clone(), func);
        Ok(())
    }
    pub fn get_func(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }

    pub fn new_rule(&mut self, rule: Rule) -> Result<()> {
        self.check_rule(&rule)?;
        if let Some(idx) = self.rule_by_name.get(&rule.name) {
            return if self.rules[*idx] == rule {
                Ok(())
            } else {
                Err(Error::RuleConflict(rule.name))
            };
        }
        debug!(rule = %rule, "registering rule");
        let idx = self.rules.len();
        let mut body_preds: Vec<&str> = rule.body.iter().map(|c| c.pred_name.as_str()).collect();
        body_preds.sort_unstable();
        body_preds.dedup();
        for pred_name in body_preds {
            self.rules_by_body_pred
                .entry(pred_name.to_string())
                .or_default()
                .push(idx);
        }
        self.rule_by_name.insert(rule.name.clone(), idx);
        self.rules.push(rule);
        self.stale = true;
        Ok(())
    }
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Answers a conjunctive query against the closure of the facts under all
    /// registered rules. Solutions list values by variable number.
    pub fn query(&mut self, query: &[Clause]) -> Result<Vec<Vec<Value>>> {
        let preds = self.lookup_predicates(query.iter().map(|c| c.pred_name.as_str()))?;
        check_query(query, |name| preds.get(name))?;
        for rule in &self.rules {
            self.lookup_predicates(rule.predicates())?;
        }
        self.derive()?;
        self.db.search_facts(query)
    }

    /// Releases the fact database.
    pub fn close(self) -> Result<()> {
        self.db.close()
    }

    fn lookup_predicates<'a>(
        &self,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, Predicate, OtherHasher>> {
        let mut preds = HashMap::default();
        for name in names {
            if !preds.contains_key(name) {
                let pred = self
                    .db
                    .get_predicate(name)
                    .ok_or_else(|| Error::UnknownPredicate(name.to_string()))?;
                preds.insert(name.to_string(), pred);
            }
        }
        Ok(preds)
    }

    // ------------- Validation -------------
    fn check_rule(&self, rule: &Rule) -> Result<()> {
        validate_name(&rule.name)?;
        if rule.body.is_empty() {
            return Err(Error::Query(format!("rule {} has an empty body", rule.name)));
        }
        let preds = self.lookup_predicates(rule.predicates())?;
        let mut var_types = check_query(&rule.body, |name| preds.get(name))?;
        for where_clause in &rule.wheres {
            let ty = self.type_of_expr(&where_clause.rhs, &var_types)?;
            check_bind(&where_clause.lhs, &ty, &mut var_types)?;
        }
        let head_pred = &preds[rule.head.pred_name.as_str()];
        if head_pred.arity() != rule.head.args.len() {
            return Err(Error::Arity {
                predicate: head_pred.name.clone(),
                expected: head_pred.arity(),
                found: rule.head.args.len(),
            });
        }
        for (idx, (slot, ty)) in rule.head.args.iter().zip(head_pred.types.iter()).enumerate() {
            match slot {
                MatchExpr::Unbound => {
                    return Err(Error::Query(format!(
                        "argument {} in the head of {} is a wildcard",
                        idx, rule.name
                    )));
                }
                MatchExpr::Const(value) => {
                    if !value.type_check(ty) {
                        return Err(Error::Type(format!(
                            "argument {} of {} expects {}, got {}",
                            idx, head_pred.name, ty, value
                        )));
                    }
                }
                MatchExpr::Var(v) => match var_types.get(*v) {
                    None => {
                        return Err(Error::Query(format!(
                            "variable {} in the head of {} is never bound",
                            v, rule.name
                        )));
                    }
                    Some(bound) if bound != ty => {
                        return Err(Error::Type(format!(
                            "variable {} has type {} but argument {} of {} expects {}",
                            v, bound, idx, head_pred.name, ty
                        )));
                    }
                    Some(_) => (),
                },
            }
        }
        Ok(())
    }

    fn type_of_expr(&self, expr: &Expr, var_types: &[Type]) -> Result<Type> {
        match expr {
            Expr::Var(v) => var_types
                .get(*v)
                .cloned()
                .ok_or_else(|| Error::Query(format!("variable {} is used before being bound", v))),
            Expr::Val(value) => value
                .type_of()
                .ok_or_else(|| Error::Type(format!("the type of {} cannot be inferred", value))),
            Expr::App(name, args) => {
                let func = self
                    .funcs
                    .get(name)
                    .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
                if func.inputs.len() != args.len() {
                    return Err(Error::Type(format!(
                        "{} takes {} arguments, got {}",
                        name,
                        func.inputs.len(),
                        args.len()
                    )));
                }
                for (idx, (arg, input)) in args.iter().zip(func.inputs.iter()).enumerate() {
                    let fits = match arg {
                        Expr::Val(value) => value.type_check(input),
                        _ => &self.type_of_expr(arg, var_types)? == input,
                    };
                    if !fits {
                        return Err(Error::Type(format!(
                            "argument {} of {} expects {}",
                            idx, name, input
                        )));
                    }
                }
                Ok(func.output.clone())
            }
        }
    }

    // ------------- Evaluation -------------
    fn derive(&mut self) -> Result<()> {
        if !self.stale {
            return Ok(());
        }
        let mut scheduled: BTreeSet<usize> = (0..self.rules.len()).collect();
        // facts new in the previous round, by predicate; none before the first
        let mut delta: Option<Delta> = None;
        let mut rounds = 0;
        let mut derived = 0;
        while !scheduled.is_empty() {
            if rounds == self.settings.max_iterations {
                return Err(Error::FixpointLimit(rounds));
            }
            rounds += 1;
            let mut found = Vec::new();
            for idx in &scheduled {
                let rule = &self.rules[*idx];
                let solutions = match &delta {
                    None => self.db.search_facts(&rule.body)?,
                    Some(delta) => self.delta_solutions(rule, delta)?,
                };
                found.extend(self.eval_rule(rule, solutions)?);
            }
            let inserted = self.db.insert_facts(found)?;
            derived += inserted.len();
            let mut grown = Delta::default();
            for fact in inserted {
                grown.entry(fact.pred_name.clone()).or_default().push(fact);
            }
            debug!(round = rounds, grown = grown.len(), "fixpoint round");
            scheduled = grown
                .keys()
                .filter_map(|pred_name| self.rules_by_body_pred.get(pred_name))
                .flatten()
                .copied()
                .collect();
            delta = Some(grown);
        }
        info!(rounds, derived, "fixpoint reached");
        self.stale = false;
        Ok(())
    }

    /// Body solutions that use at least one fact from `delta`. Each body
    /// clause in turn is matched against the new facts only, and the rest of
    /// the body is searched with the variables it bound fixed.
    fn delta_solutions(&self, rule: &Rule, delta: &Delta) -> Result<Vec<Vec<Value>>> {
        let width = body_width(&rule.body);
        let mut seen: HashSet<Vec<Value>, OtherHasher> = HashSet::default();
        let mut solutions = Vec::new();
        for (pos, clause) in rule.body.iter().enumerate() {
            let Some(facts) = delta.get(&clause.pred_name) else {
                continue;
            };
            let rest: Vec<&Clause> = rule
                .body
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != pos)
                .map(|(_, c)| c)
                .collect();
            for fact in facts {
                let mut bound: Vec<Option<Value>> = vec![None; width];
                if !unify(clause, &fact.args, &mut bound) {
                    continue;
                }
                let (search, renumbered) = specialize(&rest, &bound);
                let partials = if search.is_empty() {
                    vec![Vec::new()]
                } else {
                    self.db.search_facts(&search)?
                };
                for partial in partials {
                    let mut full = bound.clone();
                    for (value, v) in partial.into_iter().zip(renumbered.iter()) {
                        full[*v] = Some(value);
                    }
                    if let Some(solution) = full.into_iter().collect::<Option<Vec<Value>>>() {
                        if seen.insert(solution.clone()) {
                            solutions.push(solution);
                        }
                    }
                }
            }
        }
        Ok(solutions)
    }

    fn eval_rule(&self, rule: &Rule, mut solutions: Vec<Vec<Value>>) -> Result<Vec<Fact>> {
        for where_clause in &rule.wheres {
            let mut next = Vec::new();
            for solution in solutions {
                let value = self.eval_expr(&where_clause.rhs, &solution)?;
                bind(&where_clause.lhs, value, solution, &mut next);
            }
            solutions = next;
        }
        Ok(solutions
            .iter()
            .map(|solution| {
                let args = rule
                    .head
                    .args
                    .iter()
                    .map(|slot| match slot {
                        MatchExpr::Var(v) => solution[*v].clone(),
                        MatchExpr::Const(value) => value.clone(),
                        // rejected when the rule was registered
                        MatchExpr::Unbound => unreachable!("wildcard in rule head"),
                    })
                    .collect();
                Fact::new(rule.head.pred_name.clone(), args)
            })
            .collect())
    }

    fn eval_expr(&self, expr: &Expr, solution: &[Value]) -> Result<Value> {
        match expr {
            Expr::Var(v) => Ok(solution[*v].clone()),
            Expr::Val(value) => Ok(value.clone()),
            Expr::App(name, args) => {
                let func = self
                    .funcs
                    .get(name)
                    .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, solution))
                    .collect::<Result<Vec<_>>>()?;
                let result = (func.run)(&args);
                if result.type_check(&func.output) {
                    Ok(result)
                } else {
                    Err(Error::Type(format!(
                        "{} returned {}, declared to return {}",
                        name, result, func.output
                    )))
                }
            }
        }
    }
}

type Delta = HashMap<String, Vec<Fact>, OtherHasher>;

fn body_width(body: &[Clause]) -> usize {
    body.iter()
        .flat_map(|c| c.args.iter())
        .filter_map(|slot| match slot {
            MatchExpr::Var(v) => Some(v + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

/// Matches a clause against a fact, recording the variables it binds.
fn unify(clause: &Clause, args: &[Value], bound: &mut [Option<Value>]) -> bool {
    for (slot, value) in clause.args.iter().zip(args.iter()) {
        match slot {
            MatchExpr::Unbound => (),
            MatchExpr::Const(expected) => {
                if expected != value {
                    return false;
                }
            }
            MatchExpr::Var(v) => match &bound[*v] {
                Some(prev) if prev != value => return false,
                Some(_) => (),
                None => bound[*v] = Some(value.clone()),
            },
        }
    }
    true
}

/// Rewrites clauses with bound variables turned into constants and the
/// remaining ones renumbered from zero. Also returns, for each new variable
/// number, the variable it stands for.
fn specialize(clauses: &[&Clause], bound: &[Option<Value>]) -> (Vec<Clause>, Vec<usize>) {
    let mut renumbered: Vec<usize> = Vec::new();
    let mut search = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let mut args = Vec::with_capacity(clause.args.len());
        for slot in &clause.args {
            args.push(match slot {
                MatchExpr::Var(v) => match &bound[*v] {
                    Some(value) => MatchExpr::Const(value.clone()),
                    None => match renumbered.iter().position(|orig| orig == v) {
                        Some(n) => MatchExpr::Var(n),
                        None => {
                            renumbered.push(*v);
                            MatchExpr::Var(renumbered.len() - 1)
                        }
                    },
                },
                other => other.clone(),
            });
        }
        search.push(Clause::new(clause.pred_name.clone(), args));
    }
    (search, renumbered)
}

fn check_bind(bind: &BindExpr, ty: &Type, var_types: &mut Vec<Type>) -> Result<()> {
    match (bind, ty) {
        (BindExpr::Unbound, _) => Ok(()),
        (BindExpr::Var(v), _) => bind_var_type(*v, ty, var_types),
        (BindExpr::Const(value), _) => {
            if value.type_check(ty) {
                Ok(())
            } else {
                Err(Error::Type(format!("{} cannot match a value of type {}", value, ty)))
            }
        }
        (BindExpr::Destructure(binds), Type::Tuple(types)) if binds.len() == types.len() => {
            for (bind, ty) in binds.iter().zip(types.iter()) {
                check_bind(bind, ty, var_types)?;
            }
            Ok(())
        }
        (BindExpr::Iterate(bind), Type::List(elem)) => check_bind(bind, elem, var_types),
        (BindExpr::Destructure(binds), _) => Err(Error::Type(format!(
            "cannot destructure {} into {} parts",
            ty,
            binds.len()
        ))),
        (BindExpr::Iterate(_), _) => Err(Error::Type(format!("cannot iterate over {}", ty))),
    }
}

/// Matches `value` against a binding pattern, pushing every extended solution.
fn bind(bind_expr: &BindExpr, value: Value, mut solution: Vec<Value>, out: &mut Vec<Vec<Value>>) {
    match bind_expr {
        BindExpr::Unbound => out.push(solution),
        BindExpr::Var(v) => {
            if *v < solution.len() {
                if solution[*v] == value {
                    out.push(solution);
                }
            } else {
                solution.push(value);
                out.push(solution);
            }
        }
        BindExpr::Const(expected) => {
            if *expected == value {
                out.push(solution);
            }
        }
        BindExpr::Destructure(binds) => {
            if let Value::Tuple(items) = value {
                let mut partials = vec![solution];
                for (inner, item) in binds.iter().zip(items) {
                    let mut next = Vec::new();
                    for partial in partials {
                        bind(inner, item.clone(), partial, &mut next);
                    }
                    partials = next;
                }
                out.extend(partials);
            }
        }
        BindExpr::Iterate(inner) => {
            if let Value::List(items) = value {
                for item in items {
                    bind(inner, item, solution.clone(), out);
                }
            }
        }
    }
}
