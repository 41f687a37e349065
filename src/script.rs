//! The Holmes script language.
//!
//! Scripts are `;` separated statements, parsed in full before anything runs:
//!
//! ```text
//! type pair = (string, uint64);
//! predicate edge(string, string);
//! fact edge("a", "b");
//! rule path_base: path(X, Y) <= edge(X, Y);
//! rule path_step: path(X, Z) <= path(X, Y), edge(Y, Z);
//! rule bump: score(N, M) <= raw(N, V) where M = plus_two(V);
//! query path("a", X);
//! ```
//!
//! Literals take the type expected where they appear, so `7` is a `uint64`
//! in a `uint64` slot and an `int64` in an `int64` one. The grammar lives in
//! `script.pest`.

use std::collections::HashMap;

use chrono::NaiveDate;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::debug;

use crate::context::Holmes;
use crate::edsl::{self, Atom, Expression, Pattern, Term};
use crate::error::{Error, Result};
use crate::fact_db::{Fact, Predicate};
use crate::mem_db::OtherHasher;
use crate::types::{from_hex, Type, Value};

#[derive(Parser)]
#[grammar = "script.pest"]
struct ScriptParser;

/// Answers to one `query` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

type VarTypes = HashMap<String, Type, OtherHasher>;

fn parse(rule: Rule, source: &str) -> Result<Pair<'_, Rule>> {
    let mut pairs = ScriptParser::parse(rule, source).map_err(|e| {
        let (line, col) = match e.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        Error::Parse {
            message: e.variant.message().to_string(),
            line: Some(line),
            col: Some(col),
        }
    })?;
    pairs.next().ok_or_else(|| Error::Parse {
        message: "empty input".to_string(),
        line: None,
        col: None,
    })
}

fn invalid(pair: &Pair<Rule>, message: String) -> Error {
    let (line, col) = pair.line_col();
    Error::Parse {
        message,
        line: Some(line),
        col: Some(col),
    }
}

/// Parses a type rendering such as `(string, [uint64])`, naming scalars only.
pub fn parse_type(source: &str) -> Result<Type> {
    let pair = parse(Rule::type_only, source)?;
    let scalars = Type::scalars();
    let resolve = |name: &str| {
        scalars
            .iter()
            .find(|(scalar, _)| *scalar == name)
            .map(|(_, ty)| ty.clone())
    };
    match pair.into_inner().next() {
        Some(ty) => lower_type(ty, &resolve),
        None => Err(Error::Parse {
            message: "missing type".to_string(),
            line: None,
            col: None,
        }),
    }
}

/// Runs every statement of a script against a context, in order.
pub fn execute(holmes: &mut Holmes, source: &str) -> Result<Vec<QueryOutput>> {
    let script = parse(Rule::script, source)?;
    let mut outputs = Vec::new();
    for statement in script.into_inner() {
        match statement.as_rule() {
            Rule::type_decl => type_decl(holmes, statement)?,
            Rule::predicate_decl => predicate_decl(holmes, statement)?,
            Rule::fact_stmt => fact_stmt(holmes, statement)?,
            Rule::rule_stmt => rule_stmt(holmes, statement)?,
            Rule::query_stmt => outputs.push(query_stmt(holmes, statement)?),
            _ => (),
        }
    }
    Ok(outputs)
}

// ------------- Statements -------------
fn type_decl(holmes: &mut Holmes, pair: Pair<Rule>) -> Result<()> {
    let mut inner = pair.into_inner();
    let (name, ty) = match (inner.next(), inner.next()) {
        (Some(name), Some(ty)) => (name.as_str().to_string(), ty),
        _ => return Err(Error::Query("incomplete type declaration".to_string())),
    };
    let ty = lower_type(ty, &|n: &str| holmes.get_type(n))?;
    holmes.add_type(&name, ty)
}

fn predicate_decl(holmes: &mut Holmes, pair: Pair<Rule>) -> Result<()> {
    let mut inner = pair.into_inner();
    let name = next_name(&mut inner)?;
    let types = inner
        .map(|ty| lower_type(ty, &|n: &str| holmes.get_type(n)))
        .collect::<Result<Vec<_>>>()?;
    holmes.new_predicate(&Predicate::new(name, types))
}

fn fact_stmt(holmes: &mut Holmes, pair: Pair<Rule>) -> Result<()> {
    let mut inner = pair.into_inner();
    let name = next_name(&mut inner)?;
    let types = predicate_types(holmes, &name);
    let args = inner
        .enumerate()
        .map(|(idx, lit)| literal(lit, types.get(idx)))
        .collect::<Result<Vec<_>>>()?;
    holmes.new_fact(&Fact::new(name, args))?;
    Ok(())
}

fn rule_stmt(holmes: &mut Holmes, pair: Pair<Rule>) -> Result<()> {
    let mut inner = pair.into_inner();
    let name = next_name(&mut inner)?;
    let mut atoms = Vec::new();
    let mut bindings = Vec::new();
    for part in inner {
        match part.as_rule() {
            Rule::atom => atoms.push(part),
            _ => bindings.push(part),
        }
    }
    let mut atoms = atoms.into_iter();
    let head = match atoms.next() {
        Some(head) => head,
        None => return Err(Error::Query(format!("rule {} has no head", name))),
    };
    let head = lower_atom(holmes, head, None)?;
    let mut var_types = VarTypes::default();
    let mut builder = edsl::rule(&name).head(head);
    for body in atoms {
        builder = builder.when(lower_atom(holmes, body, Some(&mut var_types))?);
    }
    for binding in bindings {
        let mut sides = binding.into_inner();
        let (lhs, rhs) = match (sides.next(), sides.next()) {
            (Some(lhs), Some(rhs)) => (lhs, rhs),
            _ => return Err(Error::Query(format!("incomplete where clause in {}", name))),
        };
        let (expr, ty) = lower_expr(holmes, rhs, None, &var_types)?;
        let pattern = lower_pattern(lhs, ty.as_ref(), &mut var_types)?;
        builder = builder.bind(pattern, expr);
    }
    debug!(rule = %name, "script rule");
    holmes.new_rule(builder)
}

fn query_stmt(holmes: &mut Holmes, pair: Pair<Rule>) -> Result<QueryOutput> {
    let atoms = pair
        .into_inner()
        .map(|atom| lower_atom(holmes, atom, None))
        .collect::<Result<Vec<_>>>()?;
    let (columns, clauses) = edsl::query(atoms).compile();
    let rows = holmes.query_clauses(&clauses)?;
    Ok(QueryOutput { columns, rows })
}

// ------------- Lowering -------------
fn next_name(inner: &mut pest::iterators::Pairs<Rule>) -> Result<String> {
    inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| Error::Query("statement is missing a name".to_string()))
}

fn predicate_types(holmes: &Holmes, name: &str) -> Vec<Type> {
    holmes
        .engine()
        .get_predicate(name)
        .map(|p| p.types)
        .unwrap_or_default()
}

fn lower_type(pair: Pair<Rule>, resolve: &dyn Fn(&str) -> Option<Type>) -> Result<Type> {
    let inner = match pair.as_rule() {
        Rule::type_expr => match pair.into_inner().next() {
            Some(inner) => inner,
            None => return Err(Error::Query("empty type".to_string())),
        },
        _ => pair,
    };
    match inner.as_rule() {
        Rule::tuple_type => Ok(Type::Tuple(
            inner
                .into_inner()
                .map(|t| lower_type(t, resolve))
                .collect::<Result<Vec<_>>>()?,
        )),
        Rule::list_type => match inner.into_inner().next() {
            Some(elem) => Ok(Type::List(Box::new(lower_type(elem, resolve)?))),
            None => Err(Error::Query("list type without element type".to_string())),
        },
        _ => resolve(inner.as_str()).ok_or_else(|| Error::UnknownType(inner.as_str().to_string())),
    }
}

/// Lowers a clause; body clauses also record the types of their variables.
fn lower_atom(holmes: &Holmes, pair: Pair<Rule>, var_types: Option<&mut VarTypes>) -> Result<Atom> {
    let mut inner = pair.into_inner();
    let name = next_name(&mut inner)?;
    let types = predicate_types(holmes, &name);
    let mut terms = Vec::new();
    let mut seen = Vec::new();
    for (idx, term) in inner.enumerate() {
        terms.push(match term.as_rule() {
            Rule::wildcard => Term::Any,
            Rule::variable => {
                if let Some(ty) = types.get(idx) {
                    seen.push((term.as_str().to_string(), ty.clone()));
                }
                Term::Var(term.as_str().to_string())
            }
            _ => Term::Val(literal(term, types.get(idx))?),
        });
    }
    if let Some(var_types) = var_types {
        for (var, ty) in seen {
            var_types.entry(var).or_insert(ty);
        }
    }
    Ok(edsl::atom(&name, terms))
}

/// Lowers an expression, returning it with its type when that is known.
fn lower_expr(
    holmes: &Holmes,
    pair: Pair<Rule>,
    expected: Option<&Type>,
    var_types: &VarTypes,
) -> Result<(Expression, Option<Type>)> {
    let inner = match pair.as_rule() {
        Rule::expr => match pair.into_inner().next() {
            Some(inner) => inner,
            None => return Err(Error::Query("empty expression".to_string())),
        },
        _ => pair,
    };
    match inner.as_rule() {
        Rule::variable => {
            let var = inner.as_str();
            Ok((edsl::var_expr(var), var_types.get(var).cloned()))
        }
        Rule::call => {
            let mut parts = inner.into_inner();
            let name = next_name(&mut parts)?;
            let func = holmes
                .engine()
                .get_func(&name)
                .ok_or_else(|| Error::UnknownFunction(name.clone()))?;
            let (inputs, output) = (func.inputs.clone(), func.output.clone());
            let args = parts
                .enumerate()
                .map(|(idx, arg)| {
                    lower_expr(holmes, arg, inputs.get(idx), var_types).map(|(expr, _)| expr)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((edsl::call(&name, args), Some(output)))
        }
        _ => {
            let value = literal(inner, expected)?;
            let ty = value.type_of();
            Ok((Expression::Lit(value), ty))
        }
    }
}

fn lower_pattern(pair: Pair<Rule>, expected: Option<&Type>, var_types: &mut VarTypes) -> Result<Pattern> {
    let inner = match pair.as_rule() {
        Rule::pattern => match pair.into_inner().next() {
            Some(inner) => inner,
            None => return Err(Error::Query("empty pattern".to_string())),
        },
        _ => pair,
    };
    Ok(match inner.as_rule() {
        Rule::wildcard => edsl::skip(),
        Rule::variable => {
            let var = inner.as_str();
            if let Some(ty) = expected {
                var_types.entry(var.to_string()).or_insert_with(|| ty.clone());
            }
            edsl::bind(var)
        }
        Rule::each_pattern => {
            let elem = match expected {
                Some(Type::List(elem)) => Some(elem.as_ref()),
                _ => None,
            };
            match inner.into_inner().next() {
                Some(p) => edsl::each(lower_pattern(p, elem, var_types)?),
                None => return Err(Error::Query("empty list pattern".to_string())),
            }
        }
        Rule::destructure_pattern => {
            let parts: Vec<Pair<Rule>> = inner.into_inner().collect();
            let types = match expected {
                Some(Type::Tuple(types)) if types.len() == parts.len() => Some(types),
                _ => None,
            };
            edsl::destructure(
                parts
                    .into_iter()
                    .enumerate()
                    .map(|(idx, p)| lower_pattern(p, types.map(|t| &t[idx]), var_types))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        _ => Pattern::Eq(literal(inner, expected)?),
    })
}

/// Reads a literal, shaping integers by the expected type.
fn literal(pair: Pair<Rule>, expected: Option<&Type>) -> Result<Value> {
    let inner = match pair.as_rule() {
        Rule::literal => match pair.into_inner().next() {
            Some(inner) => inner,
            None => return Err(Error::Query("empty literal".to_string())),
        },
        _ => pair,
    };
    let text = inner.as_str();
    Ok(match inner.as_rule() {
        Rule::string => Value::String(unescape(&text[1..text.len() - 1])),
        Rule::boolean => Value::Bool(text == "true"),
        Rule::integer => {
            let signed = matches!(expected, Some(Type::Int64)) || text.starts_with('-');
            if signed {
                Value::Int64(
                    text.parse()
                        .map_err(|_| invalid(&inner, format!("{} does not fit in int64", text)))?,
                )
            } else {
                Value::UInt64(
                    text.parse()
                        .map_err(|_| invalid(&inner, format!("{} does not fit in uint64", text)))?,
                )
            }
        }
        Rule::blob => {
            let hex = &text[2..text.len() - 1];
            Value::Blob(from_hex(hex).ok_or_else(|| invalid(&inner, format!("bad hex {:?}", hex)))?)
        }
        Rule::date => {
            let date = &text[2..text.len() - 1];
            Value::Date(
                NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|_| invalid(&inner, format!("bad date {:?}", date)))?,
            )
        }
        Rule::tuple_lit => {
            let items: Vec<Pair<Rule>> = inner.into_inner().collect();
            let types = match expected {
                Some(Type::Tuple(types)) if types.len() == items.len() => Some(types),
                _ => None,
            };
            Value::Tuple(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(idx, item)| literal(item, types.map(|t| &t[idx])))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Rule::list_lit => {
            let elem = match expected {
                Some(Type::List(elem)) => Some(elem.as_ref()),
                _ => None,
            };
            Value::List(
                inner
                    .into_inner()
                    .map(|item| literal(item, elem))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        _ => return Err(invalid(&inner, format!("unexpected literal {}", text))),
    })
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
