//! In-memory fact database.
//!
//! Relations are kept the way the rest of the crate keeps things: rows are
//! owned by the relation, a hash set guards uniqueness, and per-column lookups
//! map a value to the set of row ids holding it. Row id sets are roaring
//! bitmaps, so the candidate rows for a clause with several bound slots are
//! found by intersecting bitmaps before any row is touched.

use core::hash::BuildHasherDefault;
use std::collections::{HashMap, HashSet};

use roaring::RoaringTreemap;
use seahash::SeaHasher;
use tracing::debug;

use crate::error::Result;
use crate::fact_db::{check_fact, check_new_predicate, check_query, Clause, Fact, FactDB, MatchExpr, Predicate};
use crate::types::Value;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

type Row = Vec<Value>;

#[derive(Debug)]
struct Relation {
    rows: Vec<Row>,
    kept: HashSet<Row, OtherHasher>,
    columns: Vec<HashMap<Value, RoaringTreemap, OtherHasher>>,
}

impl Relation {
    fn new(arity: usize) -> Self {
        Self {
            rows: Vec::new(),
            kept: HashSet::default(),
            columns: (0..arity).map(|_| HashMap::default()).collect(),
        }
    }
    fn keep(&mut self, row: Row) -> bool {
        if self.kept.contains(&row) {
            return false;
        }
        let id = self.rows.len() as u64;
        for (column, value) in self.columns.iter_mut().zip(row.iter()) {
            column.entry(value.clone()).or_default().insert(id);
        }
        self.kept.insert(row.clone());
        self.rows.push(row);
        true
    }
    /// Row ids whose columns hold the given values, or `None` when nothing
    /// constrains the scan.
    fn candidates(&self, constraints: &[(usize, &Value)]) -> Option<RoaringTreemap> {
        let mut result: Option<RoaringTreemap> = None;
        for (column, value) in constraints {
            let ids = match self.columns[*column].get(*value) {
                Some(ids) => ids,
                None => return Some(RoaringTreemap::new()),
            };
            match result.as_mut() {
                None => result = Some(ids.clone()),
                Some(set) => *set &= ids,
            }
            if result.as_ref().is_some_and(|set| set.is_empty()) {
                break;
            }
        }
        result
    }
    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Fact database held entirely in process memory. Nothing survives the value.
#[derive(Debug, Default)]
pub struct MemDB {
    predicates: HashMap<String, Predicate, OtherHasher>,
    relations: HashMap<String, Relation, OtherHasher>,
}

impl MemDB {
    pub fn new() -> Self {
        Self::default()
    }
    /// Number of facts stored for a predicate.
    pub fn count(&self, pred_name: &str) -> usize {
        self.relations.get(pred_name).map_or(0, Relation::len)
    }

    fn extend(&self, clause: &Clause, partial: &[Value], out: &mut Vec<Vec<Value>>) {
        let relation = match self.relations.get(&clause.pred_name) {
            Some(relation) => relation,
            None => return,
        };
        let constraints: Vec<(usize, &Value)> = clause
            .args
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                MatchExpr::Const(value) => Some((idx, value)),
                MatchExpr::Var(v) if *v < partial.len() => Some((idx, &partial[*v])),
                _ => None,
            })
            .collect();
        let mut try_row = |row: &Row| {
            let mut solution = partial.to_vec();
            for (idx, slot) in clause.args.iter().enumerate() {
                if let MatchExpr::Var(v) = slot {
                    if *v < solution.len() {
                        // repeated variable first bound earlier in this clause
                        if solution[*v] != row[idx] {
                            return;
                        }
                    } else {
                        solution.push(row[idx].clone());
                    }
                }
            }
            out.push(solution);
        };
        match relation.candidates(&constraints) {
            Some(ids) => ids.iter().for_each(|id| try_row(&relation.rows[id as usize])),
            None => relation.rows.iter().for_each(try_row),
        }
    }
}

impl FactDB for MemDB {
    fn new_predicate(&mut self, pred: &Predicate) -> Result<()> {
        if check_new_predicate(self.predicates.get(&pred.name), pred)? {
            debug!(predicate = %pred, "registering predicate in memory");
            self.relations.insert(pred.name.clone(), Relation::new(pred.arity()));
            self.predicates.insert(pred.name.clone(), pred.clone());
        }
        Ok(())
    }
    fn get_predicate(&self, name: &str) -> Option<Predicate> {
        self.predicates.get(name).cloned()
    }
    fn predicates(&self) -> Vec<Predicate> {
        self.predicates.values().cloned().collect()
    }
    fn insert_fact(&mut self, fact: &Fact) -> Result<bool> {
        check_fact(self.predicates.get(&fact.pred_name), fact)?;
        let relation = self
            .relations
            .entry(fact.pred_name.clone())
            .or_insert_with(|| Relation::new(fact.args.len()));
        Ok(relation.keep(fact.args.clone()))
    }
    fn search_facts(&self, query: &[Clause]) -> Result<Vec<Vec<Value>>> {
        check_query(query, |name| self.predicates.get(name))?;
        let mut partials: Vec<Vec<Value>> = vec![Vec::new()];
        for clause in query {
            let mut next = Vec::new();
            for partial in &partials {
                self.extend(clause, partial, &mut next);
            }
            if next.is_empty() {
                return Ok(Vec::new());
            }
            partials = next;
        }
        let mut seen: HashSet<Vec<Value>, OtherHasher> = HashSet::default();
        partials.retain(|solution| seen.insert(solution.clone()));
        Ok(partials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    fn db() -> MemDB {
        let mut db = MemDB::new();
        db.new_predicate(&Predicate::new("edge", vec![Type::String, Type::String]))
            .unwrap();
        for (a, b) in [("a", "b"), ("b", "c"), ("a", "c"), ("c", "c")] {
            db.insert_fact(&Fact::new("edge", vec![Value::String(a.into()), Value::String(b.into())]))
                .unwrap();
        }
        db
    }

    #[test]
    fn constants_narrow_by_index() {
        let db = db();
        let query = vec![Clause::new(
            "edge",
            vec![MatchExpr::Const(Value::String("a".into())), MatchExpr::Var(0)],
        )];
        let mut found = db.search_facts(&query).unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![vec![Value::String("b".into())], vec![Value::String("c".into())]]
        );
    }

    #[test]
    fn repeated_variable_within_clause() {
        let db = db();
        let query = vec![Clause::new("edge", vec![MatchExpr::Var(0), MatchExpr::Var(0)])];
        assert_eq!(db.search_facts(&query).unwrap(), vec![vec![Value::String("c".into())]]);
    }

    #[test]
    fn wildcard_solutions_are_distinct() {
        let db = db();
        let query = vec![Clause::new("edge", vec![MatchExpr::Var(0), MatchExpr::Unbound])];
        assert_eq!(db.search_facts(&query).unwrap().len(), 3);
    }

    #[test]
    fn duplicate_insert_is_reported() {
        let mut db = db();
        let fact = Fact::new("edge", vec![Value::String("a".into()), Value::String("b".into())]);
        assert!(!db.insert_fact(&fact).unwrap());
        assert_eq!(db.count("edge"), 4);
    }
}
