// used for persistence
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection};

// used to keep the one-to-one mapping between predicates and their relation tables
use bimap::BiMap;

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fact_db::{check_fact, check_new_predicate, check_query, Clause, Fact, FactDB, MatchExpr, Predicate};
use crate::mem_db::OtherHasher;
use crate::types::{Type, Value};

// ------------- Persistence -------------
/// Fact database stored in SQLite.
///
/// Every predicate owns a relation table `Facts_<id>`, where `<id>` is handed
/// out when the predicate is registered. Table names therefore never depend
/// on user input beyond the validated predicate name kept in `Relation`.
pub struct SqlDB {
    conn: Connection,
    pred_by_name: HashMap<String, Predicate, OtherHasher>,
    relations: BiMap<String, i64>,
    insert_by_name: HashMap<String, String, OtherHasher>,
}

impl SqlDB {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SqlDB> {
        info!(path = %path.as_ref().display(), "opening fact database file");
        let conn = Connection::open(path)?;
        SqlDB::from_connection(conn)
    }
    pub fn open_in_memory() -> Result<SqlDB> {
        SqlDB::from_connection(Connection::open_in_memory()?)
    }
    pub fn from_connection(conn: Connection) -> Result<SqlDB> {
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        conn.execute_batch(
            "
            create table if not exists Relation (
                Relation_Identity integer not null,
                Predicate_Name text not null,
                constraint referenceable_Relation_Identity primary key (
                    Relation_Identity
                ),
                constraint unique_Predicate_Name unique (
                    Predicate_Name
                )
            );-- STRICT;
            create table if not exists Predicate (
                Predicate_Name text not null,
                Ordinal integer not null,
                Type text not null,
                constraint Predicate_has_Relation foreign key (
                    Predicate_Name
                ) references Relation(Predicate_Name),
                constraint unique_Predicate_Ordinal primary key (
                    Predicate_Name,
                    Ordinal
                )
            );-- STRICT;
            ",
        )?;
        let mut db = SqlDB {
            conn,
            pred_by_name: HashMap::default(),
            relations: BiMap::new(),
            insert_by_name: HashMap::default(),
        };
        db.restore_predicates()?;
        Ok(db)
    }
    fn restore_predicates(&mut self) -> Result<()> {
        let mut restored: Vec<(i64, String, Option<String>)> = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "
                select r.Relation_Identity,
                        r.Predicate_Name,
                        p.Type
                    from Relation r
                    left join Predicate p
                    on p.Predicate_Name = r.Predicate_Name
                    order by r.Predicate_Name, p.Ordinal
            ",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                restored.push((row.get(0)?, row.get(1)?, row.get(2)?));
            }
        }
        for (relation, name, type_text) in restored {
            let pred = self
                .pred_by_name
                .entry(name.clone())
                .or_insert_with(|| Predicate::new(name.clone(), Vec::new()));
            if let Some(type_text) = type_text {
                let ty: Type = type_text.parse().map_err(|_| Error::DataCorruption {
                    message: format!("predicate {} has unreadable type {:?}", name, type_text),
                })?;
                pred.types.push(ty);
            }
            self.relations.insert(name, relation);
        }
        for pred in self.pred_by_name.clone().values() {
            self.gen_insert_stmt(pred)?;
        }
        info!(predicates = self.pred_by_name.len(), "restored predicates");
        Ok(())
    }

    fn table(&self, pred_name: &str) -> Result<String> {
        self.relations
            .get_by_left(pred_name)
            .map(|id| format!("Facts_{}", id))
            .ok_or_else(|| Error::UnknownPredicate(pred_name.to_string()))
    }

    // Generates a prebuilt insert statement for a given predicate, and stores
    // it so we don't have to rebuild it every time.
    fn gen_insert_stmt(&mut self, pred: &Predicate) -> Result<()> {
        let mut columns = vec!["Fact_Digest".to_string()];
        let mut args = vec!["?1".to_string()];
        for idx in 0..pred.arity() {
            columns.push(format!("Arg{}", idx));
            args.push(format!("?{}", idx + 2));
        }
        let stmt = format!(
            "insert or ignore into {} ({}) values ({})",
            self.table(&pred.name)?,
            columns.join(", "),
            args.join(", ")
        );
        self.insert_by_name.insert(pred.name.clone(), stmt);
        Ok(())
    }

    // Persists a predicate and creates its relation table, all or nothing.
    fn insert_predicate(&mut self, pred: &Predicate) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let relation: i64 = tx.query_row(
            "select coalesce(max(Relation_Identity), 0) + 1 from Relation",
            [],
            |r| r.get(0),
        )?;
        tx.execute(
            "insert into Relation (Relation_Identity, Predicate_Name) values (?1, ?2)",
            params![relation, &pred.name],
        )?;
        for (ordinal, ty) in pred.types.iter().enumerate() {
            tx.execute(
                "insert into Predicate (Predicate_Name, Ordinal, Type) values (?1, ?2, ?3)",
                params![&pred.name, ordinal as i64, ty.to_string()],
            )?;
        }
        let mut columns = vec!["Fact_Digest blob not null primary key".to_string()];
        for (ordinal, ty) in pred.types.iter().enumerate() {
            columns.push(format!("Arg{} {}", ordinal, ty.sql_repr()));
        }
        tx.execute(
            &format!("create table Facts_{} ({})", relation, columns.join(", ")),
            [],
        )?;
        tx.commit()?;
        Ok(relation)
    }
}

/// Digest of the canonical encoding of a tuple, used as its natural key.
fn digest(args: &[Value]) -> Vec<u8> {
    let canonical = Value::Tuple(args.to_vec()).to_json().to_string();
    blake3::hash(canonical.as_bytes()).as_bytes().to_vec()
}

// Runs the prebuilt insert statement of the fact's predicate.
fn execute_insert(
    conn: &Connection,
    insert_by_name: &HashMap<String, String, OtherHasher>,
    fact: &Fact,
) -> Result<bool> {
    let sql = insert_by_name
        .get(&fact.pred_name)
        .ok_or_else(|| Error::DataCorruption {
            message: format!("insert statement missing for {}", fact.pred_name),
        })?;
    let key = digest(&fact.args);
    let mut values: Vec<&dyn ToSql> = vec![&key];
    values.extend(fact.args.iter().map(|v| v as &dyn ToSql));
    let mut stmt = conn.prepare_cached(sql)?;
    Ok(stmt.execute(values.as_slice())? > 0)
}

impl FactDB for SqlDB {
    fn new_predicate(&mut self, pred: &Predicate) -> Result<()> {
        if check_new_predicate(self.pred_by_name.get(&pred.name), pred)? {
            let relation = self.insert_predicate(pred)?;
            self.relations.insert(pred.name.clone(), relation);
            self.pred_by_name.insert(pred.name.clone(), pred.clone());
            self.gen_insert_stmt(pred)?;
            debug!(predicate = %pred, relation, "persisted predicate");
        }
        Ok(())
    }
    fn get_predicate(&self, name: &str) -> Option<Predicate> {
        self.pred_by_name.get(name).cloned()
    }
    fn predicates(&self) -> Vec<Predicate> {
        self.pred_by_name.values().cloned().collect()
    }
    fn insert_fact(&mut self, fact: &Fact) -> Result<bool> {
        check_fact(self.pred_by_name.get(&fact.pred_name), fact)?;
        execute_insert(&self.conn, &self.insert_by_name, fact)
    }
    /// Stores the whole batch in one transaction.
    fn insert_facts(&mut self, facts: Vec<Fact>) -> Result<Vec<Fact>> {
        for fact in &facts {
            check_fact(self.pred_by_name.get(&fact.pred_name), fact)?;
        }
        let tx = self.conn.transaction()?;
        let mut inserted = Vec::new();
        for fact in facts {
            if execute_insert(&tx, &self.insert_by_name, &fact)? {
                inserted.push(fact);
            }
        }
        tx.commit()?;
        debug!(inserted = inserted.len(), "committed fact batch");
        Ok(inserted)
    }
    /// Compiles the conjunction into one SQL statement: every clause becomes
    /// an aliased relation table, repeated variables become equalities
    /// against their first occurrence and constants become bound parameters.
    fn search_facts(&self, query: &[Clause]) -> Result<Vec<Vec<Value>>> {
        let var_types = check_query(query, |name| self.pred_by_name.get(name))?;

        let mut tables = Vec::new(); // relation tables in clause order
        let mut var_names: Vec<String> = Vec::new(); // canonical column per variable
        let mut restricts = Vec::new(); // equalities and constant comparisons
        let mut vals: Vec<&Value> = Vec::new(); // values quoted into the statement

        for (idxc, clause) in query.iter().enumerate() {
            let alias = format!("t{}", idxc);
            tables.push(format!("{} as {}", self.table(&clause.pred_name)?, alias));
            for (idx, arg) in clause.args.iter().enumerate() {
                let column = format!("{}.Arg{}", alias, idx);
                match arg {
                    MatchExpr::Unbound => (),
                    MatchExpr::Var(var) => {
                        if *var >= var_names.len() {
                            var_names.push(column);
                        } else {
                            restricts.push(format!("{} = {}", column, var_names[*var]));
                        }
                    }
                    MatchExpr::Const(value) => {
                        vals.push(value);
                        restricts.push(format!("{} = ?{}", column, vals.len()));
                    }
                }
            }
        }
        // Never select nothing; a ground query yields one empty solution per match.
        let selected = if var_names.is_empty() {
            "1".to_string()
        } else {
            var_names.join(", ")
        };
        let where_clause = if restricts.is_empty() {
            String::new()
        } else {
            format!(" where {}", restricts.join(" and "))
        };
        let sql = format!(
            "select distinct {} from {}{}",
            selected,
            tables.join(", "),
            where_clause
        );
        debug!(%sql, "searching facts");

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(vals.iter()))?;
        let mut answers = Vec::new();
        while let Some(row) = rows.next()? {
            let mut answer = Vec::with_capacity(var_types.len());
            for (idx, ty) in var_types.iter().enumerate() {
                answer.push(Value::from_sql(ty, row.get_ref(idx)?)?);
            }
            answers.push(answer);
        }
        Ok(answers)
    }
    fn close(self: Box<Self>) -> Result<()> {
        let db = *self;
        db.conn.close().map_err(|(_, e)| Error::from(e))
    }
}
