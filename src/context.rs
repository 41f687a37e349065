//! The Holmes context: one engine bound to one fact database.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::edsl::{Bindings, Query, RuleBuilder};
use crate::engine::{Engine, EngineSettings, Func};
use crate::error::Result;
use crate::fact_db::{Clause, Fact, FactDB, Predicate};
use crate::mem_db::MemDB;
use crate::persist::SqlDB;
use crate::script::{self, QueryOutput};
use crate::types::{Type, Value};

/// Where the facts of a context are kept.
///
/// These variants are the complete set of connection options: SQLite is
/// embedded, so a file path is all a persistent store needs. Any other
/// [`FactDB`] can be plugged in through [`Holmes::with_backend`].
///
/// ```
/// use holmes::engine::EngineSettings;
/// use holmes::mem_db::MemDB;
/// use holmes::{Holmes, DB};
///
/// let path = std::env::temp_dir().join(format!("holmes_db_doc_{}.db", std::process::id()));
/// for db in [DB::Memory, DB::SqliteMemory, DB::File(path.clone())] {
///     Holmes::new(db).unwrap().close().unwrap();
/// }
/// let injected = Holmes::with_backend(Box::new(MemDB::new()), EngineSettings::default());
/// injected.close().unwrap();
/// let _ = std::fs::remove_file(&path);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DB {
    /// Process memory, no SQL involved.
    Memory,
    /// SQLite in memory.
    SqliteMemory,
    /// SQLite file, created if missing.
    File(PathBuf),
}

impl DB {
    pub fn open(&self) -> Result<Box<dyn FactDB>> {
        Ok(match self {
            DB::Memory => Box::new(MemDB::new()),
            DB::SqliteMemory => Box::new(SqlDB::open_in_memory()?),
            DB::File(path) => Box::new(SqlDB::open(path)?),
        })
    }
}

pub struct Holmes {
    engine: Engine,
}

impl Holmes {
    pub fn new(db: DB) -> Result<Holmes> {
        Holmes::with_settings(db, EngineSettings::default())
    }
    pub fn with_settings(db: DB, settings: EngineSettings) -> Result<Holmes> {
        info!(?db, max_iterations = settings.max_iterations, "opening holmes context");
        Ok(Holmes::with_backend(db.open()?, settings))
    }
    /// Binds a context to an already opened backend.
    pub fn with_backend(backend: Box<dyn FactDB>, settings: EngineSettings) -> Holmes {
        Holmes {
            engine: Engine::new(backend, settings),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn new_predicate(&mut self, pred: &Predicate) -> Result<()> {
        self.engine.new_predicate(pred)
    }
    pub fn new_fact(&mut self, fact: &Fact) -> Result<bool> {
        self.engine.new_fact(fact)
    }
    pub fn new_rule(&mut self, rule: RuleBuilder) -> Result<()> {
        self.engine.new_rule(rule.build()?)
    }
    pub fn new_func(&mut self, func: Func) -> Result<()> {
        self.engine.new_func(func)
    }
    pub fn add_type(&mut self, name: &str, ty: Type) -> Result<()> {
        self.engine.add_type(name, ty)
    }
    pub fn get_type(&self, name: &str) -> Option<Type> {
        self.engine.get_type(name)
    }

    pub fn query(&mut self, query: &Query) -> Result<Vec<Bindings>> {
        let (names, clauses) = query.compile();
        let names: Arc<[String]> = names.into();
        Ok(self
            .engine
            .query(&clauses)?
            .into_iter()
            .map(|values| Bindings::new(Arc::clone(&names), values))
            .collect())
    }
    /// Queries with numbered variables, as the fact database sees them.
    pub fn query_clauses(&mut self, clauses: &[Clause]) -> Result<Vec<Vec<Value>>> {
        self.engine.query(clauses)
    }

    /// Runs a script, returning the answers to its `query` statements in order.
    pub fn execute(&mut self, source: &str) -> Result<Vec<QueryOutput>> {
        script::execute(self, source)
    }

    pub fn close(self) -> Result<()> {
        info!("closing holmes context");
        self.engine.close()
    }
}
