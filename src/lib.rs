//! Holmes – a Datalog-style fact and rule engine with pluggable storage.
//!
//! Holmes stores typed tuples ("facts") under named, typed relations
//! ("predicates"), derives new facts through Horn-clause rules and answers
//! conjunctive queries over the closure of the facts under those rules.
//!
//! ## Modules
//! * [`types`] – [`types::Type`] and [`types::Value`], the data of the fact language.
//! * [`fact_db`] – the [`fact_db::FactDB`] interface every storage backend implements.
//! * [`mem_db`] – [`mem_db::MemDB`], facts in process memory.
//! * [`persist`] – [`persist::SqlDB`], facts in SQLite.
//! * [`engine`] – rules, functions, named types and fixpoint evaluation.
//! * [`edsl`] – builders for predicates, facts, rules and queries with named variables.
//! * [`context`] – [`Holmes`], the facade tying an engine to a backend.
//! * [`script`] – a textual language over the same operations (grammar in `script.pest`).
//! * [`config`] and [`server`] – settings and the HTTP endpoint used by the binary.
//!
//! ## Quick Start
//! ```
//! use holmes::{Holmes, DB};
//! let mut holmes = Holmes::new(DB::SqliteMemory).unwrap();
//! let out = holmes
//!     .execute(
//!         "predicate edge(string, string);
//!          predicate path(string, string);
//!          fact edge(\"a\", \"b\"); fact edge(\"b\", \"c\");
//!          rule path_base: path(X, Y) <= edge(X, Y);
//!          rule path_step: path(X, Z) <= path(X, Y), edge(Y, Z);
//!          query path(\"a\", X)",
//!     )
//!     .unwrap();
//! assert_eq!(out[0].rows.len(), 2);
//! ```
//!
//! The same program can be built in Rust with the [`edsl`] builders.

pub mod config;
pub mod context;
pub mod edsl;
pub mod engine;
pub mod error;
pub mod fact_db;
pub mod mem_db;
pub mod persist;
pub mod script;
pub mod server;
pub mod types;

pub use context::{Holmes, DB};
pub use error::{Error, Result};
