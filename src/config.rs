//! Runtime settings for the `holmes` binary.
//!
//! Settings are read from an optional `holmes.{toml,json,yaml}` file in the
//! working directory (or the file named by `HOLMES_CONFIG`), then overridden
//! by `HOLMES__`-prefixed environment variables, e.g.
//! `HOLMES__DATABASE__MODE=file` or `HOLMES__ENGINE__MAX_ITERATIONS=500`.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::context::DB;
use crate::engine::EngineSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseMode {
    Memory,
    SqliteMemory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub mode: DatabaseMode,
    pub path: Option<PathBuf>,
}

impl DatabaseSettings {
    pub fn db(&self) -> Result<DB> {
        match self.mode {
            DatabaseMode::Memory => Ok(DB::Memory),
            DatabaseMode::SqliteMemory => Ok(DB::SqliteMemory),
            DatabaseMode::File => self
                .path
                .clone()
                .map(DB::File)
                .ok_or_else(|| Error::Config("database.path is required in file mode".to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    pub server: ServerSettings,
    pub log_filter: String,
    pub startup_script: Option<PathBuf>,
}

impl Settings {
    pub fn load() -> Result<Settings> {
        let file = match std::env::var("HOLMES_CONFIG") {
            Ok(path) => File::with_name(&path),
            Err(_) => File::with_name("holmes").required(false),
        };
        Settings::from_config(
            Config::builder()
                .add_source(file)
                .add_source(Environment::with_prefix("HOLMES").separator("__")),
        )
    }

    fn from_config(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Settings> {
        let settings = builder
            .set_default("database.mode", "memory")?
            .set_default("engine.max_iterations", 10_000)?
            .set_default("server.bind", "127.0.0.1:8800")?
            .set_default("log_filter", "holmes=info")?
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
