use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Unknown predicate: {0}")]
    UnknownPredicate(String),
    #[error("Predicate {0} already registered with a different signature")]
    PredicateConflict(String),
    #[error("Arity mismatch for {predicate}: expected {expected} arguments, found {found}")]
    Arity { predicate: String, expected: usize, found: usize },
    #[error("Type mismatch: {0}")]
    Type(String),
    #[error("Type {0} already registered")]
    TypeExists(String),
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("Rule {0} already registered with a different definition")]
    RuleConflict(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Function {0} already registered")]
    FunctionExists(String),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Fixpoint not reached after {0} rounds")]
    FixpointLimit(usize),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Parse error: {message}")]
    Parse { message: String, line: Option<usize>, col: Option<usize> },
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// Helper conversions
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::ConstraintViolation => Self::Constraint(e.to_string()),
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked => Self::Connection(e.to_string()),
                _ => Self::Persistence(e.to_string()),
            },
            _ => Self::Persistence(e.to_string()),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
