pub mod avi;
pub mod cli;
pub mod config;
pub mod csv_ingest;
pub mod curation;
pub mod db;
pub mod ingest;
pub mod jobs;
pub mod keys;
pub mod loader;
pub mod metadata;
pub mod paramset;
pub mod paths;
pub mod populate;
pub mod reset;
pub mod schema;
pub mod stages;
pub mod status;
pub mod tasks;

#[derive(Debug)]
pub enum MscopeError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
    Config(String),
    NotFound(String),
    NotImplemented(String),
    Integrity(String),
    Parse(String),
    External(String),
    Stage {
        table: &'static str,
        key: String,
        message: String,
    },
}

impl std::fmt::Display for MscopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MscopeError::Database(e) => write!(f, "database: {e}"),
            MscopeError::Io(e) => write!(f, "io: {e}"),
            MscopeError::Json(e) => write!(f, "json: {e}"),
            MscopeError::Csv(e) => write!(f, "csv: {e}"),
            MscopeError::Config(msg) => write!(f, "config: {msg}"),
            MscopeError::NotFound(msg) => write!(f, "not found: {msg}"),
            MscopeError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            MscopeError::Integrity(msg) => write!(f, "integrity: {msg}"),
            MscopeError::Parse(msg) => write!(f, "parse: {msg}"),
            MscopeError::External(msg) => write!(f, "external: {msg}"),
            MscopeError::Stage {
                table,
                key,
                message,
            } => write!(f, "{table} [{key}]: {message}"),
        }
    }
}

impl std::error::Error for MscopeError {}

impl From<rusqlite::Error> for MscopeError {
    fn from(e: rusqlite::Error) -> Self {
        MscopeError::Database(e)
    }
}

impl From<std::io::Error> for MscopeError {
    fn from(e: std::io::Error) -> Self {
        MscopeError::Io(e)
    }
}

impl From<serde_json::Error> for MscopeError {
    fn from(e: serde_json::Error) -> Self {
        MscopeError::Json(e)
    }
}

impl From<csv::Error> for MscopeError {
    fn from(e: csv::Error) -> Self {
        MscopeError::Csv(e)
    }
}

impl From<rusqlite_migration::Error> for MscopeError {
    fn from(e: rusqlite_migration::Error) -> Self {
        match e {
            rusqlite_migration::Error::RusqliteError { query: _, err } => MscopeError::Database(err),
            other => MscopeError::Config(format!("migration: {other}")),
        }
    }
}

pub fn schema_migrations() -> &'static rusqlite_migration::Migrations<'static> {
    &schema::MIGRATIONS
}
