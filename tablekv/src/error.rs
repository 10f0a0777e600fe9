use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableKvError {
    #[error("Cannot open database at {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Connection to {0} is closed")]
    ConnectionClosed(PathBuf),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("SQLite error: {0}")]
    Driver(#[from] rusqlite::Error),

    #[error("SQL parse error: {0}")]
    SqlParse(String),

    #[error("Cannot decode setting value: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TableKvError>;
