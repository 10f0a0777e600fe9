use crate::error::TableKvError;
use std::fmt;

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The database path could not be opened or the handle was closed.
    Connection,
    /// Creating or dropping a table failed, or a schema was rejected.
    Schema,
    /// A predicate or statement was malformed before reaching SQLite.
    Query,
    /// SQLite reported a failure.
    Driver,
}

/// The most recent failure recorded by a [`TableEngine`](super::TableEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    pub kind: ErrorKind,
    /// The statement that failed, as sent to SQLite (placeholders included).
    pub query: String,
    /// SQLite extended result code, when the driver supplied one.
    pub code: Option<i32>,
    pub message: String,
}

impl SqlError {
    pub(crate) fn from_error(query: &str, err: &TableKvError, kind_hint: ErrorKind) -> Self {
        let (kind, code) = match err {
            TableKvError::Connection { source, .. } => (ErrorKind::Connection, driver_code(source)),
            TableKvError::ConnectionClosed(_) => (ErrorKind::Connection, None),
            TableKvError::Schema(_) => (ErrorKind::Schema, None),
            TableKvError::Query(_) | TableKvError::SqlParse(_) => (ErrorKind::Query, None),
            TableKvError::Driver(source) => (kind_hint, driver_code(source)),
            _ => (kind_hint, None),
        };
        SqlError {
            kind,
            query: query.to_string(),
            code,
            message: err.to_string(),
        }
    }
}

fn driver_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.extended_code),
        _ => None,
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sqlite Error: {}\nQuery: {}", self.message, self.query)
    }
}

impl std::error::Error for SqlError {}
