mod parser;
mod types;

pub use parser::{parse_schema, parse_schema_str};
pub use types::{ColumnDefinition, ColumnType, TableSchema};

use crate::error::{Result, TableKvError};
use regex::Regex;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Table and column names are spliced into SQL text, so only plain
/// identifiers are accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(TableKvError::Query(format!("Invalid identifier '{name}'")))
    }
}
