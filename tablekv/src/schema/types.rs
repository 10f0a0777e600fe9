use crate::error::{Result, TableKvError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::validate_identifier;

/// Semantic column type. Each maps to the SQL type text used in `CREATE TABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    IntegerPrimaryKey,
    AutoIncrementPrimaryKey,
    Integer,
    Real,
    Blob,
    Null,
}

impl ColumnType {
    pub const ALL: [ColumnType; 7] = [
        ColumnType::Text,
        ColumnType::IntegerPrimaryKey,
        ColumnType::AutoIncrementPrimaryKey,
        ColumnType::Integer,
        ColumnType::Real,
        ColumnType::Blob,
        ColumnType::Null,
    ];

    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::IntegerPrimaryKey => "INTEGER PRIMARY KEY",
            ColumnType::AutoIncrementPrimaryKey => "INTEGER PRIMARY KEY AUTOINCREMENT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Blob => "BLOB",
            ColumnType::Null => "NULL",
        }
    }

    /// Reverse of [`ColumnType::sql_name`]. Case and inner whitespace are ignored.
    pub fn from_sql_name(name: &str) -> Option<ColumnType> {
        let normalized = name
            .split_whitespace()
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .join(" ");
        ColumnType::ALL
            .into_iter()
            .find(|t| t.sql_name() == normalized)
    }

    pub fn is_primary_key(&self) -> bool {
        matches!(
            self,
            ColumnType::IntegerPrimaryKey | ColumnType::AutoIncrementPrimaryKey
        )
    }
}

/// Definition of a single column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDefinition {
    /// A non-nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDefinition {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Column clause for `CREATE TABLE`, e.g. `title TEXT NOT NULL`.
    pub fn to_sql(&self) -> String {
        if self.nullable {
            format!("{} {}", self.name, self.column_type.sql_name())
        } else {
            format!("{} {} NOT NULL", self.name, self.column_type.sql_name())
        }
    }
}

/// Ordered column list describing the physical layout of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check the schema is usable: at least one column, valid and unique
    /// names, at most one primary key.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(TableKvError::Schema("Schema has no columns".into()));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.name)
                .map_err(|_| TableKvError::Schema(format!("Invalid column name '{}'", column.name)))?;
            if !seen.insert(column.name.as_str()) {
                return Err(TableKvError::Schema(format!(
                    "Duplicate column '{}'",
                    column.name
                )));
            }
        }

        let primary_keys = self
            .columns
            .iter()
            .filter(|c| c.column_type.is_primary_key())
            .count();
        if primary_keys > 1 {
            return Err(TableKvError::Schema(
                "Schema declares more than one primary key".into(),
            ));
        }

        Ok(())
    }

    /// Column list for `CREATE TABLE`, without the surrounding parentheses.
    pub fn to_sql(&self) -> String {
        self.columns
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
