use crate::error::Result;
use super::types::TableSchema;
use std::path::Path;

/// Parse a table schema YAML file into a validated TableSchema
pub fn parse_schema(path: &Path) -> Result<TableSchema> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a table schema YAML string into a validated TableSchema
pub fn parse_schema_str(content: &str) -> Result<TableSchema> {
    let schema: TableSchema = serde_yaml::from_str(content)?;
    schema.validate()?;
    Ok(schema)
}
