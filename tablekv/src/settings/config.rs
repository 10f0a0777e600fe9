use crate::error::{Result, TableKvError};
use crate::schema::validate_identifier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "TABLEKV_DATA_DIR";
pub const ENV_DATABASE: &str = "TABLEKV_DATABASE";
pub const ENV_TABLE: &str = "TABLEKV_TABLE";

pub const DEFAULT_DATABASE: &str = "settings.sqlite";
pub const DEFAULT_TABLE: &str = "settings";

/// Where a [`SettingsStore`](super::SettingsStore) keeps its data: the
/// database file `data_dir/database_name` and the table inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub data_dir: PathBuf,
    pub database_name: String,
    pub table_name: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        SettingsConfig {
            data_dir: PathBuf::from("."),
            database_name: DEFAULT_DATABASE.to_string(),
            table_name: DEFAULT_TABLE.to_string(),
        }
    }
}

impl SettingsConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        SettingsConfig {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = name.into();
        self
    }

    /// Defaults overridden by `TABLEKV_DATA_DIR`, `TABLEKV_DATABASE` and
    /// `TABLEKV_TABLE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup(ENV_DATABASE) {
            config.database_name = name;
        }
        if let Some(table) = lookup(ENV_TABLE) {
            config.table_name = table;
        }
        config
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: SettingsConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_database_name(&self.database_name)?;
        validate_table_name(&self.table_name)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_name)
    }
}

/// The database name is a file name under the data directory, never a path
/// of its own.
pub(crate) fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TableKvError::Config("Database name is empty".into()));
    }
    if Path::new(name).is_absolute() {
        return Err(TableKvError::Config(format!(
            "Absolute path '{name}' given; the database name is just the file name"
        )));
    }
    Ok(())
}

pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    validate_identifier(name)
        .map_err(|_| TableKvError::Config(format!("Invalid settings table name '{name}'")))
}
