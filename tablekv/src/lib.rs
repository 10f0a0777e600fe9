pub mod connection;
pub mod error;
pub mod predicate;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod signal;
pub mod table;
pub mod value;

pub use connection::{ConnectionRegistry, DbHandle};
pub use error::{Result, TableKvError};
pub use predicate::{Constraint, Join, Predicate, PredicateList};
pub use registry::InstanceId;
pub use schema::{ColumnDefinition, ColumnType, TableSchema};
pub use settings::{SettingChange, SettingValue, SettingsConfig, SettingsEvent, SettingsStore};
pub use signal::{Signal, SignalHub};
pub use table::{ErrorKind, OrderDirection, SelectOrder, SqlError, TableEngine};
pub use value::{Row, Value};
