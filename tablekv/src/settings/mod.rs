//! Key-value settings persisted in a fixed three-column table.
//!
//! Every [`SettingsStore`] registers itself with the process-wide
//! [`Broadcaster`]. A write that changes a value is queued to every live
//! store bound to the same database file and table, and each store
//! re-raises it to its own observers from [`SettingsStore::process_events`].

mod broadcast;
mod config;
mod value;

pub use broadcast::{Broadcaster, SettingChange, StoreTarget};
pub use config::{SettingsConfig, DEFAULT_DATABASE, DEFAULT_TABLE, ENV_DATABASE, ENV_DATA_DIR, ENV_TABLE};
pub use value::{
    SettingValue, TAG_BOOL, TAG_BYTES, TAG_INTEGER, TAG_INVALID, TAG_JSON, TAG_REAL, TAG_TEXT,
};

use crate::connection::{registry_key, ConnectionRegistry, DbHandle};
use crate::error::{Result, TableKvError};
use crate::predicate::Predicate;
use crate::registry::InstanceId;
use crate::row;
use crate::schema::{ColumnDefinition, ColumnType, TableSchema};
use crate::table::{ErrorKind, SelectOrder, SqlError, TableEngine};
use crate::value::Row;
use crossbeam::channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

pub const COL_SETTING_NAME: &str = "setting_name";
pub const COL_SETTING_VALUE: &str = "setting_value";
pub const COL_SETTING_TYPE: &str = "setting_type";

/// `(setting_name TEXT, setting_value BLOB, setting_type INTEGER)`, all
/// NOT NULL. Names are not declared unique.
pub fn settings_schema() -> TableSchema {
    TableSchema::new()
        .column(ColumnDefinition::new(COL_SETTING_NAME, ColumnType::Text))
        .column(ColumnDefinition::new(COL_SETTING_VALUE, ColumnType::Blob))
        .column(ColumnDefinition::new(COL_SETTING_TYPE, ColumnType::Integer))
}

/// Notifications delivered to a store's observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsEvent {
    /// A setting changed, in this store or in another one with the same target.
    Changed(SettingChange),
    Opened,
    Closed,
    DatabasePathChanged,
    TableNameChanged,
}

type Observer = dyn Fn(&SettingsEvent) + Send + Sync;

pub struct SettingsStore {
    id: InstanceId,
    config: SettingsConfig,
    target: StoreTarget,
    registry: Arc<ConnectionRegistry>,
    engine: TableEngine,
    db: Mutex<Option<DbHandle>>,
    inbox: Receiver<SettingChange>,
    observers: Mutex<Vec<Arc<Observer>>>,
}

impl SettingsStore {
    /// Create a store using the process-wide connection registry. The data
    /// directory is created if missing; the database is opened on first use.
    pub fn new(config: SettingsConfig) -> Result<Self> {
        Self::with_registry(config, ConnectionRegistry::global())
    }

    pub fn with_registry(config: SettingsConfig, registry: Arc<ConnectionRegistry>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let target = target_of(&config)?;
        let (tx, rx) = unbounded();
        let id = Broadcaster::global().register(target.clone(), tx);
        log::debug!(
            "Settings instance {id} bound to {}:{}",
            target.path.display(),
            target.table
        );

        Ok(SettingsStore {
            id,
            config,
            target,
            registry,
            engine: TableEngine::new(),
            db: Mutex::new(None),
            inbox: rx,
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &SettingsConfig {
        &self.config
    }

    pub fn target(&self) -> &StoreTarget {
        &self.target
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.database_path()
    }

    pub fn database_name(&self) -> &str {
        &self.config.database_name
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// Most recent failure of this store's table operations.
    pub fn last_error(&self) -> Option<SqlError> {
        self.engine.last_error()
    }

    // ── Key-value API ────────────────────────────────────────────────

    /// Store `value` under `key`, updating the existing row if there is one.
    /// Returns false if the insert or update failed; nothing is broadcast then.
    pub fn write(&self, key: &str, value: impl Into<SettingValue>) -> bool {
        let value = value.into();
        let Some(db) = self.ensure_open() else {
            return false;
        };

        let table = self.table_name();
        let lookup = name_predicate(key);
        let existing = self.engine.select(&db, table, Some(&lookup), None, Some(1));

        let (payload, tag) = value.encode();
        let row = row! {
            COL_SETTING_NAME => key,
            COL_SETTING_VALUE => payload,
            COL_SETTING_TYPE => tag,
        };

        match existing.first() {
            Some(old_row) => {
                let old = self.decode_row(key, old_row).unwrap_or_default();
                if !self.engine.update(&db, table, &row, Some(&lookup)) {
                    return false;
                }
                if old != value {
                    self.broadcast(key, old, value);
                }
            }
            None => {
                if !self.engine.insert(&db, table, &row) {
                    return false;
                }
                if value.is_valid() {
                    self.broadcast(key, SettingValue::Invalid, value);
                }
            }
        }
        true
    }

    /// The value stored under `key`, or `Invalid` if there is none. A stored
    /// `Invalid` reads the same as a missing key; use [`lookup`](Self::lookup)
    /// to tell them apart.
    pub fn read(&self, key: &str) -> SettingValue {
        self.lookup(key).unwrap_or_default()
    }

    /// `None` if no row exists for `key`. A row whose payload cannot be
    /// decoded yields `Some(Invalid)` and records the failure.
    pub fn lookup(&self, key: &str) -> Option<SettingValue> {
        let db = self.ensure_open()?;
        let rows = self.engine.select(
            &db,
            self.table_name(),
            Some(&name_predicate(key)),
            None,
            Some(1),
        );
        let row = rows.first()?;
        Some(self.decode_row(key, row).unwrap_or_default())
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.ensure_open() {
            Some(db) => self
                .engine
                .delete(&db, self.table_name(), Some(&name_predicate(key))),
            None => false,
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        match self.ensure_open() {
            Some(db) => self
                .engine
                .exists(&db, self.table_name(), Some(&name_predicate(key))),
            None => false,
        }
    }

    /// Every stored setting ordered by name.
    pub fn entries(&self) -> Vec<(String, SettingValue)> {
        let Some(db) = self.ensure_open() else {
            return Vec::new();
        };
        let order = SelectOrder::ascending(COL_SETTING_NAME);
        self.engine
            .select(&db, self.table_name(), None, Some(&order), None)
            .iter()
            .filter_map(|row| {
                let name = row.get(COL_SETTING_NAME)?.as_str()?.to_string();
                let value = self.decode_row(&name, row).unwrap_or_default();
                Some((name, value))
            })
            .collect()
    }

    // ── Retargeting ──────────────────────────────────────────────────

    /// Point the store at another database file in the same data directory.
    /// The current connection is closed and the new one opened right away;
    /// a failure to reopen is reported through [`last_error`](Self::last_error).
    pub fn set_database_name(&mut self, name: &str) -> Result<()> {
        config::validate_database_name(name)?;
        if name == self.config.database_name {
            return Ok(());
        }

        let mut config = self.config.clone();
        config.database_name = name.to_string();
        self.retarget(config)?;
        self.emit_local(&SettingsEvent::DatabasePathChanged);
        self.restart();
        Ok(())
    }

    pub fn set_table_name(&mut self, name: &str) -> Result<()> {
        config::validate_table_name(name)?;
        if name == self.config.table_name {
            return Ok(());
        }

        let mut config = self.config.clone();
        config.table_name = name.to_string();
        self.retarget(config)?;
        self.emit_local(&SettingsEvent::TableNameChanged);
        self.restart();
        Ok(())
    }

    fn retarget(&mut self, config: SettingsConfig) -> Result<()> {
        let target = target_of(&config)?;
        Broadcaster::global().retarget(self.id, target.clone());
        self.config = config;
        self.target = target;
        Ok(())
    }

    fn restart(&self) {
        let previous = self.db.lock().take();
        if let Some(handle) = previous {
            if handle.is_open() {
                self.registry.close(handle.path());
                self.emit_local(&SettingsEvent::Closed);
            }
        }
        self.ensure_open();
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Register an observer for this store's events. Observers run on the
    /// thread that triggers the event: the caller of a setter for lifecycle
    /// events, the caller of [`process_events`](Self::process_events) for
    /// changes.
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&SettingsEvent) + Send + Sync + 'static,
    {
        self.observers.lock().push(Arc::new(observer));
    }

    /// Deliver queued changes to this store's observers in arrival order.
    /// Returns the number delivered.
    pub fn process_events(&self) -> usize {
        let mut delivered = 0;
        while let Ok(change) = self.inbox.try_recv() {
            self.emit_local(&SettingsEvent::Changed(change));
            delivered += 1;
        }
        delivered
    }

    /// Changes queued and not yet processed.
    pub fn pending_events(&self) -> usize {
        self.inbox.len()
    }

    fn emit_local(&self, event: &SettingsEvent) {
        let observers: Vec<Arc<Observer>> = self.observers.lock().clone();
        for observer in observers {
            observer(event);
        }
    }

    fn broadcast(&self, key: &str, old: SettingValue, new: SettingValue) {
        let change = SettingChange {
            key: key.to_string(),
            old,
            new,
        };
        let delivered = Broadcaster::global().publish(&self.target, &change);
        log::debug!("Setting '{key}' changed; queued for {delivered} instance(s)");
    }

    // ── Internals ────────────────────────────────────────────────────

    /// The open connection, opening it and creating the table on first use
    /// or after the shared connection was closed elsewhere.
    fn ensure_open(&self) -> Option<DbHandle> {
        let mut db = self.db.lock();
        if let Some(handle) = db.as_ref() {
            if handle.is_open() {
                return Some(handle.clone());
            }
        }

        match self.registry.open(&self.target.path) {
            Ok(handle) => {
                *db = Some(handle.clone());
                drop(db);
                self.emit_local(&SettingsEvent::Opened);
                self.engine
                    .create_table(&handle, &settings_schema(), self.table_name());
                Some(handle)
            }
            Err(e) => {
                *db = None;
                drop(db);
                self.engine
                    .record(&self.target.path.display().to_string(), &e, ErrorKind::Connection);
                None
            }
        }
    }

    fn decode_row(&self, key: &str, row: &Row) -> Option<SettingValue> {
        let result = decode_setting(row);
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let query = format!(
                    "SELECT * FROM {} WHERE {COL_SETTING_NAME}='{}'",
                    self.table_name(),
                    key.replace('\'', "''")
                );
                self.engine.record(&query, &e, ErrorKind::Driver);
                None
            }
        }
    }
}

impl Drop for SettingsStore {
    fn drop(&mut self) {
        Broadcaster::global().unregister(self.id);
        log::debug!("Settings instance {} released", self.id);
    }
}

fn name_predicate(key: &str) -> Predicate {
    Predicate::eq(COL_SETTING_NAME, key)
}

fn target_of(config: &SettingsConfig) -> Result<StoreTarget> {
    Ok(StoreTarget {
        path: registry_key(&config.database_path())?,
        table: config.table_name.clone(),
    })
}

fn decode_setting(row: &Row) -> Result<SettingValue> {
    let tag = row
        .get(COL_SETTING_TYPE)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| TableKvError::Decode(format!("missing or non-integer {COL_SETTING_TYPE}")))?;
    let payload = row
        .get(COL_SETTING_VALUE)
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| TableKvError::Decode(format!("missing {COL_SETTING_VALUE}")))?;
    SettingValue::decode(tag, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ConnectionRegistry>) {
        (TempDir::new().unwrap(), Arc::new(ConnectionRegistry::new()))
    }

    fn open(tmp: &TempDir, registry: &Arc<ConnectionRegistry>) -> SettingsStore {
        SettingsStore::with_registry(SettingsConfig::new(tmp.path()), Arc::clone(registry)).unwrap()
    }

    fn record_events(store: &SettingsStore) -> Arc<Mutex<Vec<SettingsEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        store.on_event(move |e| sink.lock().push(e.clone()));
        events
    }

    fn changed(key: &str, old: impl Into<SettingValue>, new: impl Into<SettingValue>) -> SettingsEvent {
        SettingsEvent::Changed(SettingChange {
            key: key.into(),
            old: old.into(),
            new: new.into(),
        })
    }

    #[test]
    fn test_write_read_scenario() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);

        assert!(store.write("volume", 75));
        assert_eq!(store.read("volume"), SettingValue::Integer(75));

        assert!(store.write("name", "Ada"));
        assert_eq!(store.read("name"), SettingValue::from("Ada"));

        assert!(store.remove("name"));
        assert!(!store.exists("name"));
        assert!(store.exists("volume"));
        assert!(tmp.path().join(DEFAULT_DATABASE).exists());
    }

    #[test]
    fn test_roundtrip_every_kind() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);
        let values = vec![
            SettingValue::Bool(false),
            SettingValue::Integer(-3),
            SettingValue::Real(0.75),
            SettingValue::Text(String::new()),
            SettingValue::Bytes(vec![9, 8, 7]),
            SettingValue::Json(json!({ "geometry": [10, 20, 640, 480] })),
        ];
        for (i, value) in values.into_iter().enumerate() {
            let key = format!("k{i}");
            assert!(store.write(&key, value.clone()));
            assert_eq!(store.read(&key), value);
        }
    }

    #[test]
    fn test_overwrite_keeps_single_row() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);
        assert!(store.write("volume", 10));
        assert!(store.write("volume", 20));
        assert!(store.write("volume", "loud"));

        assert_eq!(store.read("volume"), SettingValue::from("loud"));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_absent_key_reads_invalid() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);

        assert_eq!(store.read("never"), SettingValue::Invalid);
        assert_eq!(store.lookup("never"), None);

        assert!(store.write("empty", SettingValue::Invalid));
        assert_eq!(store.read("empty"), SettingValue::Invalid);
        assert_eq!(store.lookup("empty"), Some(SettingValue::Invalid));
        assert!(store.exists("empty"));
    }

    #[test]
    fn test_second_instance_observes_insert() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let b = open(&tmp, &registry);
        let seen_by_b = record_events(&b);

        assert!(a.write("theme", "dark"));
        assert_eq!(b.process_events(), 1);
        assert_eq!(
            *seen_by_b.lock(),
            vec![changed("theme", SettingValue::Invalid, "dark")]
        );
        assert_eq!(b.read("theme"), SettingValue::from("dark"));
    }

    #[test]
    fn test_change_broadcast_once_to_every_instance() {
        let (tmp, registry) = setup();
        let stores: Vec<_> = (0..3).map(|_| open(&tmp, &registry)).collect();
        assert!(stores[0].write("volume", 10));
        for store in &stores {
            assert_eq!(store.process_events(), 1);
        }

        let recorders: Vec<_> = stores.iter().map(record_events).collect();
        assert!(stores[1].write("volume", 11));
        for (store, events) in stores.iter().zip(&recorders) {
            assert_eq!(store.process_events(), 1);
            assert_eq!(*events.lock(), vec![changed("volume", 10, 11)]);
        }
    }

    #[test]
    fn test_same_file_through_parent_segment_shares_target() {
        let (tmp, registry) = setup();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let a = open(&tmp, &registry);
        let b = SettingsStore::with_registry(
            SettingsConfig::new(tmp.path().join("sub").join("..")),
            Arc::clone(&registry),
        )
        .unwrap();
        assert_eq!(a.target(), b.target());

        assert!(a.write("theme", "dark"));
        assert_eq!(b.pending_events(), 1);
        assert_eq!(b.read("theme"), SettingValue::from("dark"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_equal_overwrite_not_broadcast() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let b = open(&tmp, &registry);

        assert!(a.write("theme", "dark"));
        assert_eq!(b.process_events(), 1);
        a.process_events();

        assert!(a.write("theme", "dark"));
        assert_eq!(a.pending_events(), 0);
        assert_eq!(b.pending_events(), 0);
    }

    #[test]
    fn test_nan_overwrite_not_broadcast() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);

        assert!(store.write("gain", f64::NAN));
        assert_eq!(store.process_events(), 1);
        assert_eq!(store.read("gain"), SettingValue::Real(f64::NAN));

        assert!(store.write("gain", f64::NAN));
        assert_eq!(store.pending_events(), 0);
    }

    #[test]
    fn test_other_tables_not_notified() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let other = SettingsStore::with_registry(
            SettingsConfig::new(tmp.path()).table("other"),
            Arc::clone(&registry),
        )
        .unwrap();

        assert!(a.write("theme", "dark"));
        assert_eq!(other.pending_events(), 0);
        assert_eq!(other.read("theme"), SettingValue::Invalid);
    }

    #[test]
    fn test_dropped_instance_unregistered() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let b = open(&tmp, &registry);
        let b_id = b.id();
        assert!(Broadcaster::global().is_live(b_id));

        drop(b);
        assert!(!Broadcaster::global().is_live(b_id));
        assert!(a.write("theme", "light"));
        assert_eq!(a.process_events(), 1);
    }

    #[test]
    fn test_failed_write_no_broadcast() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let b = open(&tmp, &registry);
        assert!(a.write("volume", 1));
        b.process_events();

        let db = registry.open(&a.database_path()).unwrap();
        assert!(TableEngine::new().drop_table(&db, a.table_name()));

        assert!(!a.write("volume", 2));
        assert_eq!(b.pending_events(), 0);
        let err = a.last_error().unwrap();
        assert_eq!(err.kind, ErrorKind::Driver);
        assert!(err.message.contains("no such table"));
    }

    #[test]
    fn test_reopens_after_shared_connection_closed() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let b = open(&tmp, &registry);
        assert!(a.write("k", 1));
        assert_eq!(b.read("k"), SettingValue::Integer(1));

        registry.close(&a.database_path());
        assert_eq!(b.read("k"), SettingValue::Integer(1));
        assert!(a.write("k", 2));
        assert_eq!(b.read("k"), SettingValue::Integer(2));
    }

    #[test]
    fn test_set_table_name_restarts() {
        let (tmp, registry) = setup();
        let mut store = open(&tmp, &registry);
        assert!(store.write("k", "v"));
        let events = record_events(&store);

        store.set_table_name("prefs").unwrap();
        assert_eq!(
            *events.lock(),
            vec![
                SettingsEvent::TableNameChanged,
                SettingsEvent::Closed,
                SettingsEvent::Opened
            ]
        );
        assert_eq!(store.target().table, "prefs");
        assert_eq!(store.read("k"), SettingValue::Invalid);

        let db = registry.open(&store.database_path()).unwrap();
        let engine = TableEngine::new();
        assert!(engine.table_exists(&db, "prefs"));
        assert!(engine.table_exists(&db, DEFAULT_TABLE));

        assert!(matches!(
            store.set_table_name("no good"),
            Err(TableKvError::Config(_))
        ));
    }

    #[test]
    fn test_set_database_name() {
        let (tmp, registry) = setup();
        let mut store = open(&tmp, &registry);
        let events = record_events(&store);

        store.set_database_name("other.sqlite").unwrap();
        assert_eq!(
            *events.lock(),
            vec![SettingsEvent::DatabasePathChanged, SettingsEvent::Opened]
        );
        assert!(tmp.path().join("other.sqlite").exists());
        assert_eq!(store.database_path(), tmp.path().join("other.sqlite"));

        let absolute = tmp.path().join("abs.sqlite");
        assert!(matches!(
            store.set_database_name(absolute.to_str().unwrap()),
            Err(TableKvError::Config(_))
        ));
        assert_eq!(store.database_name(), "other.sqlite");
    }

    #[test]
    fn test_retargeted_instance_follows_new_store() {
        let (tmp, registry) = setup();
        let a = open(&tmp, &registry);
        let mut b = open(&tmp, &registry);
        b.set_database_name("moved.sqlite").unwrap();

        assert!(a.write("k", 1));
        assert_eq!(b.pending_events(), 0);

        let c = SettingsStore::with_registry(
            SettingsConfig::new(tmp.path()).database("moved.sqlite"),
            Arc::clone(&registry),
        )
        .unwrap();
        assert!(c.write("k", 2));
        assert_eq!(b.pending_events(), 1);
    }

    #[test]
    fn test_duplicate_names_not_prevented_by_schema() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);
        assert!(store.write("dup", 1));

        let db = registry.open(&store.database_path()).unwrap();
        let (payload, tag) = SettingValue::from(2).encode();
        let extra = row! {
            COL_SETTING_NAME => "dup",
            COL_SETTING_VALUE => payload,
            COL_SETTING_TYPE => tag,
        };
        assert!(TableEngine::new().insert(&db, store.table_name(), &extra));

        assert_eq!(store.read("dup"), SettingValue::Integer(1));
        assert!(store.remove("dup"));
        assert!(!store.exists("dup"));
    }

    #[test]
    fn test_undecodable_row_reads_invalid() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);
        assert!(store.write("ok", 1));

        let db = registry.open(&store.database_path()).unwrap();
        let bad = row! {
            COL_SETTING_NAME => "bad",
            COL_SETTING_VALUE => Value::Blob(b"not a number".to_vec()),
            COL_SETTING_TYPE => TAG_INTEGER,
        };
        assert!(TableEngine::new().insert(&db, store.table_name(), &bad));

        assert_eq!(store.lookup("bad"), Some(SettingValue::Invalid));
        assert!(store.last_error().unwrap().message.contains("cannot parse integer"));
    }

    #[test]
    fn test_entries_sorted() {
        let (tmp, registry) = setup();
        let store = open(&tmp, &registry);
        store.write("b", 2);
        store.write("a", "one");
        assert_eq!(
            store.entries(),
            vec![
                ("a".to_string(), SettingValue::from("one")),
                ("b".to_string(), SettingValue::Integer(2)),
            ]
        );
    }

    #[test]
    fn test_new_creates_data_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("nested").join("app");
        let store = SettingsStore::new(SettingsConfig::new(&dir)).unwrap();
        assert!(dir.is_dir());
        assert!(store.write("k", true));
        assert_eq!(store.read("k"), SettingValue::Bool(true));
    }
}
