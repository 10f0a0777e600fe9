use crate::error::{Result, TableKvError};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

const MEMORY_PATH: &str = ":memory:";

static GLOBAL: LazyLock<Arc<ConnectionRegistry>> =
    LazyLock::new(|| Arc::new(ConnectionRegistry::new()));

/// A shared handle to one open SQLite database.
///
/// Clones share the underlying connection. Closing through the
/// [`ConnectionRegistry`] closes it for every clone; later calls on a
/// closed handle fail with [`TableKvError::ConnectionClosed`].
#[derive(Clone)]
pub struct DbHandle {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl DbHandle {
    fn new(path: PathBuf, conn: Connection) -> Self {
        DbHandle {
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run `f` against the connection. Statement execution on one handle is
    /// serialized by its lock.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(TableKvError::ConnectionClosed(self.path.clone())),
        }
    }

    fn close(&self) -> bool {
        match self.conn.lock().take() {
            Some(conn) => {
                if let Err((_, e)) = conn.close() {
                    log::warn!("Error closing {}: {e}", self.path.display());
                }
                true
            }
            None => false,
        }
    }

    fn same_connection(&self, other: &DbHandle) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }
}

impl std::fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens and caches one connection per database path.
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: Mutex<HashMap<PathBuf, DbHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<ConnectionRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Return the open handle for `path`, opening (and creating the file)
    /// if none is cached.
    pub fn open(&self, path: &Path) -> Result<DbHandle> {
        let key = registry_key(path)?;
        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(&key) {
            if handle.is_open() {
                return Ok(handle.clone());
            }
        }

        let conn = if key.as_os_str() == MEMORY_PATH {
            Connection::open_in_memory()
        } else {
            Connection::open(&key)
        }
        .map_err(|source| TableKvError::Connection {
            path: key.clone(),
            source,
        })?;

        log::debug!("Opened database {}", key.display());
        let handle = DbHandle::new(key.clone(), conn);
        handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Close and evict the handle for `path`. Returns false if nothing was open.
    pub fn close(&self, path: &Path) -> bool {
        let Ok(key) = registry_key(path) else {
            return false;
        };
        let removed = self.handles.lock().remove(&key);
        match removed {
            Some(handle) => {
                log::debug!("Closing database {}", key.display());
                handle.close()
            }
            None => false,
        }
    }

    pub fn is_open(&self, path: &Path) -> bool {
        match registry_key(path) {
            Ok(key) => self
                .handles
                .lock()
                .get(&key)
                .is_some_and(DbHandle::is_open),
            Err(_) => false,
        }
    }

    /// Whether `handle` is the connection currently cached for its path.
    pub fn is_current(&self, handle: &DbHandle) -> bool {
        self.handles
            .lock()
            .get(handle.path())
            .is_some_and(|cached| cached.same_connection(handle) && cached.is_open())
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Absolute form of `path` with its directory resolved through the file
/// system, so `.`/`..` segments and symlinked directories name one key.
/// `:memory:` is kept as-is. A directory that does not exist yet is left
/// unresolved.
pub(crate) fn registry_key(path: &Path) -> Result<PathBuf> {
    if path.as_os_str() == MEMORY_PATH {
        return Ok(PathBuf::from(MEMORY_PATH));
    }
    let absolute = std::path::absolute(path)?;
    let resolved = match (absolute.parent(), absolute.file_name()) {
        (Some(dir), Some(name)) => std::fs::canonicalize(dir).ok().map(|dir| dir.join(name)),
        _ => None,
    };
    Ok(resolved.unwrap_or(absolute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_reuses_handle() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();
        let path = tmp.path().join("a.sqlite");

        let first = registry.open(&path).unwrap();
        let second = registry.open(&path).unwrap();
        assert!(first.same_connection(&second));
        assert_eq!(registry.len(), 1);
        assert!(path.exists());
    }

    #[test]
    fn test_distinct_paths_get_distinct_handles() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();

        let a = registry.open(&tmp.path().join("a.sqlite")).unwrap();
        let b = registry.open(&tmp.path().join("b.sqlite")).unwrap();
        assert!(!a.same_connection(&b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_close_evicts_and_closes_all_clones() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();
        let path = tmp.path().join("a.sqlite");

        let handle = registry.open(&path).unwrap();
        let clone = handle.clone();
        assert!(registry.is_open(&path));

        assert!(registry.close(&path));
        assert!(!registry.is_open(&path));
        assert!(!clone.is_open());
        assert!(registry.is_empty());
        assert!(matches!(
            clone.with_conn(|_| Ok(())),
            Err(TableKvError::ConnectionClosed(_))
        ));

        assert!(!registry.close(&path));

        let reopened = registry.open(&path).unwrap();
        assert!(!reopened.same_connection(&handle));
        assert!(registry.is_current(&reopened));
        assert!(!registry.is_current(&handle));
    }

    #[test]
    fn test_relative_and_absolute_share_key() {
        let registry = ConnectionRegistry::new();
        let tmp = TempDir::new().unwrap();
        let abs = tmp.path().join("x.sqlite");
        let dotted = tmp.path().join(".").join("x.sqlite");

        let a = registry.open(&abs).unwrap();
        let b = registry.open(&dotted).unwrap();
        assert!(a.same_connection(&b));
    }

    #[test]
    fn test_parent_segments_share_key() {
        let registry = ConnectionRegistry::new();
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let direct = tmp.path().join("x.sqlite");
        let detour = tmp.path().join("sub").join("..").join("x.sqlite");

        let a = registry.open(&direct).unwrap();
        let b = registry.open(&detour).unwrap();
        assert!(a.same_connection(&b));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry_key(&direct).unwrap(), registry_key(&detour).unwrap());

        assert!(registry.close(&detour));
        assert!(!a.is_open());
    }

    #[test]
    fn test_memory_database() {
        let registry = ConnectionRegistry::new();
        let handle = registry.open(Path::new(":memory:")).unwrap();
        let answer: i64 = handle
            .with_conn(|conn| Ok(conn.query_row("SELECT 41 + 1", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    fn test_open_failure_is_connection_error() {
        let tmp = TempDir::new().unwrap();
        let registry = ConnectionRegistry::new();
        let path = tmp.path().join("missing-dir").join("a.sqlite");
        assert!(matches!(
            registry.open(&path),
            Err(TableKvError::Connection { .. })
        ));
        assert!(registry.is_empty());
    }
}
