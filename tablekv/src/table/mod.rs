mod last_error;

pub use last_error::{ErrorKind, SqlError};

use crate::connection::DbHandle;
use crate::error::{Result, TableKvError};
use crate::predicate::Predicate;
use crate::schema::{validate_identifier, TableSchema};
use crate::value::{Row, Value};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

/// `ORDER BY` clause for [`TableEngine::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOrder {
    pub column: String,
    pub direction: OrderDirection,
}

impl SelectOrder {
    pub fn ascending(column: impl Into<String>) -> Self {
        SelectOrder {
            column: column.into(),
            direction: OrderDirection::Ascending,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        SelectOrder {
            column: column.into(),
            direction: OrderDirection::Descending,
        }
    }
}

/// Table operations over a [`DbHandle`].
///
/// Nothing here returns an error or panics: failures come back as `false`
/// or an empty result and the details go to a single last-error slot,
/// overwritten by the next failure. Read [`TableEngine::last_error`] right
/// after the failing call.
#[derive(Debug, Default)]
pub struct TableEngine {
    last_error: Mutex<Option<SqlError>>,
}

impl TableEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_error(&self) -> Option<SqlError> {
        self.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Record a failure that happened outside the engine's own statements
    /// (opening a connection, decoding a stored value).
    pub(crate) fn record(&self, query: &str, err: &TableKvError, hint: ErrorKind) {
        let error = SqlError::from_error(query, err, hint);
        log::warn!("{error}");
        *self.last_error.lock() = Some(error);
    }

    fn report<T>(&self, query: &str, hint: ErrorKind, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.record(query, &e, hint);
                None
            }
        }
    }

    // ── Schema ───────────────────────────────────────────────────────

    /// Create `name` with `schema` unless it already exists. Re-creating with
    /// the same columns is a no-op; different columns are a schema error.
    pub fn create_table(&self, db: &DbHandle, schema: &TableSchema, name: &str) -> bool {
        let sql = format!("CREATE TABLE IF NOT EXISTS {name} ({})", schema.to_sql());
        let result = validate_identifier(name)
            .and_then(|_| schema.validate())
            .and_then(|_| {
                db.with_conn(|conn| {
                    if let Some(existing) = table_columns(conn, name)? {
                        let wanted = schema.column_names();
                        if existing != wanted {
                            return Err(TableKvError::Schema(format!(
                                "Table '{name}' already exists with columns {existing:?}, not {wanted:?}"
                            )));
                        }
                    }
                    conn.execute_batch(&sql)?;
                    Ok(())
                })
            });
        self.report(&sql, ErrorKind::Schema, result).is_some()
    }

    pub fn table_exists(&self, db: &DbHandle, name: &str) -> bool {
        let sql = "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1";
        let result = db.with_conn(|conn| {
            let count: i64 = conn.query_row(sql, params![name], |row| row.get(0))?;
            Ok(count > 0)
        });
        self.report(sql, ErrorKind::Driver, result).unwrap_or(false)
    }

    pub fn drop_table(&self, db: &DbHandle, name: &str) -> bool {
        let sql = format!("DROP TABLE {name}");
        let result = validate_identifier(name).and_then(|_| {
            db.with_conn(|conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
        });
        self.report(&sql, ErrorKind::Schema, result).is_some()
    }

    /// Names of all user tables, sorted.
    pub fn tables(&self, db: &DbHandle) -> Vec<String> {
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' \
                   AND name NOT LIKE 'sqlite_%' ORDER BY name";
        let result = db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut names = Vec::new();
            for row in rows {
                names.push(row?);
            }
            Ok(names)
        });
        self.report(sql, ErrorKind::Driver, result).unwrap_or_default()
    }

    // ── Rows ─────────────────────────────────────────────────────────

    /// Rows of `table` matching `predicate` (all rows for `None`), optionally
    /// ordered and limited. Empty on failure as well as on no match.
    pub fn select(
        &self,
        db: &DbHandle,
        table: &str,
        predicate: Option<&Predicate>,
        order: Option<&SelectOrder>,
        limit: Option<u32>,
    ) -> Vec<Row> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT * FROM {table}");
        push_where(&mut sql, predicate, &mut params);
        if let Some(order) = order {
            let direction = match order.direction {
                OrderDirection::Ascending => "ASC",
                OrderDirection::Descending => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {direction}", order.column));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let result = validate_identifier(table)
            .and_then(|_| validate_predicate(predicate))
            .and_then(|_| order.map_or(Ok(()), |o| validate_identifier(&o.column)))
            .and_then(|_| db.with_conn(|conn| query_rows(conn, &sql, &params)));
        self.report(&sql, ErrorKind::Driver, result).unwrap_or_default()
    }

    /// Insert one row. An empty row inserts the table's default values.
    pub fn insert(&self, db: &DbHandle, table: &str, row: &Row) -> bool {
        let sql = if row.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            let placeholders = vec!["?"; row.len()].join(", ");
            format!(
                "INSERT INTO {table} ({}) VALUES ({placeholders})",
                columns.join(", ")
            )
        };

        let result = validate_identifier(table)
            .and_then(|_| validate_columns(row))
            .and_then(|_| {
                db.with_conn(|conn| {
                    conn.execute(&sql, params_from_iter(row.values()))?;
                    Ok(())
                })
            });
        self.report(&sql, ErrorKind::Driver, result).is_some()
    }

    /// Set the columns in `row` on every row matching `predicate`.
    ///
    /// `None` updates every row in the table.
    pub fn update(
        &self,
        db: &DbHandle,
        table: &str,
        row: &Row,
        predicate: Option<&Predicate>,
    ) -> bool {
        let assignments: Vec<String> = row.keys().map(|c| format!("{c} = ?")).collect();
        let mut params: Vec<Value> = row.values().cloned().collect();
        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        push_where(&mut sql, predicate, &mut params);

        if predicate.is_none() {
            log::warn!("Updating every row of '{table}': no predicate given");
        }

        let result = validate_identifier(table)
            .and_then(|_| {
                if row.is_empty() {
                    Err(TableKvError::Query("Update with no columns to set".into()))
                } else {
                    validate_columns(row)
                }
            })
            .and_then(|_| validate_predicate(predicate))
            .and_then(|_| {
                db.with_conn(|conn| {
                    conn.execute(&sql, params_from_iter(params.iter()))?;
                    Ok(())
                })
            });
        self.report(&sql, ErrorKind::Driver, result).is_some()
    }

    /// Delete every row matching `predicate`.
    ///
    /// `None` deletes every row in the table.
    pub fn delete(&self, db: &DbHandle, table: &str, predicate: Option<&Predicate>) -> bool {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {table}");
        push_where(&mut sql, predicate, &mut params);

        if predicate.is_none() {
            log::warn!("Deleting every row of '{table}': no predicate given");
        }

        let result = validate_identifier(table)
            .and_then(|_| validate_predicate(predicate))
            .and_then(|_| {
                db.with_conn(|conn| {
                    conn.execute(&sql, params_from_iter(params.iter()))?;
                    Ok(())
                })
            });
        self.report(&sql, ErrorKind::Driver, result).is_some()
    }

    pub fn exists(&self, db: &DbHandle, table: &str, predicate: Option<&Predicate>) -> bool {
        !self.select(db, table, predicate, None, Some(1)).is_empty()
    }

    /// Run a single raw `SELECT` (or other query statement) and return its rows.
    /// Anything that is not exactly one query is rejected before it reaches
    /// SQLite.
    pub fn execute_select(&self, db: &DbHandle, sql: &str) -> Vec<Row> {
        let result = ensure_single_query(sql)
            .and_then(|_| db.with_conn(|conn| query_rows(conn, sql, &[])));
        self.report(sql, ErrorKind::Driver, result).unwrap_or_default()
    }
}

fn push_where(sql: &mut String, predicate: Option<&Predicate>, params: &mut Vec<Value>) {
    if let Some(predicate) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(&predicate.to_sql(params));
    }
}

fn validate_predicate(predicate: Option<&Predicate>) -> Result<()> {
    predicate.map_or(Ok(()), Predicate::validate)
}

fn validate_columns(row: &Row) -> Result<()> {
    for column in row.keys() {
        validate_identifier(column)?;
    }
    Ok(())
}

/// Column names of `table` in declaration order, or None if it does not exist.
fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<String>>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(if columns.is_empty() { None } else { Some(columns) })
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut record = Row::new();
        for (i, name) in column_names.iter().enumerate() {
            record.insert(name.clone(), row.get::<_, Value>(i)?);
        }
        Ok(record)
    })?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn ensure_single_query(sql: &str) -> Result<()> {
    let statements = Parser::parse_sql(&SQLiteDialect {}, sql)
        .map_err(|e| TableKvError::SqlParse(e.to_string()))?;
    match statements.as_slice() {
        [Statement::Query(_)] => Ok(()),
        [_] => Err(TableKvError::Query(
            "Only SELECT statements can be executed here".into(),
        )),
        _ => Err(TableKvError::Query(format!(
            "Expected exactly one statement, found {}",
            statements.len()
        ))),
    }
}
