//! SQLite-backed annotation store.
//!
//! Every operation takes an explicit connection (or a [`Store`] handle); there is
//! no module-level session. Handlers reach the connection through
//! [`Store::blocking`], which moves the call onto tokio's blocking pool. That
//! handoff is the one place a request yields while waiting on storage.

mod schema;

pub use schema::{Column, ColumnKind, Table};

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, Transaction};

use crate::error::{Error, Result};

/// Shared handle to the database. Cloning is cheap.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening annotation store at {}", path.display());
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection on the calling thread.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::Worker("store connection lock poisoned".to_string()))?;
        f(&mut guard)
    }

    /// Run `f` inside one transaction. Any error rolls the whole thing back.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.with_conn(|conn| in_transaction(conn, f))
    }

    /// Run a store call on the blocking pool so concurrent handlers keep going.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        offload(move || store.with_conn(f)).await
    }

    pub fn get_or_create<F: Fields>(&self, id: Option<&str>, fields: &F) -> Result<String> {
        self.transaction(|tx| upsert(tx, id, fields))
    }

    pub fn get_or_remove(
        &self,
        table: Table,
        id: &str,
        owner: Option<&str>,
        session: Option<&str>,
    ) -> Result<usize> {
        self.transaction(|tx| remove(tx, table, id, owner, session))
    }
}

/// Commit when `f` succeeds; dropping the transaction on error rolls it back.
pub fn in_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Run CPU or blocking work on tokio's blocking pool.
pub async fn offload<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
}

/// Opaque 24-character hex id.
pub fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(24);
    id
}

pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Column values written by an upsert. `id` and `updated` are handled by the store.
pub trait Fields {
    const TABLE: Table;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>>;

    /// Reject the write when a referenced row is missing.
    fn check_references(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// Column an existing row must share with these fields before it may be overwritten.
    fn overwrite_scope(&self) -> Option<(&'static str, Option<&str>)> {
        None
    }
}

/// A typed row read back from one table.
pub trait Record: Sized {
    const TABLE: Table;
    /// Select list, qualified by table name.
    const COLUMNS: &'static str;
    /// FROM clause. May add left joins for sub-rows.
    const FROM: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Insert or update one row inside the caller's transaction.
pub fn upsert<F: Fields>(conn: &Connection, id: Option<&str>, fields: &F) -> Result<String> {
    let table = F::TABLE;
    let id = match id {
        Some(id) if id.trim().is_empty() => {
            return Err(Error::validation(format!("empty id for {}", table.name())))
        }
        Some(id) => id.to_string(),
        None => new_id(),
    };
    fields.check_references(conn)?;

    let mut values = fields.values()?;
    values.push(("updated", SqlValue::Text(now())));

    let id_column = table.id_column();
    let exists = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE {} = ?1", table.name(), id_column),
            [&id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    if let (true, Some((column, expected))) = (exists, fields.overwrite_scope()) {
        let current: Option<String> = conn.query_row(
            &format!("SELECT {} FROM {} WHERE {} = ?1", column, table.name(), id_column),
            [&id],
            |row| row.get(0),
        )?;
        if current.as_deref() != expected {
            return Err(Error::validation(format!(
                "{} {} belongs to another {}",
                table.name(),
                id,
                column
            )));
        }
    }

    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let sql = if exists {
        let sets = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", c, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        format!("UPDATE {} SET {} WHERE {} = ?1", table.name(), sets, id_column)
    } else {
        let placeholders = (1..=columns.len() + 1)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}, {}) VALUES ({})",
            table.name(),
            id_column,
            columns.join(", "),
            placeholders
        )
    };

    let params = std::iter::once(SqlValue::Text(id.clone())).chain(values.into_iter().map(|(_, v)| v));
    conn.execute(&sql, params_from_iter(params))?;
    tracing::debug!(
        "{} {} {}",
        if exists { "Updated" } else { "Inserted" },
        table.name(),
        id
    );
    Ok(id)
}

/// Delete rows matching `id` and any given scope. Children are left alone.
pub fn remove(
    conn: &Connection,
    table: Table,
    id: &str,
    owner: Option<&str>,
    session: Option<&str>,
) -> Result<usize> {
    let mut sql = format!("DELETE FROM {} WHERE {} = ?1", table.name(), table.id_column());
    let mut params = vec![id.to_string()];
    for (column, scope) in [("owner", owner), ("session", session)] {
        if let Some(scope) = scope {
            if table.column(column).is_none() {
                return Err(Error::validation(format!(
                    "{} has no {} column",
                    table.name(),
                    column
                )));
            }
            params.push(scope.to_string());
            sql.push_str(&format!(" AND {} = ?{}", column, params.len()));
        }
    }
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

pub fn find<T: Record>(conn: &Connection, id: &str) -> Result<Option<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {}.{} = ?1",
        T::COLUMNS,
        T::FROM,
        T::TABLE.name(),
        T::TABLE.id_column()
    );
    Ok(conn.query_row(&sql, [id], |row| T::from_row(row)).optional()?)
}

pub fn get<T: Record>(conn: &Connection, id: &str) -> Result<T> {
    find(conn, id)?.ok_or_else(|| Error::not_found(T::TABLE.name(), id))
}

pub fn exists(conn: &Connection, table: Table, id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE {} = ?1", table.name(), table.id_column()),
            [id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn count(conn: &Connection, table: Table) -> Result<usize> {
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(DISTINCT {}) FROM {}", table.id_column(), table.name()),
        [],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

pub fn ids(conn: &Connection, table: Table, size: Option<usize>, offset: usize) -> Result<Vec<String>> {
    column_values(conn, table, table.id_column(), size, offset)
}

pub fn names(conn: &Connection, table: Table, size: Option<usize>, offset: usize) -> Result<Vec<String>> {
    if table.column("name").is_none() {
        return Err(Error::validation(format!("{} has no name column", table.name())));
    }
    column_values(conn, table, "name", size, offset)
}

fn column_values(
    conn: &Connection,
    table: Table,
    column: &str,
    size: Option<usize>,
    offset: usize,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY rowid",
        column,
        table.name()
    ))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    paginate(rows, size, offset)
}

/// Walk every row and keep `[offset, offset + size)`. Cost is linear in offset.
pub fn paginate<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    size: Option<usize>,
    offset: usize,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for (idx, row) in rows.enumerate() {
        if size.is_some_and(|size| out.len() == size) {
            break;
        }
        let row = row?;
        if idx >= offset {
            out.push(row);
        }
    }
    Ok(out)
}

/// Bind a JSON blob column.
pub fn json_value(value: &serde_json::Value) -> Result<SqlValue> {
    Ok(SqlValue::Text(serde_json::to_string(value)?))
}

pub fn text(value: impl Into<String>) -> SqlValue {
    SqlValue::Text(value.into())
}

pub fn optional_text(value: Option<&str>) -> SqlValue {
    value.map_or(SqlValue::Null, |v| SqlValue::Text(v.to_string()))
}
