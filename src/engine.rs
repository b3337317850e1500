//! Storage Engine Adapter (C1): the thin layer over `rusqlite::Connection`
//! that C2–C4 are built on. Exposes `exec`/`select`/`transaction`/
//! `serialize`/`deserialize`/`is_connected` and nothing else — no
//! domain-specific SQL lives here.

use std::sync::Once;

use rusqlite::{Connection, Row};

use crate::error::{Error, Result};

static VEC_EXTENSION_INIT: Once = Once::new();

/// Registers the `sqlite-vec` loadable extension via
/// `sqlite3_auto_extension`, so every connection opened afterwards has
/// `vec0` virtual tables available. Must run before any connection is
/// opened; safe to call more than once.
fn register_vec_extension() {
    VEC_EXTENSION_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Owns the single `rusqlite::Connection` used by the worker thread (C5).
/// Not `Send`-shared: exactly one `SqlEngine` exists per store, and it
/// never leaves the worker thread that created it.
pub struct SqlEngine {
    conn: Connection,
}

impl SqlEngine {
    pub fn open(path: &str) -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(SqlEngine { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(SqlEngine { conn })
    }

    fn configure(conn: &Connection) -> Result<()> {
        use crate::config::sqlite as cfg;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA temp_store = MEMORY;\n\
             PRAGMA cache_size = {cache_size};\n\
             PRAGMA mmap_size = {mmap_size};\n\
             PRAGMA busy_timeout = {busy_timeout};\n\
             PRAGMA wal_autocheckpoint = {wal_autocheckpoint};\n\
             PRAGMA foreign_keys = ON;\n",
            cache_size = cfg::PRAGMA_CACHE_SIZE_KIB_NEG,
            mmap_size = cfg::PRAGMA_MMAP_SIZE_BYTES,
            busy_timeout = cfg::PRAGMA_BUSY_TIMEOUT_MS,
            wal_autocheckpoint = cfg::PRAGMA_WAL_AUTOCHECKPOINT_PAGES,
        ))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// A statement that yields no rows: DDL and INSERT/UPDATE/DELETE.
    pub fn exec(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
        exec(&self.conn, sql, params)
    }

    /// A statement that yields zero or more rows, fully materialized via
    /// `row_fn`.
    pub fn select<T, F>(&self, sql: &str, params: &[&dyn rusqlite::ToSql], row_fn: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        select(&self.conn, sql, params, row_fn)
    }

    /// Acquires a write transaction, runs `f`, commits on `Ok`, rolls back
    /// on `Err`. `rusqlite::Transaction`'s own `Drop` already rolls back an
    /// uncommitted transaction, but committing/rolling back explicitly here
    /// keeps the failure visible in the returned `Result` rather than only
    /// observable as "the write silently didn't happen."
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    {
        let txn = self.conn.transaction()?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    /// Whole-database snapshot via a hot backup into a fresh in-memory
    /// connection, then reading that connection's backing file back out.
    /// `rusqlite` does not expose `sqlite3_serialize` directly, so a backup
    /// round-trip through a temp file stands in for it (documented in
    /// `DESIGN.md`).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let tmp = tempfile::NamedTempFile::new()?;
        let path = tmp.path();
        {
            let mut dest = Connection::open(path)?;
            let backup = rusqlite::backup::Backup::new(&self.conn, &mut dest)?;
            backup.run_to_completion(64, std::time::Duration::from_millis(50), None)?;
        }
        let bytes = std::fs::read(path)?;
        Ok(bytes)
    }

    /// Restores this engine's connection from a snapshot produced by
    /// `serialize`, by writing it to a temp file and backing up from there
    /// into the live in-memory/on-disk connection.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new()?;
        std::fs::write(tmp.path(), bytes)?;
        let src = Connection::open(tmp.path())?;
        let backup = rusqlite::backup::Backup::new(&src, &mut self.conn)?;
        backup.run_to_completion(64, std::time::Duration::from_millis(50), None)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.conn.execute_batch("SELECT 1").is_ok()
    }
}

/// Free function so both `SqlEngine` and code running inside an open
/// `rusqlite::Transaction` (which derefs to `Connection`) can issue the
/// same exec call without duplicating the error-wrapping logic.
pub fn exec(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<usize> {
    conn.execute(sql, params)
        .map_err(|e| Error::database(sql, params.len(), e))
}

pub fn select<T, F>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
    row_fn: F,
) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::database(sql, params.len(), e))?;
    let rows = stmt
        .query_map(params, row_fn)
        .map_err(|e| Error::database(sql, params.len(), e))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| Error::database(sql, params.len(), e))?);
    }
    Ok(out)
}

/// Returns the UTF-8 byte length of `s`, the quantity the marshalling
/// contract requires (never `chars().count()`) when sizing buffers or
/// reporting context for a multibyte string bound as a SQL parameter.
pub fn utf8_byte_len(s: &str) -> usize {
    s.len()
}
