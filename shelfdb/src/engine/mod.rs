use crate::config::Storage;
use crate::error::{Result, ShelfError};
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The single SQLite connection shared by the writer and all readers.
///
/// Every engine call takes the connection mutex for the duration of that
/// call only; readers never wait behind queued-but-unexecuted writes.
pub struct Engine {
    conn: Mutex<Option<Connection>>,
}

impl Engine {
    pub fn open(storage: &Storage) -> Result<Self> {
        let conn = match storage {
            Storage::Memory => Connection::open_in_memory()?,
            Storage::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let conn = Connection::open(path)?;
                let mode: String =
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
                log::debug!("opened {} (journal_mode={mode})", path.display());
                conn
            }
        };
        conn.busy_timeout(Duration::from_secs(5))?;
        register_regexp(&conn)?;

        Ok(Engine {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Run a read against the connection.
    pub fn read<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(ShelfError::Closed),
        }
    }

    /// Run a write with exclusive access, so it can open a transaction.
    pub fn write<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.conn.lock();
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(ShelfError::Closed),
        }
    }

    /// Release the connection. Later calls fail with `Closed`.
    pub fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| ShelfError::Sqlite(e))?;
            log::info!("engine connection closed");
        }
        Ok(())
    }
}

/// Register `regexp(pattern, value)`, which backs the `REGEXP` operator.
/// Matches when the pattern is found anywhere in the value.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let text = match ctx.get_raw(1) {
                ValueRef::Null => String::new(),
                ValueRef::Integer(i) => i.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                    String::from_utf8_lossy(bytes).into_owned()
                }
            };
            Ok(pattern.is_match(&text))
        },
    )?;
    Ok(())
}
