//! Ephemeral backend: an in-memory SQLite database per call

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, InterruptHandle};
use serde_json::{Number, Value};
use tracing::{debug, instrument, warn};

use crate::config::SqlSettings;
use crate::sandbox::format_seconds;
use crate::sql::{
    Execution, IsolationBackend, ResultSet, Row, SqlError, ValidationState, ValidationTrace,
};

/// Run a capsule in a fresh in-memory database on a blocking thread
#[instrument(skip_all)]
pub(crate) async fn run(
    schema: Vec<String>,
    reference: String,
    candidate: Option<String>,
    settings: SqlSettings,
) -> Result<Execution, SqlError> {
    tokio::task::spawn_blocking(move || {
        run_blocking(&schema, &reference, candidate.as_deref(), &settings)
    })
    .await
    .map_err(|e| SqlError::Internal(format!("sqlite task failed: {e}")))?
}

fn run_blocking(
    schema: &[String],
    reference: &str,
    candidate: Option<&str>,
    settings: &SqlSettings,
) -> Result<Execution, SqlError> {
    let backend = IsolationBackend::Ephemeral;
    let mut trace = ValidationTrace::new();
    let conn = Connection::open_in_memory()
        .map_err(|e| SqlError::Internal(format!("cannot open in-memory database: {e}")))?;
    let timeout = settings.statement_timeout();

    let applied = schema.iter().try_for_each(|statement| {
        guarded(&conn, timeout, |conn| conn.execute_batch(statement))
    });
    if let Err(e) = applied {
        trace.fail();
        return Err(e.in_setup(backend));
    }
    trace.advance(ValidationState::SchemaApplied)?;
    debug!(statements = schema.len(), "schema applied");

    let expected = match query(&conn, reference, settings) {
        Ok(expected) => expected,
        Err(e) => {
            trace.fail();
            return Err(e.in_setup(backend));
        }
    };
    trace.advance(ValidationState::ReferenceExecuted)?;

    let user = match candidate {
        Some(candidate) => {
            let result = query(&conn, candidate, settings);
            if result.is_ok() {
                trace.advance(ValidationState::UserExecuted)?;
            }
            Some(result)
        }
        None => {
            trace.advance(ValidationState::Skipped)?;
            None
        }
    };

    // Dropping the connection discards the database
    drop(conn);
    Ok(Execution {
        expected,
        user,
        trace,
    })
}

/// Run one query and collect its rows, up to the row cap
fn query(conn: &Connection, sql: &str, settings: &SqlSettings) -> Result<ResultSet, SqlError> {
    let timeout = settings.statement_timeout();
    let max_rows = settings.max_rows;
    guarded(conn, timeout, |conn| {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| (*name).to_owned())
            .collect();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            if rows.len() == max_rows {
                return Ok(Err(SqlError::TooManyRows(max_rows)));
            }
            let mut values = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                values.insert(column.clone(), to_json(row.get_ref(idx)?));
            }
            rows.push(values);
        }
        Ok(Ok(ResultSet { columns, rows }))
    })?
}

/// Run `f` with a watchdog that interrupts the connection at `timeout`
fn guarded<T>(
    conn: &Connection,
    timeout: Duration,
    f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T, SqlError> {
    let watchdog = Watchdog::arm(conn.get_interrupt_handle(), timeout);
    let result = f(conn);
    let fired = watchdog.disarm();
    result.map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if fired || err.code == ErrorCode::OperationInterrupted =>
        {
            SqlError::Timeout(format_seconds(timeout))
        }
        other => SqlError::Query(other.to_string()),
    })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(hex(bytes)),
    }
}

/// Blobs render like PostgreSQL's `bytea` text output
fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Thread that interrupts a statement once its timeout passes
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<bool>>,
}

impl Watchdog {
    fn arm(handle: InterruptHandle, timeout: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("capsule-sql-watchdog".to_owned())
            .spawn(move || match cancelled.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    handle.interrupt();
                    true
                }
                _ => false,
            })
            .map_err(|e| warn!(error = %e, "failed to start sql watchdog"))
            .ok();
        Self {
            cancel: Some(cancel),
            thread,
        }
    }

    /// Stop the watchdog; true if it fired
    fn disarm(mut self) -> bool {
        drop(self.cancel.take());
        self.thread
            .take()
            .is_some_and(|thread| thread.join().unwrap_or(false))
    }
}
