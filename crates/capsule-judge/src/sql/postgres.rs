//! Transactional backend: one PostgreSQL transaction, always rolled back
//!
//! Every statement of a capsule runs inside a single transaction with a local
//! statement timeout. The transaction is rolled back whether the run succeeded
//! or failed, so the shared database is left as it was.

use std::time::Duration;

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use serde_json::{Number, Value};
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, SimpleQueryMessage, Transaction};
use tracing::{debug, instrument, warn};

use crate::config::{PostgresSettings, SqlSettings};
use crate::sandbox::format_seconds;
use crate::sql::{
    Execution, IsolationBackend, ResultSet, Row, SqlError, ValidationState, ValidationTrace,
};

/// Run a capsule inside a transaction that is always rolled back
#[instrument(skip_all, fields(host = %pg.host, dbname = %pg.dbname))]
pub(crate) async fn run(
    schema: &[String],
    reference: &str,
    candidate: Option<&str>,
    settings: &SqlSettings,
    pg: &PostgresSettings,
) -> Result<Execution, SqlError> {
    let (mut client, connection) = connect(pg).await?;

    let transaction = client
        .transaction()
        .await
        .map_err(|e| SqlError::Connection(e.to_string()))?;
    let result = run_in_transaction(&transaction, schema, reference, candidate, settings).await;

    // Rollback happens on every path; a failed rollback still ends the
    // session below, which aborts the transaction server side
    match transaction.rollback().await {
        Ok(()) => debug!("transaction rolled back"),
        Err(e) => warn!(error = %e, "rollback failed"),
    }
    drop(client);
    connection.abort();

    result
}

async fn connect(
    pg: &PostgresSettings,
) -> Result<(Client, tokio::task::JoinHandle<()>), SqlError> {
    let tls = TlsConnector::new()
        .map_err(|e| SqlError::Configuration(format!("TLS unavailable: {e}")))?;
    let tls = MakeTlsConnector::new(tls);

    let mut config = tokio_postgres::Config::new();
    config
        .host(&pg.host)
        .port(pg.port)
        .dbname(&pg.dbname)
        .user(&pg.user)
        .password(&pg.password)
        .connect_timeout(Duration::from_secs(pg.connect_timeout))
        .ssl_mode(SslMode::Require)
        .application_name("capsule-judge");

    let (client, connection) = config
        .connect(tls)
        .await
        .map_err(|e| SqlError::Connection(e.to_string()))?;
    let connection = tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "postgres connection closed with error");
        }
    });
    Ok((client, connection))
}

async fn run_in_transaction(
    tx: &Transaction<'_>,
    schema: &[String],
    reference: &str,
    candidate: Option<&str>,
    settings: &SqlSettings,
) -> Result<Execution, SqlError> {
    let backend = IsolationBackend::TransactionalRollback;
    let mut trace = ValidationTrace::new();
    let timeout = settings.statement_timeout();

    let timeout_ms = timeout.as_millis().max(1);
    tx.batch_execute(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
        .await
        .map_err(|e| SqlError::Connection(e.to_string()))?;

    for statement in schema {
        if let Err(e) = tx.batch_execute(statement).await {
            trace.fail();
            return Err(query_error(&e, timeout).in_setup(backend));
        }
    }
    trace.advance(ValidationState::SchemaApplied)?;
    debug!(statements = schema.len(), "schema applied");

    let expected = match query(tx, reference, settings).await {
        Ok(expected) => expected,
        Err(e) => {
            trace.fail();
            return Err(e.in_setup(backend));
        }
    };
    trace.advance(ValidationState::ReferenceExecuted)?;

    let user = match candidate {
        Some(candidate) => {
            let result = query(tx, candidate, settings).await;
            if result.is_ok() {
                trace.advance(ValidationState::UserExecuted)?;
            }
            Some(result.map_err(user_facing))
        }
        None => {
            trace.advance(ValidationState::Skipped)?;
            None
        }
    };

    Ok(Execution {
        expected,
        user,
        trace,
    })
}

/// Run one query; column types come from preparing it, values from the text protocol
async fn query(tx: &Transaction<'_>, sql: &str, settings: &SqlSettings) -> Result<ResultSet, SqlError> {
    let timeout = settings.statement_timeout();
    let statement = tx.prepare(sql).await.map_err(|e| query_error(&e, timeout))?;
    let columns: Vec<(String, Type)> = statement
        .columns()
        .iter()
        .map(|c| (c.name().to_owned(), c.type_().clone()))
        .collect();

    let messages = tx
        .simple_query(sql)
        .await
        .map_err(|e| query_error(&e, timeout))?;

    let mut rows = Vec::new();
    for message in messages {
        let SimpleQueryMessage::Row(row) = message else {
            continue;
        };
        if rows.len() == settings.max_rows {
            return Err(SqlError::TooManyRows(settings.max_rows));
        }
        let mut values = Row::new();
        for (idx, (name, ty)) in columns.iter().enumerate() {
            values.insert(name.clone(), to_json(row.get(idx), ty));
        }
        rows.push(values);
    }

    Ok(ResultSet {
        columns: columns.into_iter().map(|(name, _)| name).collect(),
        rows,
    })
}

fn query_error(e: &tokio_postgres::Error, timeout: Duration) -> SqlError {
    match e.as_db_error() {
        Some(db) if db.code() == &SqlState::QUERY_CANCELED => {
            SqlError::Timeout(format_seconds(timeout))
        }
        Some(db) => SqlError::Query(db.message().to_owned()),
        None if e.is_closed() => SqlError::Connection(e.to_string()),
        None => SqlError::Query(e.to_string()),
    }
}

/// Short explanations for the errors students hit most
fn user_facing(e: SqlError) -> SqlError {
    let SqlError::Query(message) = e else {
        return e;
    };
    let lower = message.to_lowercase();
    let rewritten = if lower.contains("permission denied") {
        "Permission denied - this query requires privileges not available in the exercise environment"
            .to_owned()
    } else if lower.contains("syntax error") {
        format!("SQL syntax error: {message}")
    } else if lower.contains("does not exist") {
        format!("Database object does not exist: {message}")
    } else {
        message
    };
    SqlError::Query(rewritten)
}

/// Convert a text-protocol value using the column's type
fn to_json(text: Option<&str>, ty: &Type) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    let parsed = match *ty {
        Type::BOOL => match text {
            "t" => Some(Value::Bool(true)),
            "f" => Some(Value::Bool(false)),
            _ => None,
        },
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            text.parse::<i64>().ok().map(Value::from)
        }
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        Type::JSON | Type::JSONB => serde_json::from_str(text).ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(text.to_owned()))
}
