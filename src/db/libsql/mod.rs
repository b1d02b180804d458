//! libSQL backend for the Database trait.
//!
//! SQLite has no row locks, so every operation that mutates lawyer load or
//! case assignment runs inside `BEGIN IMMEDIATE`: the write lock is taken
//! before the first read, which makes the read-decide-write sequence
//! serializable. Concurrent writers wait on the busy timeout instead of
//! failing outright.

mod cases;
mod intakes;
mod users;

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Connection, Value};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::error::DatabaseError;

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// libSQL (embedded SQLite or Turso remote replica) database backend.
pub struct LibSqlBackend {
    db: libsql::Database,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("failed to create database dir {:?}: {}", parent, e))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a local replica synced from a remote libSQL server.
    pub async fn new_remote_replica(
        path: &Path,
        url: &str,
        auth_token: &str,
    ) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_remote_replica(path, url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a new connection with the busy timeout applied.
    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self.db.connect()?;
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await?;
        Ok(conn)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(crate::db::libsql_migrations::SCHEMA)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

/// Commit on success, roll back on failure.
pub(crate) async fn finish_tx<T, E>(conn: &Connection, result: Result<T, E>) -> Result<T, E>
where
    E: From<libsql::Error>,
{
    match result {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(e.into());
            }
            Ok(value)
        }
        Err(err) => {
            let _ = conn.execute("ROLLBACK", ()).await;
            Err(err)
        }
    }
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn fmt_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{raw}': {e}")))
}

pub(crate) fn parse_date_opt(raw: Option<String>) -> Result<Option<NaiveDate>, DatabaseError> {
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map_err(|e| DatabaseError::Serialization(format!("invalid date '{value}': {e}")))
    })
    .transpose()
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} uuid: {}", field, e)))
}

pub(crate) fn parse_uuid_opt(raw: Option<String>, field: &str) -> Result<Option<Uuid>, DatabaseError> {
    raw.map(|value| parse_uuid(&value, field)).transpose()
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} decimal '{raw}': {e}")))
}

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(Value::Text(text)) => Some(text),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_i64(row: &libsql::Row, idx: i32) -> Option<i64> {
    match row.get_value(idx) {
        Ok(Value::Integer(value)) => Some(value),
        _ => None,
    }
}

pub(crate) fn get_i32(row: &libsql::Row, idx: i32, field: &str) -> Result<i32, DatabaseError> {
    i32::try_from(get_i64(row, idx))
        .map_err(|_| DatabaseError::Serialization(format!("{field} out of range")))
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(text) => Value::Text(text.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_uuid(value: Option<Uuid>) -> Value {
    match value {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}
