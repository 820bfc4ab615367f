//! Transactional SQLite adapter for the rights table.
//!
//! This layer knows nothing about expiration or grant semantics. It opens
//! the database, creates the fixed schema, and exposes transaction control
//! plus insert/update/delete/query over `usb_right_info` rows. Rollback
//! decisions belong to the caller; every failure surfaces as a
//! [`RightsError`], never a panic.

use std::path::Path;

use common::{Result, RightInfo, RightRecord, RightsError};
use rusqlite::{Connection, Row, ToSql};
use tracing::{debug, info};

const RIGHT_TABLE: &str = "usb_right_info";

const CREATE_RIGHT_TABLE: &str = "CREATE TABLE IF NOT EXISTS usb_right_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid INTEGER,
    installTime INTEGER,
    updateTime INTEGER,
    requestTime INTEGER,
    validPeriod INTEGER,
    deviceKey TEXT,
    appId TEXT,
    clientToken TEXT
);";

/// The storage primitive: one connection, one table.
///
/// Not internally synchronized. [`crate::RightsStore`] owns the instance
/// behind a mutex so transactions from different callers never interleave.
pub struct RightDatabase {
    conn: Connection,
}

fn storage_err(e: rusqlite::Error) -> RightsError {
    RightsError::Storage(e.to_string())
}

impl RightDatabase {
    /// Open (or create) the rights database at `path`.
    ///
    /// Schema creation is idempotent, so reopening an existing database is
    /// safe.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RightsError::StorageNotReady(format!("open {}: {}", path.display(), e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| RightsError::StorageNotReady(format!("pragma: {}", e)))?;
        let db = Self { conn };
        db.create_table()?;
        info!("rights database ready: {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database. Used by tests and tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RightsError::StorageNotReady(format!("open in-memory: {}", e)))?;
        let db = Self { conn };
        db.create_table()?;
        Ok(db)
    }

    fn create_table(&self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_RIGHT_TABLE)
            .map_err(|e| RightsError::StorageNotReady(format!("create table: {}", e)))
    }

    /// Begin a transaction. Transactions are not safely nestable.
    pub fn begin_transaction(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(storage_err)
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT;").map_err(storage_err)
    }

    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK;").map_err(storage_err)
    }

    /// Insert one row, returning the storage-assigned id.
    pub fn insert(
        &self,
        device_key: &str,
        app_id: &str,
        client_token: &str,
        info: &RightInfo,
    ) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {RIGHT_TABLE} \
             (uid, installTime, updateTime, requestTime, validPeriod, deviceKey, appId, clientToken) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.conn
            .execute(
                &sql,
                rusqlite::params![
                    info.uid,
                    info.install_time,
                    info.update_time,
                    info.request_time,
                    info.valid_period,
                    device_key,
                    app_id,
                    client_token,
                ],
            )
            .map_err(storage_err)?;
        let id = self.conn.last_insert_rowid();
        debug!("insert right row id={}", id);
        Ok(id)
    }

    /// Rewrite the non-key fields of every row matching `where_clause`.
    ///
    /// Returns the affected-row count; zero matches is a non-error.
    pub fn update(
        &self,
        info: &RightInfo,
        where_clause: &str,
        args: &[&dyn ToSql],
    ) -> Result<usize> {
        let sql = format!(
            "UPDATE {RIGHT_TABLE} SET \
             uid = ?, installTime = ?, updateTime = ?, requestTime = ?, validPeriod = ? \
             WHERE {where_clause}"
        );
        let mut params: Vec<&dyn ToSql> = vec![
            &info.uid,
            &info.install_time,
            &info.update_time,
            &info.request_time,
            &info.valid_period,
        ];
        params.extend_from_slice(args);
        self.conn.execute(&sql, &params[..]).map_err(storage_err)
    }

    /// Delete every row matching `where_clause`.
    ///
    /// Returns the affected-row count; zero matches is a non-error, only a
    /// storage failure is.
    pub fn delete(&self, where_clause: &str, args: &[&dyn ToSql]) -> Result<usize> {
        let sql = format!("DELETE FROM {RIGHT_TABLE} WHERE {where_clause}");
        self.conn.execute(&sql, args).map_err(storage_err)
    }

    /// Fetch full rows, optionally filtered.
    pub fn query_rows(
        &self,
        where_clause: Option<&str>,
        args: &[&dyn ToSql],
    ) -> Result<Vec<RightRecord>> {
        let sql = match where_clause {
            Some(clause) => format!("SELECT * FROM {RIGHT_TABLE} WHERE {clause}"),
            None => format!("SELECT * FROM {RIGHT_TABLE}"),
        };
        let mut stmt = self.conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt
            .query_map(args, decode_record)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(rows)
    }

    /// Count rows matching `where_clause`.
    pub fn count(&self, where_clause: &str, args: &[&dyn ToSql]) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {RIGHT_TABLE} WHERE {where_clause}");
        self.conn
            .query_row(&sql, args, |row| row.get(0))
            .map_err(storage_err)
    }

    /// Read a single text column from an arbitrary SELECT.
    pub fn query_column_text(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql).map_err(storage_err)?;
        let values = stmt
            .query_map(args, |row| row.get(0))
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(values)
    }

    /// Read a single integer column from an arbitrary SELECT.
    pub fn query_column_i64(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(sql).map_err(storage_err)?;
        let values = stmt
            .query_map(args, |row| row.get(0))
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(values)
    }

    /// Escape hatch for statements the typed surface does not cover.
    pub fn execute_sql(&self, sql: &str, args: &[&dyn ToSql]) -> Result<usize> {
        self.conn.execute(sql, args).map_err(storage_err)
    }
}

/// Decode one row by column name.
///
/// Fails closed: a missing or mistyped column aborts the whole query
/// instead of partially populating a record.
fn decode_record(row: &Row<'_>) -> rusqlite::Result<RightRecord> {
    Ok(RightRecord {
        id: row.get("id")?,
        uid: row.get("uid")?,
        install_time: row.get("installTime")?,
        update_time: row.get("updateTime")?,
        request_time: row.get("requestTime")?,
        valid_period: row.get("validPeriod")?,
        device_key: row.get("deviceKey")?,
        app_id: row.get("appId")?,
        client_token: row.get("clientToken")?,
    })
}
