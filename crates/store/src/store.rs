//! Domain-level rights store: grant CRUD plus the expiration predicate.
//!
//! Every operation locks the store mutex and runs its storage calls inside
//! one begin/commit/rollback, so concurrent operations on the same grant
//! tuple never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::{
    DEFAULT_VALID_PERIOD_SECS, Result, RightInfo, RightRecord, VALID_PERIOD_ALWAYS,
    VALID_PERIOD_TEMPORARY,
};
use rusqlite::ToSql;
use tracing::{debug, warn};

use crate::database::RightDatabase;

const TUPLE_WHERE: &str = "uid = ? AND deviceKey = ? AND appId = ? AND clientToken = ?";

/// How a single record relates to `now`.
enum RecordValidity {
    Valid,
    Expired,
    /// `install_time` is later than `update_time` or `request_time`, which
    /// no legitimate grant sequence produces. Either the row is corrupt or
    /// the app was reinstalled before the grant was recorded; both are
    /// treated as expired (fail-closed) and logged for the distinction.
    Inconsistent,
}

fn classify(record: &RightRecord, now: i64) -> RecordValidity {
    if record.valid_period == VALID_PERIOD_TEMPORARY {
        // session-scoped, lives until the device detaches
        return RecordValidity::Valid;
    }
    if record.valid_period == VALID_PERIOD_ALWAYS {
        return RecordValidity::Valid;
    }
    if record.request_time.saturating_add(record.valid_period) > now {
        return RecordValidity::Valid;
    }
    if record.install_time > record.update_time || record.install_time > record.request_time {
        return RecordValidity::Inconsistent;
    }
    RecordValidity::Expired
}

/// Expiration predicate for one record at `now` (epoch seconds).
///
/// Unknown or inconsistent state defaults to expired.
pub fn record_expired(record: &RightRecord, now: i64) -> bool {
    match classify(record, now) {
        RecordValidity::Valid => false,
        RecordValidity::Expired => true,
        RecordValidity::Inconsistent => {
            warn!(
                "inconsistent grant timestamps: id={} install={} update={} request={}",
                record.id, record.install_time, record.update_time, record.request_time
            );
            true
        }
    }
}

/// Thread-safe store of [`RightRecord`] rows.
pub struct RightsStore {
    db: Mutex<RightDatabase>,
}

impl RightsStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Mutex::new(RightDatabase::open(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Mutex::new(RightDatabase::open_in_memory()?),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RightDatabase> {
        // A poisoned mutex only means another caller panicked mid-operation;
        // its transaction was never committed, so the data is intact.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` inside one transaction, rolling back on any failure.
    fn transact<T>(&self, op: impl FnOnce(&RightDatabase) -> Result<T>) -> Result<T> {
        let db = self.lock();
        db.begin_transaction()?;
        match op(&db) {
            Ok(value) => {
                if let Err(e) = db.commit() {
                    let _ = db.rollback();
                    return Err(e);
                }
                Ok(value)
            }
            Err(e) => {
                let _ = db.rollback();
                Err(e)
            }
        }
    }

    /// Whether the grant tuple has no usable record at `now`.
    ///
    /// Any matching non-expired row grants access; no rows means expired.
    pub fn is_expired(
        &self,
        uid: i32,
        device_key: &str,
        app_id: &str,
        client_token: &str,
        now: i64,
    ) -> Result<bool> {
        let records = self.query_records(uid, device_key, app_id, client_token)?;
        if records.is_empty() {
            debug!("no grant record: uid={} dev={} app={}", uid, device_key, app_id);
            return Ok(true);
        }
        Ok(records.iter().all(|r| record_expired(r, now)))
    }

    /// Insert the tuple's record or refresh it if one already exists.
    ///
    /// The check and the write share one transaction under the store mutex,
    /// so racing callers cannot produce duplicate rows for a tuple.
    pub fn add_or_update(
        &self,
        uid: i32,
        device_key: &str,
        app_id: &str,
        client_token: &str,
        info: RightInfo,
    ) -> Result<()> {
        self.transact(|db| {
            let args: &[&dyn ToSql] = &[&uid, &device_key, &app_id, &client_token];
            if db.count(TUPLE_WHERE, args)? > 0 {
                db.update(&info, TUPLE_WHERE, args)?;
                debug!("refreshed grant: uid={} dev={} app={}", uid, device_key, app_id);
            } else {
                db.insert(device_key, app_id, client_token, &info)?;
                debug!("recorded grant: uid={} dev={} app={}", uid, device_key, app_id);
            }
            Ok(())
        })
    }

    // ---- queries -----------------------------------------------------

    pub fn query_user_records(&self, uid: i32) -> Result<Vec<RightRecord>> {
        self.transact(|db| db.query_rows(Some("uid = ?"), &[&uid]))
    }

    pub fn query_device_records(&self, uid: i32, device_key: &str) -> Result<Vec<RightRecord>> {
        self.transact(|db| db.query_rows(Some("uid = ? AND deviceKey = ?"), &[&uid, &device_key]))
    }

    pub fn query_app_records(&self, uid: i32, app_id: &str) -> Result<Vec<RightRecord>> {
        self.transact(|db| db.query_rows(Some("uid = ? AND appId = ?"), &[&uid, &app_id]))
    }

    /// All rows for the exact grant tuple.
    pub fn query_records(
        &self,
        uid: i32,
        device_key: &str,
        app_id: &str,
        client_token: &str,
    ) -> Result<Vec<RightRecord>> {
        self.transact(|db| {
            db.query_rows(Some(TUPLE_WHERE), &[&uid, &device_key, &app_id, &client_token])
        })
    }

    /// Distinct uids that still hold at least one record.
    pub fn query_right_uids(&self) -> Result<Vec<i32>> {
        let raw = self.transact(|db| {
            db.query_column_i64("SELECT DISTINCT uid FROM usb_right_info", &[])
        })?;
        let mut uids = Vec::with_capacity(raw.len());
        for value in raw {
            match i32::try_from(value) {
                Ok(uid) => uids.push(uid),
                Err(_) => warn!("stored uid out of range, skipping: {}", value),
            }
        }
        Ok(uids)
    }

    /// Distinct app ids holding records for `uid`.
    pub fn query_right_apps(&self, uid: i32) -> Result<Vec<String>> {
        self.transact(|db| {
            db.query_column_text(
                "SELECT DISTINCT appId FROM usb_right_info WHERE uid = ?",
                &[&uid],
            )
        })
    }

    // ---- deletes -----------------------------------------------------
    //
    // Every variant returns the affected-row count; zero is a normal
    // outcome so cleanup sweeps continue past empty results.

    pub fn delete_record(
        &self,
        uid: i32,
        device_key: &str,
        app_id: &str,
        client_token: &str,
    ) -> Result<usize> {
        self.transact(|db| db.delete(TUPLE_WHERE, &[&uid, &device_key, &app_id, &client_token]))
    }

    pub fn delete_device_records(&self, uid: i32, device_key: &str) -> Result<usize> {
        self.transact(|db| db.delete("uid = ? AND deviceKey = ?", &[&uid, &device_key]))
    }

    pub fn delete_app_records(&self, uid: i32, app_id: &str) -> Result<usize> {
        self.transact(|db| db.delete("uid = ? AND appId = ?", &[&uid, &app_id]))
    }

    /// Delete every record of `uid` whose app id is in `app_ids`.
    pub fn delete_apps_records(&self, uid: i32, app_ids: &[String]) -> Result<usize> {
        if app_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; app_ids.len()].join(", ");
        let clause = format!("uid = ? AND appId IN ({placeholders})");
        self.transact(|db| {
            let mut args: Vec<&dyn ToSql> = vec![&uid];
            for app in app_ids {
                args.push(app);
            }
            db.delete(&clause, &args)
        })
    }

    pub fn delete_uid_records(&self, uid: i32) -> Result<usize> {
        self.transact(|db| db.delete("uid = ?", &[&uid]))
    }

    /// Delete `uid`'s timed grants whose request time fell out of the
    /// default window. Sentinel periods (temporary, permanent) are kept.
    pub fn delete_normal_expired(&self, uid: i32, now: i64) -> Result<usize> {
        let cutoff = now - DEFAULT_VALID_PERIOD_SECS;
        self.transact(|db| {
            db.delete(
                "uid = ? AND requestTime < ? AND validPeriod NOT IN (?, ?)",
                &[&uid, &cutoff, &VALID_PERIOD_TEMPORARY, &VALID_PERIOD_ALWAYS],
            )
        })
    }

    /// Delete every session-scoped grant for `device_key`, across users.
    /// Runs when the device detaches.
    pub fn delete_temporary_records(&self, device_key: &str) -> Result<usize> {
        self.transact(|db| {
            db.delete(
                "validPeriod = ? AND deviceKey = ?",
                &[&VALID_PERIOD_TEMPORARY, &device_key],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(install: i64, update: i64, request: i64, valid: i64) -> RightRecord {
        RightRecord {
            id: 1,
            uid: 100,
            install_time: install,
            update_time: update,
            request_time: request,
            valid_period: valid,
            device_key: "1234-5678".into(),
            app_id: "com.example.app".into(),
            client_token: "T1".into(),
        }
    }

    #[test]
    fn test_temporary_grant_never_expires_by_time() {
        let r = record(900, 950, 1000, VALID_PERIOD_TEMPORARY);
        assert!(!record_expired(&r, i64::MAX));
    }

    #[test]
    fn test_permanent_grant_never_expires() {
        let r = record(900, 950, 1000, VALID_PERIOD_ALWAYS);
        assert!(!record_expired(&r, i64::MAX));
    }

    #[test]
    fn test_timed_grant_window() {
        let r = record(900, 950, 1000, 300);
        assert!(!record_expired(&r, 1000));
        assert!(!record_expired(&r, 1299));
        // closed at exactly request + period
        assert!(record_expired(&r, 1300));
        assert!(record_expired(&r, 1301));
    }

    #[test]
    fn test_inconsistent_timestamps_fail_closed() {
        // install after update
        let r = record(960, 950, 1000, 300);
        assert!(record_expired(&r, 1301));
        // install after request
        let r = record(1100, 1200, 1000, 300);
        assert!(record_expired(&r, 1301));
    }

    #[test]
    fn test_unexpired_window_wins_over_inconsistency() {
        // the window check runs before the consistency check
        let r = record(960, 950, 1000, 300);
        assert!(!record_expired(&r, 1100));
    }
}
