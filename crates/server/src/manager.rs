//! The USB access-rights decision point.
//!
//! Resource-specific managers (host device, accessory, serial port) ask one
//! [`RightsManager`] whether an app may touch a device. Decisions come from
//! the persistent rights store; misses go through the single-flight consent
//! dialog; stale grants are removed by the four-reason cleanup sweep.
//!
//! Cleanup is always best-effort: no sweep branch is allowed to turn a
//! working access check into a failure, so sweep errors are logged and the
//! caller's decision proceeds from whatever state the store is in.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::{
    DEFAULT_VALID_PERIOD_SECS, DenialReason, DeviceKey, GrantResult, Result, RightInfo,
    RightsError, USER_ID_CONSOLE,
};
use store::RightsStore;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditLog};
use crate::consent::{ConsentLauncher, ConsentRequest, ConsentSignal};
use crate::providers::{Accounts, AppMetadata, Clock, Identity};

/// Sweep reason: the app no longer exists for the uid.
pub const SWEEP_APP_UNINSTALLED: u32 = 1 << 0;
/// Sweep reason: the OS account behind a stored uid is gone.
pub const SWEEP_USER_DELETED: u32 = 1 << 1;
/// Sweep reason: timed grants whose window has passed.
pub const SWEEP_EXPIRED: u32 = 1 << 2;
/// Sweep reason: the app was reinstalled since the grant was recorded.
pub const SWEEP_APP_REINSTALLED: u32 = 1 << 3;

/// All four sweep reasons.
pub const SWEEP_ALL: u32 =
    SWEEP_APP_UNINSTALLED | SWEEP_USER_DELETED | SWEEP_EXPIRED | SWEEP_APP_REINSTALLED;

/// Outcome of an explicit expiry cleanup over a set of devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Devices whose session grants were swept.
    pub swept_devices: usize,
    /// Devices whose sweep failed (logged, not fatal).
    pub failed_devices: usize,
    /// Timed grants removed for the current user.
    pub expired_removed: usize,
}

/// The single decision point for USB access rights.
pub struct RightsManager {
    store: Arc<RightsStore>,
    metadata: Arc<dyn AppMetadata>,
    identity: Arc<dyn Identity>,
    accounts: Arc<dyn Accounts>,
    consent: Arc<dyn ConsentLauncher>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLog>>,
    consent_timeout: Duration,
    /// Single-flight consent slot: at most one modal dialog process-wide.
    dialog_slot: Mutex<()>,
}

impl RightsManager {
    pub fn new(
        store: Arc<RightsStore>,
        metadata: Arc<dyn AppMetadata>,
        identity: Arc<dyn Identity>,
        accounts: Arc<dyn Accounts>,
        consent: Arc<dyn ConsentLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            metadata,
            identity,
            accounts,
            consent,
            clock,
            audit: None,
            consent_timeout: Duration::from_secs(60),
            dialog_slot: Mutex::new(()),
        }
    }

    /// Attach an audit log for grant decisions.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Bound the wait on the consent dialog; timeout denies.
    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = timeout;
        self
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(log) = &self.audit {
            log.log(&event);
        }
    }

    /// Whether `user_id`'s app currently holds a usable grant for the
    /// device.
    ///
    /// The console user always has access. Everyone else gets an
    /// opportunistic expiry sweep for their own uid first (best-effort),
    /// then the store's verdict. Store failures deny (fail-closed).
    pub fn has_right(
        &self,
        device_key: &DeviceKey,
        app_id: &str,
        client_token: &str,
        user_id: i32,
    ) -> bool {
        debug!("has_right: uid={} dev={} app={}", user_id, device_key, app_id);
        if user_id == USER_ID_CONSOLE {
            debug!("console caller, bypass");
            return true;
        }
        let now = self.clock.now();
        if let Err(e) = self.tidy_up(user_id, SWEEP_EXPIRED) {
            debug!("opportunistic expiry sweep failed (ignored): {}", e);
        }
        match self
            .store
            .is_expired(user_id, device_key.as_str(), app_id, client_token, now)
        {
            // no record or expired record: add a right next time
            Ok(expired) => !expired,
            Err(e) => {
                warn!("right lookup failed, denying: {}", e);
                false
            }
        }
    }

    /// Resolve access for the app, prompting the user if needed.
    ///
    /// Privileged callers bypass everything. Otherwise a current grant wins
    /// immediately; a miss takes the process-wide consent slot, shows the
    /// dialog, and re-evaluates [`has_right`](Self::has_right) once it
    /// closes. The wait on the dialog is bounded; timeout denies.
    pub fn request_right(
        &self,
        bus_dev_key: &str,
        device_key: &DeviceKey,
        app_id: &str,
        client_token: &str,
        user_id: i32,
    ) -> GrantResult {
        debug!(
            "request_right: busdev={} dev={} app={}",
            bus_dev_key, device_key, app_id
        );
        if self.identity.is_privileged_caller() {
            debug!("privileged caller, bypass");
            return GrantResult::Granted;
        }
        let result = if self.has_right(device_key, app_id, client_token, user_id) {
            GrantResult::Granted
        } else {
            self.user_agreement_by_dialog(bus_dev_key, device_key, app_id, client_token, user_id)
        };
        self.audit(AuditEvent::GrantRequested {
            device_key: device_key.to_string(),
            app_id: app_id.to_string(),
            uid: user_id,
            granted: result.is_granted(),
            denial: match &result {
                GrantResult::Granted => None,
                GrantResult::Denied(reason) => Some(reason.to_string()),
            },
        });
        result
    }

    fn user_agreement_by_dialog(
        &self,
        bus_dev_key: &str,
        device_key: &DeviceKey,
        app_id: &str,
        client_token: &str,
        user_id: i32,
    ) -> GrantResult {
        // There can only be one dialog at a time
        let _slot = self.dialog_slot.lock().unwrap_or_else(PoisonError::into_inner);
        let signal = ConsentSignal::new();
        let request = ConsentRequest {
            bus_dev_key: bus_dev_key.to_string(),
            device_key: device_key.clone(),
            app_id: app_id.to_string(),
            client_token: client_token.to_string(),
        };
        if let Err(e) = self.consent.launch(&request, signal.clone()) {
            warn!("consent dialog launch failed: {}", e);
            return GrantResult::Denied(DenialReason::ConsentUnavailable);
        }
        // Waiting for the user to click
        if !signal.wait(self.consent_timeout) {
            warn!(
                "consent dialog for {} did not complete within {:?}",
                device_key, self.consent_timeout
            );
            return GrantResult::Denied(DenialReason::ConsentTimedOut);
        }
        if self.has_right(device_key, app_id, client_token, user_id) {
            GrantResult::Granted
        } else {
            debug!("user did not agree: dev={} app={}", device_key, app_id);
            GrantResult::Denied(DenialReason::UserRefused)
        }
    }

    /// Record (or refresh) a grant with the default validity window.
    ///
    /// Install/update timestamps come from the metadata collaborator when
    /// it answers; otherwise the grant proceeds with the request time for
    /// both, which keeps the record self-consistent.
    pub fn add_device_right(
        &self,
        device_key: &DeviceKey,
        app_id: &str,
        client_token: &str,
        user_id: i32,
    ) -> Result<()> {
        if user_id == USER_ID_CONSOLE {
            debug!("console caller, bypass");
            return Ok(());
        }
        let now = self.clock.now();
        let (install_time, update_time) =
            match self.metadata.install_and_update_time(user_id, app_id) {
                Ok(times) => times,
                Err(e) => {
                    warn!(
                        "install/update time unavailable for {}/{}: {}",
                        app_id, user_id, e
                    );
                    (now, now)
                }
            };
        let info = RightInfo {
            uid: user_id,
            install_time,
            update_time,
            request_time: now,
            valid_period: DEFAULT_VALID_PERIOD_SECS,
        };
        self.store
            .add_or_update(user_id, device_key.as_str(), app_id, client_token, info)?;
        info!("grant recorded: uid={} dev={} app={}", user_id, device_key, app_id);
        self.audit(AuditEvent::GrantAdded {
            device_key: device_key.to_string(),
            app_id: app_id.to_string(),
            uid: user_id,
        });
        Ok(())
    }

    /// Token-only overload: resolve the app and user from the client token.
    pub fn add_device_right_for_token(
        &self,
        device_key: &DeviceKey,
        client_token: &str,
    ) -> Result<()> {
        if client_token.is_empty() || !client_token.chars().all(|c| c.is_ascii_digit()) {
            return Err(RightsError::InvalidArgument(
                "client token must be numeric".to_string(),
            ));
        }
        let caller = self.identity.resolve_token(client_token)?;
        self.add_device_right(device_key, &caller.app_id, client_token, caller.user_id)
    }

    /// Revoke the exact grant tuple. Console callers are a no-op success.
    pub fn remove_device_right(
        &self,
        device_key: &DeviceKey,
        app_id: &str,
        client_token: &str,
        user_id: i32,
    ) -> Result<()> {
        if user_id == USER_ID_CONSOLE {
            debug!("console caller, bypass");
            return Ok(());
        }
        let removed = self
            .store
            .delete_record(user_id, device_key.as_str(), app_id, client_token)?;
        debug!(
            "revoked {} grant(s): uid={} dev={} app={}",
            removed, user_id, device_key, app_id
        );
        self.audit(AuditEvent::GrantRemoved {
            device_key: device_key.to_string(),
            app_id: app_id.to_string(),
            uid: user_id,
        });
        Ok(())
    }

    /// Device detached: drop its session grants, then run the full sweep.
    pub fn remove_device_all_right(&self, device_key: &DeviceKey) -> Result<()> {
        debug!("device {} detached, process rights", device_key);
        let removed = match self.store.delete_temporary_records(device_key.as_str()) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("session grant sweep failed for {}: {}", device_key, e);
                0
            }
        };
        self.audit(AuditEvent::DeviceDetached {
            device_key: device_key.to_string(),
            removed,
        });
        self.tidy_up(self.identity.current_user_id(), SWEEP_ALL)
    }

    /// Explicit expiry cleanup over `device_keys`, then the current user's
    /// timed grants. Per-device failures are counted and skipped.
    pub fn clean_up_right_expired(&self, device_keys: &[DeviceKey]) -> CleanupResult {
        debug!("clean up expired rights: {} device(s)", device_keys.len());
        let mut result = CleanupResult::default();
        for key in device_keys {
            match self.store.delete_temporary_records(key.as_str()) {
                Ok(_) => result.swept_devices += 1,
                Err(e) => {
                    warn!("session grant sweep failed for {}: {}", key, e);
                    result.failed_devices += 1;
                }
            }
        }
        let uid = self.identity.current_user_id();
        match self.store.delete_normal_expired(uid, self.clock.now()) {
            Ok(removed) => result.expired_removed = removed,
            Err(e) => warn!("expired grant sweep failed for uid {}: {}", uid, e),
        }
        result
    }

    /// Run the selected cleanup reasons for `uid`.
    ///
    /// An empty mask is a no-op; unknown bits are rejected; the console
    /// uid is bypassed. Individual branch failures are logged and the
    /// remaining branches still run.
    pub fn tidy_up(&self, uid: i32, reasons: u32) -> Result<()> {
        if reasons == 0 {
            return Ok(());
        }
        if reasons & !SWEEP_ALL != 0 {
            return Err(RightsError::InvalidArgument(format!(
                "unknown sweep reasons: {:#x}",
                reasons
            )));
        }
        if uid == USER_ID_CONSOLE {
            debug!("console uid, sweep bypass");
            return Ok(());
        }
        if reasons & SWEEP_APP_UNINSTALLED != 0 {
            match self.clean_up_right_app_uninstalled(uid) {
                Ok((total, deleted)) => {
                    debug!("uninstalled-app sweep [{}/{}] uid={}", deleted, total, uid)
                }
                Err(e) => warn!("uninstalled-app sweep failed: {}", e),
            }
        }
        if reasons & SWEEP_USER_DELETED != 0 {
            match self.clean_up_right_user_deleted() {
                Ok((total, deleted)) => debug!("deleted-user sweep [{}/{}]", deleted, total),
                Err(e) => warn!("deleted-user sweep failed: {}", e),
            }
        }
        if reasons & SWEEP_EXPIRED != 0 {
            match self.store.delete_normal_expired(uid, self.clock.now()) {
                Ok(removed) => debug!("expired sweep removed {} row(s): uid={}", removed, uid),
                Err(e) => warn!("expired sweep failed: {}", e),
            }
        }
        if reasons & SWEEP_APP_REINSTALLED != 0 {
            match self.clean_up_right_app_reinstalled(uid) {
                Ok((total, deleted)) => {
                    debug!("reinstalled-app sweep [{}/{}] uid={}", deleted, total, uid)
                }
                Err(e) => warn!("reinstalled-app sweep failed: {}", e),
            }
        }
        self.audit(AuditEvent::SweepCompleted { uid, reasons });
        Ok(())
    }

    /// Delete every stored app of `uid` that is no longer installed.
    /// Returns `(apps_checked, apps_deleted)`.
    pub fn clean_up_right_app_uninstalled(&self, uid: i32) -> Result<(usize, usize)> {
        let apps = self.store.query_right_apps(uid)?;
        let total = apps.len();
        let mut deleted = 0;
        for app in &apps {
            if self.metadata.is_installed(uid, app) {
                continue;
            }
            match self.store.delete_app_records(uid, app) {
                Ok(_) => deleted += 1,
                Err(e) => warn!("failed to clean app {}: {}", app, e),
            }
        }
        Ok((total, deleted))
    }

    /// Targeted variant for a lifecycle app-removed event. A bundle with no
    /// stored rows is a no-op.
    pub fn clean_up_right_app_removed(&self, uid: i32, app_id: &str) -> Result<usize> {
        let apps = self.store.query_right_apps(uid)?;
        if !apps.iter().any(|app| app == app_id) {
            // app not in record, ignore
            return Ok(0);
        }
        let removed = self.store.delete_app_records(uid, app_id)?;
        debug!("cleaned removed app {} for uid {}: {} row(s)", app_id, uid, removed);
        Ok(removed)
    }

    /// Delete every stored uid whose OS account no longer exists.
    /// Returns `(uids_checked, uids_deleted)`.
    pub fn clean_up_right_user_deleted(&self) -> Result<(usize, usize)> {
        let uids = self.store.query_right_uids()?;
        let total = uids.len();
        let mut deleted = 0;
        for uid in uids {
            let exists = match self.accounts.account_exists(uid) {
                Ok(exists) => exists,
                Err(e) => {
                    warn!("account check failed for uid {}: {}", uid, e);
                    continue;
                }
            };
            if exists {
                continue;
            }
            match self.store.delete_uid_records(uid) {
                Ok(removed) => {
                    info!("removed {} grant(s) of deleted uid {}", removed, uid);
                    deleted += 1;
                }
                Err(e) => warn!("failed to clean deleted uid {}: {}", uid, e),
            }
        }
        Ok((total, deleted))
    }

    /// Delete grants that predate a reinstall of their app.
    ///
    /// A reinstalled app is a new principal: a stored `install_time` that
    /// no longer matches the app's current one invalidates every grant the
    /// old install held. Returns `(apps_checked, apps_deleted)`.
    pub fn clean_up_right_app_reinstalled(&self, uid: i32) -> Result<(usize, usize)> {
        let apps = self.store.query_right_apps(uid)?;
        let total = apps.len();
        let mut doomed = Vec::new();
        for app in &apps {
            let records = match self.store.query_app_records(uid, app) {
                Ok(records) => records,
                Err(e) => {
                    warn!("failed to load records of {}: {}", app, e);
                    continue;
                }
            };
            let (install_time, _) = match self.metadata.install_and_update_time(uid, app) {
                Ok(times) => times,
                Err(e) => {
                    warn!("install time unavailable for {}/{}: {}", app, uid, e);
                    continue;
                }
            };
            if records.iter().any(|r| r.install_time != install_time) {
                doomed.push(app.clone());
            }
        }
        let deleted = doomed.len();
        self.store.delete_apps_records(uid, &doomed)?;
        Ok((total, deleted))
    }
}
