//! Collaborator traits the rights manager depends on.
//!
//! The real platform services (bundle manager, access-token service, OS
//! account manager) live behind IPC on the device; the manager only ever
//! sees these traits. The host-plausible implementations here back the
//! standalone maintenance binary; tests supply their own mocks.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{Result, RightsError, USER_ID_DEFAULT};
use tracing::warn;

/// Epoch-seconds time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Install/update timestamps and install state for an app.
pub trait AppMetadata: Send + Sync {
    /// `(install_time, update_time)` in epoch seconds.
    fn install_and_update_time(&self, uid: i32, app_id: &str) -> Result<(i64, i64)>;

    fn is_installed(&self, uid: i32, app_id: &str) -> bool;
}

/// Resolved identity behind a client token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub app_id: String,
    pub user_id: i32,
}

/// Caller identity and capability checks.
pub trait Identity: Send + Sync {
    fn resolve_token(&self, client_token: &str) -> Result<TokenIdentity>;

    /// Privileged/system callers bypass the consent flow entirely.
    fn is_privileged_caller(&self) -> bool;

    /// OS account of the current caller, [`USER_ID_DEFAULT`] when unknown.
    fn current_user_id(&self) -> i32;
}

/// OS account existence checks, used by the user-deleted sweep.
pub trait Accounts: Send + Sync {
    fn account_exists(&self, user_id: i32) -> Result<bool>;
}

/// Accounts backed by the passwd file. Good enough for the standalone
/// maintenance binary on a Linux host.
#[derive(Debug)]
pub struct PasswdAccounts {
    path: PathBuf,
}

impl PasswdAccounts {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/etc/passwd"),
        }
    }

    #[cfg(test)]
    fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for PasswdAccounts {
    fn default() -> Self {
        Self::new()
    }
}

impl Accounts for PasswdAccounts {
    fn account_exists(&self, user_id: i32) -> Result<bool> {
        let raw = fs::read_to_string(&self.path)?;
        for line in raw.lines() {
            if let Some(uid_field) = line.split(':').nth(2) {
                if uid_field.parse::<i32>() == Ok(user_id) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Metadata provider for hosts without a bundle manager. Every timestamp
/// lookup reports unavailable, so grants fall back to best-effort times,
/// and every app counts as installed, so the uninstall sweep never fires
/// spuriously.
#[derive(Debug, Default)]
pub struct NoAppMetadata;

impl AppMetadata for NoAppMetadata {
    fn install_and_update_time(&self, uid: i32, app_id: &str) -> Result<(i64, i64)> {
        Err(RightsError::MetadataUnavailable(format!(
            "no bundle manager for {}/{}",
            app_id, uid
        )))
    }

    fn is_installed(&self, _uid: i32, _app_id: &str) -> bool {
        true
    }
}

/// Identity source for hosts without an access-token service: nothing is
/// privileged and tokens cannot be resolved.
#[derive(Debug, Default)]
pub struct LocalIdentity;

impl Identity for LocalIdentity {
    fn resolve_token(&self, client_token: &str) -> Result<TokenIdentity> {
        warn!("no identity service to resolve token {}", client_token);
        Err(RightsError::InvalidArgument(
            "no identity service available".to_string(),
        ))
    }

    fn is_privileged_caller(&self) -> bool {
        false
    }

    fn current_user_id(&self) -> i32 {
        USER_ID_DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }

    #[test]
    fn test_passwd_accounts_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "root:x:0:0:root:/root:/bin/bash").unwrap();
        writeln!(file, "alice:x:1000:1000::/home/alice:/bin/sh").unwrap();
        file.flush().unwrap();

        let accounts = PasswdAccounts::with_path(file.path().to_path_buf());
        assert!(accounts.account_exists(0).unwrap());
        assert!(accounts.account_exists(1000).unwrap());
        assert!(!accounts.account_exists(4242).unwrap());
    }
}
