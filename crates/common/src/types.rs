//! Domain types for the USB access-rights engine.
//!
//! A grant is one persisted [`RightRecord`], uniquely keyed by
//! `(uid, device_key, app_id, client_token)`. Tuple uniqueness is enforced
//! by the store's upsert, not by a storage constraint.

use serde::{Deserialize, Serialize};

/// `valid_period` sentinel: temporary grant, dies when the device detaches.
pub const VALID_PERIOD_TEMPORARY: i64 = 0;

/// `valid_period` sentinel: permanent grant.
pub const VALID_PERIOD_ALWAYS: i64 = i64::MAX;

/// Default validity window for a freshly recorded grant, in seconds.
pub const DEFAULT_VALID_PERIOD_SECS: i64 = 300;

/// The console / local-session user. Bypasses permission checks.
pub const USER_ID_CONSOLE: i32 = 0;

/// Fallback user when the caller's account cannot be resolved.
pub const USER_ID_DEFAULT: i32 = 100;

/// Marker for an unresolved user.
pub const USER_ID_INVALID: i32 = -1;

/// Opaque identity of a USB resource as seen by the rights engine.
///
/// Host bus devices use `vendorId-productId`; accessories and serial ports
/// append the serial number so two physical units never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    /// Key for a host bus device.
    pub fn bus_device(vendor_id: u16, product_id: u16) -> Self {
        Self(format!("{}-{}", vendor_id, product_id))
    }

    /// Key for an accessory or serial port, which carries a serial number.
    pub fn with_serial(vendor_id: u16, product_id: u16, serial: &str) -> Self {
        Self(format!("{}-{}-{}", vendor_id, product_id, serial))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for DeviceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted grant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RightRecord {
    /// Storage-assigned primary key.
    pub id: i64,
    /// OS user the grant belongs to.
    pub uid: i32,
    /// App install time observed when the grant was recorded (epoch sec).
    pub install_time: i64,
    /// App update time observed when the grant was recorded (epoch sec).
    pub update_time: i64,
    /// When the grant was recorded (epoch sec).
    pub request_time: i64,
    /// Validity window in seconds, or one of the sentinels.
    pub valid_period: i64,
    pub device_key: String,
    pub app_id: String,
    pub client_token: String,
}

/// The non-key fields of a grant, as written on add or refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RightInfo {
    pub uid: i32,
    pub install_time: i64,
    pub update_time: i64,
    pub request_time: i64,
    pub valid_period: i64,
}

/// Outcome of a `request_right` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantResult {
    /// Access allowed.
    Granted,
    /// Access denied with reason.
    Denied(DenialReason),
}

impl GrantResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, GrantResult::Granted)
    }
}

/// Reason a `request_right` call was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The user dismissed or refused the consent dialog.
    UserRefused,
    /// The consent collaborator could not be launched.
    ConsentUnavailable,
    /// The consent dialog did not complete within the bounded wait.
    ConsentTimedOut,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserRefused => write!(f, "user refused consent"),
            Self::ConsentUnavailable => write!(f, "consent dialog unavailable"),
            Self::ConsentTimedOut => write!(f, "consent dialog timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_device_key_format() {
        assert_eq!(DeviceKey::bus_device(1234, 5678).as_str(), "1234-5678");
    }

    #[test]
    fn test_serial_key_format() {
        let key = DeviceKey::with_serial(1234, 5678, "SN01");
        assert_eq!(key.as_str(), "1234-5678-SN01");
    }

    #[test]
    fn test_sentinels_are_distinct() {
        assert_ne!(VALID_PERIOD_TEMPORARY, VALID_PERIOD_ALWAYS);
        assert!(DEFAULT_VALID_PERIOD_SECS > VALID_PERIOD_TEMPORARY);
        assert!(DEFAULT_VALID_PERIOD_SECS < VALID_PERIOD_ALWAYS);
    }
}
