//! Common utilities for usb-rights
//!
//! This crate provides the pieces shared between the rights store and the
//! rights manager: the error taxonomy, the persisted record and grant types,
//! device-key construction, and logging setup.

pub mod error;
pub mod logging;
pub mod types;

pub use error::{Result, RightsError};
pub use logging::setup_logging;
pub use types::{
    DEFAULT_VALID_PERIOD_SECS, DenialReason, DeviceKey, GrantResult, RightInfo, RightRecord,
    USER_ID_CONSOLE, USER_ID_DEFAULT, USER_ID_INVALID, VALID_PERIOD_ALWAYS, VALID_PERIOD_TEMPORARY,
};
