//! USB access-rights service
//!
//! The single decision point for which application may access a USB
//! resource, and for how long. Resource-specific managers (host device,
//! accessory, serial port) call [`manager::RightsManager`]; grants persist
//! in the `store` crate; the platform collaborators (app metadata, identity,
//! OS accounts, consent UI) plug in through the traits in [`providers`] and
//! [`consent`].

pub mod audit;
pub mod config;
pub mod consent;
pub mod lifecycle;
pub mod manager;
pub mod providers;

pub use consent::{ConsentLauncher, ConsentRequest, ConsentSignal};
pub use lifecycle::LifecycleEvent;
pub use manager::{
    CleanupResult, RightsManager, SWEEP_ALL, SWEEP_APP_REINSTALLED, SWEEP_APP_UNINSTALLED,
    SWEEP_EXPIRED, SWEEP_USER_DELETED,
};
pub use providers::{Accounts, AppMetadata, Clock, Identity, SystemClock, TokenIdentity};
