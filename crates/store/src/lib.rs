//! Persistent storage for USB access-rights records.
//!
//! Two layers, mirroring the split between a dumb transactional adapter and
//! the domain logic above it:
//!
//! - [`database`] wraps a single SQLite table with begin/commit/rollback,
//!   typed row decoding, and predicate-based CRUD.
//! - [`store`] maps domain queries (by user, device, app, or exact grant
//!   tuple) onto the adapter, owns the expiration predicate, and serializes
//!   every multi-step operation behind one mutex.

pub mod database;
pub mod store;

pub use database::RightDatabase;
pub use store::{RightsStore, record_expired};
