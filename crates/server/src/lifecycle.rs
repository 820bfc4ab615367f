//! Platform lifecycle events that invalidate stored grants.
//!
//! The platform's package and account services announce app removal and
//! account deletion; the subscriber thread turns each announcement into the
//! matching targeted cleanup. The channel end stays decoupled so embedders
//! can feed events from whatever event bus they have.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::manager::RightsManager;

/// A lifecycle announcement from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An app was removed for one user.
    AppRemoved { user_id: i32, app_id: String },
    /// An OS account was deleted.
    UserRemoved { user_id: i32 },
}

/// Spawn the subscriber thread draining `events` into cleanups.
///
/// The thread exits when every sender is dropped.
pub fn subscribe(
    manager: Arc<RightsManager>,
    events: async_channel::Receiver<LifecycleEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("rights-lifecycle".to_string())
        .spawn(move || {
            while let Ok(event) = events.recv_blocking() {
                debug!("lifecycle event: {:?}", event);
                match event {
                    LifecycleEvent::AppRemoved { user_id, app_id } => {
                        match manager.clean_up_right_app_removed(user_id, &app_id) {
                            Ok(removed) => {
                                if removed > 0 {
                                    info!(
                                        "removed {} grant(s) of uninstalled app {}",
                                        removed, app_id
                                    );
                                }
                            }
                            Err(e) => warn!("app-removed cleanup failed for {}: {}", app_id, e),
                        }
                    }
                    LifecycleEvent::UserRemoved { user_id } => {
                        match manager.clean_up_right_user_deleted() {
                            Ok((_, deleted)) => {
                                debug!(
                                    "user {} removed, swept {} stale uid(s)",
                                    user_id, deleted
                                );
                            }
                            Err(e) => warn!("user-removed cleanup failed: {}", e),
                        }
                    }
                }
            }
            debug!("lifecycle channel closed, subscriber exiting");
        })
}
