//! Audit logging for grant decisions
//!
//! Writes one JSON object per line so the trail can be shipped to whatever
//! collector the deployment uses. Audit failures are logged and swallowed;
//! they never affect an access decision.

use crate::config::AuditConfig;
use common::Result;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Types of audit events
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum AuditEvent {
    /// A caller asked for access and got a decision
    GrantRequested {
        device_key: String,
        app_id: String,
        uid: i32,
        granted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        denial: Option<String>,
    },
    /// A grant was recorded or refreshed
    GrantAdded {
        device_key: String,
        app_id: String,
        uid: i32,
    },
    /// A grant was explicitly revoked
    GrantRemoved {
        device_key: String,
        app_id: String,
        uid: i32,
    },
    /// Device detach removed its session grants
    DeviceDetached {
        device_key: String,
        removed: usize,
    },
    /// A cleanup sweep finished
    SweepCompleted {
        uid: i32,
        reasons: u32,
    },
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    timestamp: u64,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Append-only JSON-lines audit log.
pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    /// Open (or create) the audit log file from configuration.
    pub fn open(config: &AuditConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Record one event. Failures are logged, never propagated.
    pub fn log(&self, event: &AuditEvent) {
        let entry = AuditEntry {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            event,
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to serialize audit event: {}", e);
                return;
            }
        };
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("failed to write audit event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;

    #[test]
    fn test_events_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            enabled: true,
            path: dir.path().join("audit.log"),
        };
        let log = AuditLog::open(&config).unwrap();
        log.log(&AuditEvent::GrantAdded {
            device_key: "1234-5678".into(),
            app_id: "com.example.app".into(),
            uid: 100,
        });
        log.log(&AuditEvent::DeviceDetached {
            device_key: "1234-5678".into(),
            removed: 2,
        });

        let raw = std::fs::read_to_string(&config.path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "grant_added");
        assert_eq!(first["uid"], 100);
        assert!(first["timestamp"].as_u64().is_some());
    }
}
