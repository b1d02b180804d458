//! Audit trail for committed case and intake mutations.
//!
//! The workflow hands every committed change to an [`AuditSink`]. Sinks never
//! fail the caller: write problems are logged and the event is dropped.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::db::{AccountStatus, CaseStatus, CaseType, IntakeStatus, LawyerRatingChange, UserRole};

/// A committed change worth recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum CaseEvent {
    UserCreated {
        user_id: Uuid,
        role: UserRole,
    },
    AccountStatusChanged {
        user_id: Uuid,
        status: AccountStatus,
    },
    IntakeSubmitted {
        intake_id: Uuid,
        client_id: Uuid,
        assigned_staff_id: Option<Uuid>,
    },
    IntakeReviewed {
        intake_id: Uuid,
        actor_id: Uuid,
        from: IntakeStatus,
        to: IntakeStatus,
    },
    IntakeResubmitted {
        intake_id: Uuid,
        attempts: i32,
    },
    CaseCreated {
        case_id: Uuid,
        intake_id: Uuid,
        case_number: String,
        lawyer_id: Option<Uuid>,
        status: CaseStatus,
    },
    CaseClaimed {
        case_id: Uuid,
        lawyer_id: Uuid,
    },
    CaseStatusChanged {
        case_id: Uuid,
        actor_id: Uuid,
        from: CaseStatus,
        to: CaseStatus,
        load_delta: i32,
    },
    CaseDetailsUpdated {
        case_id: Uuid,
        actor_id: Uuid,
    },
    CaseRated {
        case_id: Uuid,
        client_id: Uuid,
        rating: i32,
        lawyer: Option<LawyerRatingChange>,
    },
    SpecializationsUpdated {
        lawyer_id: Uuid,
        specializations: BTreeSet<CaseType>,
    },
}

impl CaseEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserCreated { .. } => "user_created",
            Self::AccountStatusChanged { .. } => "account_status_changed",
            Self::IntakeSubmitted { .. } => "intake_submitted",
            Self::IntakeReviewed { .. } => "intake_reviewed",
            Self::IntakeResubmitted { .. } => "intake_resubmitted",
            Self::CaseCreated { .. } => "case_created",
            Self::CaseClaimed { .. } => "case_claimed",
            Self::CaseStatusChanged { .. } => "case_status_changed",
            Self::CaseDetailsUpdated { .. } => "case_details_updated",
            Self::CaseRated { .. } => "case_rated",
            Self::SpecializationsUpdated { .. } => "specializations_updated",
        }
    }
}

/// Receives events after the mutation that produced them has committed.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &CaseEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _event: &CaseEvent) {}
}

/// Keeps events in memory. Handy for tests and for embedding callers that
/// forward events elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<CaseEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<CaseEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: &CaseEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[derive(Debug, Serialize)]
struct AuditLine<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a CaseEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

/// Append-only JSON-lines file, optionally SHA-256 hash-chained so edits to
/// earlier lines are detectable.
pub struct JsonlAuditLog {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Mutex<Option<String>>,
}

impl JsonlAuditLog {
    /// Open the log at `path`. With hash chaining on, the chain continues
    /// from the last hashed line already in the file.
    pub fn new(path: PathBuf, hash_chain: bool) -> Self {
        let last_hash = if hash_chain {
            last_hash_in(&path)
        } else {
            None
        };
        Self {
            path,
            hash_chain,
            last_hash: Mutex::new(last_hash),
        }
    }

    fn write(&self, event: &CaseEvent) {
        let mut last_hash = match self.last_hash.lock() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Case audit state lock poisoned: {}", e);
                return;
            }
        };

        let mut line = AuditLine {
            ts: Utc::now().to_rfc3339(),
            event,
            prev_hash: last_hash.clone(),
            hash: None,
        };

        if self.hash_chain {
            let to_hash = match serde_json::to_string(&line) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to serialize audit event for hashing: {}", e);
                    return;
                }
            };
            let mut hasher = Sha256::new();
            hasher.update(to_hash.as_bytes());
            line.hash = Some(format!("{:x}", hasher.finalize()));
        }

        let serialized = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to serialize case audit event: {}", e);
                return;
            }
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("Failed to create case audit log dir {:?}: {}", parent, e);
            return;
        }

        // Owner read/write only; refuse to append to a file someone widened.
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).append(true);
        #[cfg(unix)]
        open_opts.mode(0o600);
        let mut file = match open_opts.open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Failed to open case audit log {:?}: {}", self.path, e);
                return;
            }
        };
        #[cfg(unix)]
        {
            let mode = match file.metadata() {
                Ok(meta) => meta.permissions().mode() & 0o777,
                Err(e) => {
                    tracing::warn!(
                        "Failed to read permissions for case audit log {:?}: {}",
                        self.path,
                        e
                    );
                    return;
                }
            };
            if mode != 0o600 {
                tracing::warn!(
                    "Refusing to write case audit event; insecure mode {:o} on {:?} (expected 600)",
                    mode,
                    self.path
                );
                return;
            }
        }
        if let Err(e) = writeln!(file, "{serialized}") {
            tracing::warn!("Failed to append case audit event: {}", e);
            return;
        }

        // Only advance the chain once the line is on disk.
        if self.hash_chain {
            *last_hash = line.hash;
        }
    }
}

/// `hash` of the last non-empty line in an existing log, if any.
fn last_hash_in(path: &Path) -> Option<String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read case audit log {:?}: {}", path, e);
            return None;
        }
    };
    let last = contents.lines().rev().find(|line| !line.trim().is_empty())?;
    match serde_json::from_str::<serde_json::Value>(last) {
        Ok(value) => value.get("hash").and_then(|h| h.as_str()).map(str::to_string),
        Err(e) => {
            tracing::warn!("Last case audit line in {:?} is not JSON: {}", path, e);
            None
        }
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, event: &CaseEvent) {
        self.write(event);
    }
}

/// Build the sink described by `config`.
pub fn sink_from_config(config: &AuditConfig) -> std::sync::Arc<dyn AuditSink> {
    if config.enabled {
        std::sync::Arc::new(JsonlAuditLog::new(config.path.clone(), config.hash_chain))
    } else {
        std::sync::Arc::new(NoopAudit)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::Value;

    use super::*;

    fn claimed() -> CaseEvent {
        CaseEvent::CaseClaimed {
            case_id: Uuid::new_v4(),
            lawyer_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn hash_chain_links_consecutive_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("audit.jsonl");
        let log = JsonlAuditLog::new(path.clone(), true);

        log.record(&claimed());
        log.record(&CaseEvent::CaseStatusChanged {
            case_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            from: CaseStatus::Open,
            to: CaseStatus::Closed,
            load_delta: -1,
        });

        let contents = fs::read_to_string(&path).expect("read audit log");
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "case_claimed");
        assert!(lines[0].get("prev_hash").is_none());
        assert_eq!(lines[1]["event_type"], "case_status_changed");
        assert_eq!(lines[1]["to"], "closed");
        assert_eq!(lines[1]["prev_hash"], lines[0]["hash"]);
    }

    #[test]
    fn reopened_log_continues_the_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("audit.jsonl");
        JsonlAuditLog::new(path.clone(), true).record(&claimed());

        // A fresh handle stands in for a process restart.
        JsonlAuditLog::new(path.clone(), true).record(&claimed());

        let contents = fs::read_to_string(&path).expect("read audit log");
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0]["hash"].is_string());
        assert_eq!(lines[1]["prev_hash"], lines[0]["hash"]);
    }

    #[test]
    fn without_hash_chain_lines_carry_no_hashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let log = JsonlAuditLog::new(path.clone(), false);
        log.record(&claimed());

        let contents = fs::read_to_string(&path).expect("read audit log");
        let line: Value = serde_json::from_str(contents.trim()).expect("json");
        assert!(line.get("hash").is_none());
        assert!(line.get("ts").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn refuses_world_readable_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        fs::write(&path, "").expect("create");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");

        JsonlAuditLog::new(path.clone(), true).record(&claimed());
        assert_eq!(fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn memory_audit_keeps_order() {
        let audit = MemoryAudit::new();
        let first = claimed();
        let second = claimed();
        audit.record(&first);
        audit.record(&second);
        assert_eq!(audit.snapshot(), vec![first, second]);
        assert_eq!(audit.snapshot()[0].name(), "case_claimed");
    }
}
