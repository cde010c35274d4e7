//! Ephemeral progress for long-running operations.
//!
//! Entries are keyed by `(operation_id, operation_type)` and expire a fixed
//! time after their last update. Expiry is checked lazily on query; this
//! is a cache for pollers, not an audit trail.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Backup,
    Restore,
    Rollback,
    Cleanup,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Backup => "backup",
            OperationType::Restore => "restore",
            OperationType::Rollback => "rollback",
            OperationType::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub current_step: u64,
    pub total_steps: u64,
    /// `current / total * 100`, one decimal place.
    pub percentage: f64,
    pub message: String,
    pub status: ProgressStatus,
    pub started_at: String,
    pub updated_at: String,
}

impl ProgressState {
    fn recompute(&mut self) {
        self.percentage = if self.total_steps == 0 {
            if self.status == ProgressStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            let raw = self.current_step as f64 / self.total_steps as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        };
        self.updated_at = clock::rfc3339(clock::now());
    }
}

type Key = (String, OperationType);

struct Entry {
    state: ProgressState,
    touched: Instant,
}

/// Shared progress table. Clones share the same entries.
#[derive(Clone)]
pub struct ProgressTracker {
    entries: Arc<Mutex<HashMap<Key, Entry>>>,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(ttl: Duration) -> Self {
        ProgressTracker {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin tracking; an existing entry under the same key is replaced.
    pub fn start(
        &self,
        operation_id: &str,
        operation_type: OperationType,
        total_steps: u64,
    ) -> ProgressHandle {
        let now = clock::rfc3339(clock::now());
        let mut state = ProgressState {
            operation_id: operation_id.to_string(),
            operation_type,
            current_step: 0,
            total_steps,
            percentage: 0.0,
            message: "started".to_string(),
            status: ProgressStatus::Running,
            started_at: now.clone(),
            updated_at: now,
        };
        state.recompute();
        let key = (operation_id.to_string(), operation_type);
        self.lock().insert(
            key.clone(),
            Entry {
                state,
                touched: Instant::now(),
            },
        );
        ProgressHandle {
            tracker: self.clone(),
            key,
        }
    }

    /// Current state, or `None` if unknown or expired.
    pub fn query(&self, operation_id: &str, operation_type: OperationType) -> Option<ProgressState> {
        let key = (operation_id.to_string(), operation_type);
        let mut entries = self.lock();
        let expired = entries.get(&key)?.touched.elapsed() >= self.ttl;
        if expired {
            entries.remove(&key);
            return None;
        }
        entries.get(&key).map(|e| e.state.clone())
    }

    fn update(&self, key: &Key, f: impl FnOnce(&mut ProgressState)) {
        if let Some(entry) = self.lock().get_mut(key) {
            f(&mut entry.state);
            entry.state.recompute();
            entry.touched = Instant::now();
        }
    }
}

/// Writer side of one tracked operation.
pub struct ProgressHandle {
    tracker: ProgressTracker,
    key: Key,
}

impl ProgressHandle {
    /// One more step done. Never moves past `total_steps`.
    pub fn advance(&self, message: impl Into<String>) {
        let message = message.into();
        self.tracker.update(&self.key, |state| {
            if state.current_step < state.total_steps {
                state.current_step += 1;
            }
            state.message = message;
        });
    }

    /// Move to a terminal status. Success completes every step.
    pub fn finish(&self, success: bool, message: impl Into<String>) {
        let message = message.into();
        self.tracker.update(&self.key, |state| {
            if success {
                state.current_step = state.total_steps;
                state.status = ProgressStatus::Completed;
            } else {
                state.status = ProgressStatus::Failed;
            }
            state.message = message;
        });
    }
}
