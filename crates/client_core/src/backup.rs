use chrono::{DateTime, Utc};
use shared::domain::BackupStatus;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupTracker {
    status: Option<BackupStatus>,
    changed_at: Option<DateTime<Utc>>,
    completed_cycles: u32,
}

impl BackupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a reported status. Repeats are no-ops; `finished -> ongoing` starts a
    /// new cycle and only `ongoing -> finished` completes one. Returns whether the
    /// status changed.
    pub fn apply(&mut self, next: BackupStatus) -> bool {
        if self.status == Some(next) {
            debug!(status = %next, "backup: repeated status ignored");
            return false;
        }
        if self.is_ongoing() && next == BackupStatus::Finished {
            self.completed_cycles += 1;
        }
        self.status = Some(next);
        self.changed_at = Some(Utc::now());
        true
    }

    /// `None` until the first backup event arrives.
    pub fn status(&self) -> Option<BackupStatus> {
        self.status
    }

    pub fn is_ongoing(&self) -> bool {
        self.status == Some(BackupStatus::Ongoing)
    }

    pub fn changed_at(&self) -> Option<DateTime<Utc>> {
        self.changed_at
    }

    pub fn completed_cycles(&self) -> u32 {
        self.completed_cycles
    }
}
