use chrono::{DateTime, Utc};
use dirsync_core::RunAuditLog;
use dirsync_engine::RunSummary;
use dirsync_storage::CommitReport;
use serde::Serialize;
use uuid::Uuid;

/// JSON document printed after every `sync` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub category_id: i64,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Last flush for this category before the run, if any.
    pub previous_sync_at: Option<DateTime<Utc>>,
    pub summary: RunSummary,
    pub departments: RunAuditLog,
    pub profiles: RunAuditLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitReport>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failures > 0
    }
}
