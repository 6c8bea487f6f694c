use dirsync_core::{RunAuditLog, SyncRecord, SyncStep};

pub const DEPARTMENT_NOT_FOUND: &str = "department not found";

/// Collects one outcome per processed entity or relationship, in processing order.
#[derive(Debug, Default)]
pub struct AuditRecorder {
    log: RunAuditLog,
}

impl AuditRecorder {
    pub fn department_synced(&mut self, path: &str) {
        self.record(SyncStep::Departments, path, None, None);
    }

    pub fn department_failed(&mut self, dn: &str, error: impl ToString) {
        self.record(SyncStep::Departments, dn, None, Some(error.to_string()));
    }

    pub fn user_synced(&mut self, username: &str) {
        self.record(SyncStep::Users, username, None, None);
    }

    pub fn user_failed(&mut self, username: &str, error: impl ToString) {
        self.record(SyncStep::Users, username, None, Some(error.to_string()));
    }

    pub fn membership_synced(&mut self, username: &str, department: &str) {
        self.record(
            SyncStep::DeptUserRelationship,
            username,
            Some(department),
            None,
        );
    }

    pub fn membership_failed(&mut self, username: &str, department: &str, error: impl ToString) {
        self.record(
            SyncStep::DeptUserRelationship,
            username,
            Some(department),
            Some(error.to_string()),
        );
    }

    pub fn finish(self) -> RunAuditLog {
        self.log
    }

    fn record(
        &mut self,
        step: SyncStep,
        entity_key: &str,
        related_key: Option<&str>,
        error: Option<String>,
    ) {
        self.log.push(SyncRecord {
            step,
            success: error.is_none(),
            entity_key: entity_key.to_string(),
            related_key: related_key.map(str::to_string),
            error,
        });
    }
}
