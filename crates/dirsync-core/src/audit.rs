use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStep {
    Departments,
    Users,
    DeptUserRelationship,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Departments => "DEPARTMENTS",
            SyncStep::Users => "USERS",
            SyncStep::DeptUserRelationship => "DEPT_USER_RELATIONSHIP",
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one processed entity or relationship.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub step: SyncStep,
    pub success: bool,
    /// Department natural key, or username for USERS and DEPT_USER_RELATIONSHIP.
    pub entity_key: String,
    /// Department key on the other side of a relationship record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunAuditLog {
    pub records: Vec<SyncRecord>,
}

impl RunAuditLog {
    pub fn push(&mut self, record: SyncRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, other: RunAuditLog) {
        self.records.extend(other.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records.iter().filter(|record| record.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records.iter().filter(|record| !record.success)
    }

    pub fn for_step(&self, step: SyncStep) -> impl Iterator<Item = &SyncRecord> {
        self.records.iter().filter(move |record| record.step == step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: SyncStep, success: bool) -> SyncRecord {
        SyncRecord {
            step,
            success,
            entity_key: "alice".to_string(),
            related_key: None,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn filters_split_by_outcome_and_step() {
        let mut log = RunAuditLog::default();
        log.push(record(SyncStep::Users, true));
        log.push(record(SyncStep::DeptUserRelationship, false));
        log.push(record(SyncStep::Users, false));

        assert_eq!(log.successes().count(), 1);
        assert_eq!(log.failures().count(), 2);
        assert_eq!(log.for_step(SyncStep::Users).count(), 2);
    }

    #[test]
    fn steps_serialize_as_upper_snake_case() {
        let json = serde_json::to_string(&record(SyncStep::DeptUserRelationship, true))
            .expect("serialize");
        assert!(json.contains("\"DEPT_USER_RELATIONSHIP\""));
        assert!(!json.contains("error"));
    }
}
