use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type Extras = BTreeMap<String, Value>;

/// One directory sync source. Matching never crosses categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    #[serde(default)]
    pub domain: String,
}

/// Department record as adapted from the directory tree.
///
/// `parent_dn` references the `dn` of another record in the same batch. The natural
/// key is never carried on the record itself; it is derived from the parent chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalDepartment {
    pub dn: String,
    pub name: String,
    #[serde(default, alias = "parent")]
    pub parent_dn: Option<String>,
    #[serde(default, rename = "isGroup", alias = "is_group")]
    pub is_group: bool,
    #[serde(default)]
    pub code: Option<String>,
}

impl ExternalDepartment {
    /// The directory-issued code, if it carries anything usable.
    pub fn assigned_code(&self) -> Option<&str> {
        self.code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalProfile {
    pub username: String,
    #[serde(default, rename = "displayName", alias = "display_name")]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub telephone: String,
    #[serde(default)]
    pub code: String,
    /// Each entry is a full root-to-leaf chain of department names.
    #[serde(default)]
    pub departments: Vec<Vec<String>>,
    #[serde(default)]
    pub extras: Extras,
}

/// Nested-set placement. Recomputed by the storage layer, reset to zero when staged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreePlacement {
    pub tree_id: i64,
    pub lft: i64,
    pub rght: i64,
    pub level: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub code: String,
    pub parent_id: Option<i64>,
    pub enabled: bool,
    #[serde(default)]
    pub placement: TreePlacement,
    #[serde(default)]
    pub extras: Extras,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Normal,
    Locked,
    Deleted,
    Disabled,
    Expired,
}

impl Default for ProfileStatus {
    fn default() -> Self {
        Self::Normal
    }
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Normal => "normal",
            ProfileStatus::Locked => "locked",
            ProfileStatus::Deleted => "deleted",
            ProfileStatus::Disabled => "disabled",
            ProfileStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ProfileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "normal" => Ok(ProfileStatus::Normal),
            "locked" => Ok(ProfileStatus::Locked),
            "deleted" => Ok(ProfileStatus::Deleted),
            "disabled" => Ok(ProfileStatus::Disabled),
            "expired" => Ok(ProfileStatus::Expired),
            other => Err(format!("Unknown profile status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub category_id: i64,
    pub domain: String,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub telephone: String,
    pub code: String,
    pub status: ProfileStatus,
    pub enabled: bool,
    #[serde(default)]
    pub extras: Extras,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DepartmentMembership {
    pub profile_id: i64,
    pub department_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeadershipEdge {
    pub from_profile_id: i64,
    pub to_profile_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Department,
    Profile,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Department => "department",
            EntityKind::Profile => "profile",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Insert,
    Update,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Insert => "insert",
            SyncOperation::Update => "update",
        }
    }
}

/// Highest persisted id per entity kind; the run allocator starts above these.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdWatermarks {
    pub department: i64,
    pub profile: i64,
}

impl IdWatermarks {
    pub fn for_kind(&self, kind: EntityKind) -> i64 {
        match kind {
            EntityKind::Department => self.department,
            EntityKind::Profile => self.profile,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagedRow<T> {
    pub operation: SyncOperation,
    pub entity: T,
}

/// Everything one run staged, in staging order. Handed to the flush sink once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StagedWrites {
    pub category_id: i64,
    pub departments: Vec<StagedRow<Department>>,
    pub profiles: Vec<StagedRow<Profile>>,
    pub memberships: Vec<DepartmentMembership>,
    pub leadership_edges: Vec<LeadershipEdge>,
    /// Profiles whose memberships and outgoing leadership edges are rewritten on flush.
    pub relation_scope: Vec<i64>,
}

impl StagedWrites {
    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
            && self.profiles.is_empty()
            && self.memberships.is_empty()
            && self.leadership_edges.is_empty()
    }

    pub fn count(&self, kind: EntityKind, operation: SyncOperation) -> usize {
        match kind {
            EntityKind::Department => self
                .departments
                .iter()
                .filter(|row| row.operation == operation)
                .count(),
            EntityKind::Profile => self
                .profiles
                .iter()
                .filter(|row| row.operation == operation)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_status_parses_loose_input() {
        assert_eq!(
            " Normal ".parse::<ProfileStatus>().expect("parse"),
            ProfileStatus::Normal
        );
        assert!("active".parse::<ProfileStatus>().is_err());
        assert_eq!(ProfileStatus::default().to_string(), "normal");
    }

    #[test]
    fn assigned_code_ignores_blank_values() {
        let mut dept = ExternalDepartment {
            dn: "ou=Org".to_string(),
            name: "Org".to_string(),
            parent_dn: None,
            is_group: false,
            code: Some("   ".to_string()),
        };
        assert_eq!(dept.assigned_code(), None);

        dept.code = Some(" D-01 ".to_string());
        assert_eq!(dept.assigned_code(), Some("D-01"));
    }

    #[test]
    fn external_records_accept_directory_field_names() {
        let dept: ExternalDepartment = serde_json::from_str(
            r#"{"dn":"ou=Team,ou=Org","name":"Team","parent":"ou=Org","isGroup":true}"#,
        )
        .expect("department json");
        assert_eq!(dept.parent_dn.as_deref(), Some("ou=Org"));
        assert!(dept.is_group);
        assert_eq!(dept.code, None);

        let profile: ExternalProfile = serde_json::from_str(
            r#"{"username":"alice","displayName":"Alice","departments":[["Org","Team"]]}"#,
        )
        .expect("profile json");
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(profile.departments, vec![vec!["Org", "Team"]]);
        assert!(profile.extras.is_empty());
    }
}
