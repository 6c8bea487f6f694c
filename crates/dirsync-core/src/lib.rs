pub mod audit;
pub mod config;
pub mod model;
pub mod source;
pub mod validation;

pub use audit::{RunAuditLog, SyncRecord, SyncStep};
pub use config::{ConfigError, SyncConfig};
pub use model::{
    Category, Department, DepartmentMembership, EntityKind, ExternalDepartment, ExternalProfile,
    Extras, IdWatermarks, LeadershipEdge, Profile, ProfileStatus, StagedRow, StagedWrites,
    SyncOperation, TreePlacement,
};
pub use source::{SourceError, StateSource};
pub use validation::{PatternUsernameRule, UsernameRule, ValidationError};

pub const PATH_SEPARATOR: &str = "/";

/// Joins root-to-leaf department names into the natural key used for matching.
pub fn join_path<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_matches_profile_department_chains() {
        assert_eq!(join_path(["Org", "Team"]), "Org/Team");
        assert_eq!(join_path(vec!["Org".to_string()]), "Org");
        assert_eq!(join_path(Vec::<String>::new()), "");
    }
}
