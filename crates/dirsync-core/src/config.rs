use crate::model::Category;
use crate::validation::{PatternUsernameRule, ValidationError, DEFAULT_USERNAME_PATTERN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GROUP_CLASS: &str = "groupOfUniqueNames";
pub const DEFAULT_ORGANIZATION_CLASS: &str = "organizationalUnit";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config field {field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("invalid username rule: {0}")]
    UsernameRule(#[from] ValidationError),
}

/// Per-category sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub category_id: i64,
    pub domain: String,
    /// Directory class stamped into extras for group-type departments.
    pub group_class: String,
    pub organization_class: String,
    pub username_pattern: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            category_id: 1,
            domain: "default.local".to_string(),
            group_class: DEFAULT_GROUP_CLASS.to_string(),
            organization_class: DEFAULT_ORGANIZATION_CLASS.to_string(),
            username_pattern: DEFAULT_USERNAME_PATTERN.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn category(&self) -> Category {
        Category {
            id: self.category_id,
            domain: self.domain.clone(),
        }
    }

    pub fn department_type(&self, is_group: bool) -> &str {
        if is_group {
            &self.group_class
        } else {
            &self.organization_class
        }
    }

    pub fn username_rule(&self) -> Result<PatternUsernameRule, ConfigError> {
        Ok(PatternUsernameRule::new(&self.username_pattern)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("group_class", &self.group_class),
            ("organization_class", &self.organization_class),
            ("username_pattern", &self.username_pattern),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField { field });
            }
        }
        self.username_rule().map(|_| ())
    }
}
