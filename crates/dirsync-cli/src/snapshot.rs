use anyhow::{Context, Result};
use dirsync_core::{ExternalDepartment, ExternalProfile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One export of the external directory: every department and profile of a category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub departments: Vec<ExternalDepartment>,
    #[serde(default)]
    pub profiles: Vec<ExternalProfile>,
}

impl DirectorySnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        Ok(snapshot)
    }
}
