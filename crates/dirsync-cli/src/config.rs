use anyhow::{Context, Result};
use dirsync_core::SyncConfig;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Loads the sync settings from a TOML file. No path, or a path that does not exist,
/// yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(SyncConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: SyncConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub category_id: Option<i64>,
    pub domain: Option<String>,
}

impl ConfigOverrides {
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(category_id) = self.category_id {
            config.category_id = category_id;
        }
        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(Some(&dir.path().join("absent.toml"))).expect("config");
        assert_eq!(config, SyncConfig::default());
        assert_eq!(load_config(None).expect("config"), SyncConfig::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "category_id = 4\ndomain = \"corp.example\"").expect("write");

        let config = load_config(Some(file.path())).expect("config");
        assert_eq!(config.category_id, 4);
        assert_eq!(config.domain, "corp.example");
        assert_eq!(
            config.organization_class,
            SyncConfig::default().organization_class
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "category_id = \"four\"").expect("write");
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let base = SyncConfig {
            category_id: 4,
            domain: "corp.example".to_string(),
            ..SyncConfig::default()
        };
        let overrides = ConfigOverrides {
            category_id: Some(9),
            domain: None,
        };

        let config = overrides.apply(base);
        assert_eq!(config.category_id, 9);
        assert_eq!(config.domain, "corp.example");
    }
}
