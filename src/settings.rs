//! File-backed settings.
//!
//! Settings are read from a TOML file. Every field has a default so a missing
//! or partial file is valid; environment variables are layered on top by
//! [`crate::config::Config::resolve`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub assignment: AssignmentSettings,
    pub audit: AuditSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub backend: String,
    pub pool_size: usize,
    pub libsql_path: Option<PathBuf>,
    pub libsql_url: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            pool_size: 10,
            libsql_path: None,
            libsql_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentSettings {
    pub capacity_limit: u32,
    pub case_number_prefix: String,
    pub hearing_window_days: u32,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            capacity_limit: 5,
            case_number_prefix: "CAS".to_string(),
            hearing_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub enabled: bool,
    pub path: String,
    pub hash_chain: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "logs/case_audit.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

/// Default location of the settings file (`~/.caseflow/settings.toml`).
pub fn default_settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".caseflow")
        .join("settings.toml")
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let settings = Settings::from_toml(
            r#"
            [assignment]
            capacity_limit = 3
            "#,
        )
        .expect("parse");

        assert_eq!(settings.assignment.capacity_limit, 3);
        assert_eq!(settings.assignment.case_number_prefix, "CAS");
        assert_eq!(settings.database.backend, "postgres");
        assert!(!settings.audit.enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(settings.assignment.capacity_limit, 5);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let err = Settings::from_toml("[assignment\ncapacity_limit = ").expect_err("must fail");
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
