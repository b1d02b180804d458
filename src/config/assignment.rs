use std::path::{Component, PathBuf};

use crate::config::helpers::{parse_bool_env, parse_string_env, parse_u32_env};
use crate::error::ConfigError;
use crate::settings::Settings;

const MAX_CASE_NUMBER_PREFIX_LEN: usize = 8;
const MAX_HEARING_WINDOW_DAYS: u32 = 365;

/// Lawyer assignment and case numbering controls.
#[derive(Debug, Clone)]
pub struct AssignmentConfig {
    /// Maximum concurrently active cases a lawyer may hold for auto-assignment.
    pub capacity_limit: u32,
    pub case_number_prefix: String,
    pub hearing_window_days: u32,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            capacity_limit: 5,
            case_number_prefix: "CAS".to_string(),
            hearing_window_days: 7,
        }
    }
}

/// Case audit trail controls.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub hash_chain: bool,
}

fn validate_capacity_limit(value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_CAPACITY_LIMIT".to_string(),
            message: "capacity limit must be at least 1".to_string(),
        });
    }
    Ok(value)
}

fn validate_case_number_prefix(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_CASE_NUMBER_PREFIX".to_string(),
            message: "case number prefix must not be empty".to_string(),
        });
    }
    if trimmed.len() > MAX_CASE_NUMBER_PREFIX_LEN
        || !trimmed
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
    {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_CASE_NUMBER_PREFIX".to_string(),
            message: format!(
                "case number prefix must be 1-{MAX_CASE_NUMBER_PREFIX_LEN} uppercase letters or digits"
            ),
        });
    }
    Ok(trimmed.to_string())
}

fn validate_hearing_window(value: u32) -> Result<u32, ConfigError> {
    if value == 0 || value > MAX_HEARING_WINDOW_DAYS {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_HEARING_WINDOW_DAYS".to_string(),
            message: format!("hearing window must be between 1 and {MAX_HEARING_WINDOW_DAYS} days"),
        });
    }
    Ok(value)
}

fn validate_audit_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_AUDIT_PATH".to_string(),
            message: "audit log path must not be empty".to_string(),
        });
    }

    let raw_path = PathBuf::from(trimmed);
    if raw_path.is_absolute() {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_AUDIT_PATH".to_string(),
            message: "audit log path must be relative to the working directory".to_string(),
        });
    }

    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: "CASEFLOW_AUDIT_PATH".to_string(),
                    message: "audit log path must not contain '..' components".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "CASEFLOW_AUDIT_PATH".to_string(),
                    message: "audit log path must be relative to the working directory"
                        .to_string(),
                });
            }
        }
    }

    if normalized.components().count() < 2 || !normalized.starts_with("logs") {
        return Err(ConfigError::InvalidValue {
            key: "CASEFLOW_AUDIT_PATH".to_string(),
            message: "audit log path must be under 'logs/' and include a filename".to_string(),
        });
    }

    Ok(normalized)
}

impl AssignmentConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            capacity_limit: validate_capacity_limit(parse_u32_env(
                "CASEFLOW_CAPACITY_LIMIT",
                settings.assignment.capacity_limit,
            )?)?,
            case_number_prefix: {
                let raw = parse_string_env(
                    "CASEFLOW_CASE_NUMBER_PREFIX",
                    settings.assignment.case_number_prefix.clone(),
                )?;
                validate_case_number_prefix(&raw)?
            },
            hearing_window_days: validate_hearing_window(parse_u32_env(
                "CASEFLOW_HEARING_WINDOW_DAYS",
                settings.assignment.hearing_window_days,
            )?)?,
        })
    }
}

impl AuditConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            enabled: parse_bool_env("CASEFLOW_AUDIT_ENABLED", settings.audit.enabled)?,
            path: {
                let raw = parse_string_env("CASEFLOW_AUDIT_PATH", settings.audit.path.clone())?;
                validate_audit_path(&raw)?
            },
            hash_chain: parse_bool_env("CASEFLOW_AUDIT_HASH_CHAIN", settings.audit.hash_chain)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::error::ConfigError;
    use crate::settings::Settings;

    #[test]
    fn assignment_resolve_uses_reference_policy_defaults() {
        let settings = Settings::default();
        let config = super::AssignmentConfig::resolve(&settings).expect("assignment config");

        assert_eq!(config.capacity_limit, 5);
        assert_eq!(config.case_number_prefix, "CAS");
        assert_eq!(config.hearing_window_days, 7);
    }

    #[test]
    fn audit_resolve_defaults_to_disabled_hash_chained_log() {
        let settings = Settings::default();
        let config = super::AuditConfig::resolve(&settings).expect("audit config");

        assert!(!config.enabled);
        assert!(config.hash_chain);
        assert_eq!(config.path, PathBuf::from("logs/case_audit.jsonl"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = super::validate_capacity_limit(0).expect_err("zero capacity");
        let ConfigError::InvalidValue { key, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "CASEFLOW_CAPACITY_LIMIT");
    }

    #[test]
    fn case_number_prefix_is_trimmed_and_checked() {
        assert_eq!(
            super::validate_case_number_prefix(" CIV ").expect("valid"),
            "CIV"
        );
        let err = super::validate_case_number_prefix("cas-x").expect_err("lowercase");
        let ConfigError::InvalidValue { message, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert!(message.contains("uppercase"), "unexpected message: {message}");
    }

    #[test]
    fn hearing_window_bounds_are_enforced() {
        assert!(super::validate_hearing_window(0).is_err());
        assert!(super::validate_hearing_window(366).is_err());
        assert_eq!(super::validate_hearing_window(30).expect("valid"), 30);
    }

    #[test]
    fn validate_audit_path_accepts_normalized_logs_subpaths() {
        let path = super::validate_audit_path("./logs//cases/./audit.jsonl/")
            .expect("path should be accepted");
        assert_eq!(path, PathBuf::from("logs/cases/audit.jsonl"));
    }

    #[test]
    fn validate_audit_path_rejects_parent_dir_traversal() {
        let err = super::validate_audit_path("logs/../audit.jsonl").expect_err("must reject '..'");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "CASEFLOW_AUDIT_PATH");
        assert!(message.contains(".."), "unexpected message: {message}");
    }

    #[test]
    fn validate_audit_path_rejects_paths_outside_logs_allowlist() {
        let err =
            super::validate_audit_path("tmp/case_audit.jsonl").expect_err("must stay under logs/");
        let ConfigError::InvalidValue { message, .. } = err else {
            panic!("expected InvalidValue");
        };
        assert!(
            message.contains("under 'logs/'"),
            "unexpected message: {message}"
        );
    }
}
