//! Runtime configuration.
//!
//! Values come from the settings file first and are then overridden by
//! environment variables (a `.env` file is honoured by the binary).

mod assignment;
mod database;
pub(crate) mod helpers;

pub use assignment::{AssignmentConfig, AuditConfig};
pub use database::{DatabaseBackend, DatabaseConfig, default_libsql_path};

use crate::error::ConfigError;
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub assignment: AssignmentConfig,
    pub audit: AuditConfig,
}

impl Config {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve(settings)?,
            assignment: AssignmentConfig::resolve(settings)?,
            audit: AuditConfig::resolve(settings)?,
        })
    }
}
