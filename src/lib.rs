//! caseflow: legal intake and case management core.
//!
//! Clients submit intakes, staff review them, and approved intakes become
//! cases assigned to the least loaded lawyer whose specializations match.
//! Cases nobody can take wait in a first-come-first-served queue that drains
//! whenever a matching lawyer gains room.

pub mod cases;
pub mod config;
pub mod db;
pub mod error;
pub mod settings;

pub use cases::CaseWorkflow;
pub use config::Config;
pub use error::{CaseError, ConfigError, DatabaseError};
