//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations. Two implementations exist behind feature flags:
//!
//! - `postgres` (default): Uses `deadpool-postgres` + `tokio-postgres`
//! - `libsql`: Uses libSQL (Turso's SQLite fork) for embedded/edge deployment
//!
//! Operations that touch the lawyer load counters (`active_case_count`) and a
//! case's `lawyer_id`/`status` run as a single backend transaction. The
//! decisions inside those transactions (who gets the case, whether a
//! transition is allowed, the new rating average) are pure functions in
//! [`crate::cases`], shared by both backends.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "libsql")]
pub mod libsql;

#[cfg(feature = "libsql")]
pub mod libsql_migrations;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cases::policy::AssignmentPolicy;
use crate::cases::rating::ClientRating;
use crate::cases::status::Actor;
use crate::error::{CaseError, DatabaseError};

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.backend {
        #[cfg(feature = "libsql")]
        crate::config::DatabaseBackend::LibSql => {
            use secrecy::ExposeSecret as _;

            let default_path = crate::config::default_libsql_path();
            let db_path = config.libsql_path.as_deref().unwrap_or(&default_path);

            let backend = if let Some(ref url) = config.libsql_url {
                let token = config.libsql_auth_token.as_ref().ok_or_else(|| {
                    DatabaseError::Pool(
                        "LIBSQL_AUTH_TOKEN required when LIBSQL_URL is set".to_string(),
                    )
                })?;
                libsql::LibSqlBackend::new_remote_replica(db_path, url, token.expose_secret())
                    .await?
            } else {
                libsql::LibSqlBackend::new_local(db_path).await?
            };
            backend.run_migrations().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "postgres")]
        crate::config::DatabaseBackend::Postgres => {
            let pg = postgres::PgBackend::new(config).await?;
            pg.run_migrations().await?;
            Ok(Arc::new(pg))
        }
        #[allow(unreachable_patterns)]
        other => Err(DatabaseError::Pool(format!(
            "Database backend '{}' is not compiled in. Enable the matching cargo feature.",
            other.as_str()
        ))),
    }
}

/// Kind of legal matter an intake (and the resulting case) concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    Civil,
    Criminal,
    Corporate,
    Matrimonial,
    Family,
    Property,
}

impl CaseType {
    pub const ALL: [CaseType; 6] = [
        Self::Civil,
        Self::Criminal,
        Self::Corporate,
        Self::Matrimonial,
        Self::Family,
        Self::Property,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Civil => "civil",
            Self::Criminal => "criminal",
            Self::Corporate => "corporate",
            Self::Matrimonial => "matrimonial",
            Self::Family => "family",
            Self::Property => "property",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "civil" => Some(Self::Civil),
            "criminal" => Some(Self::Criminal),
            "corporate" => Some(Self::Corporate),
            "matrimonial" => Some(Self::Matrimonial),
            "family" => Some(Self::Family),
            "property" => Some(Self::Property),
            _ => None,
        }
    }
}

/// Intake review state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    Pending,
    TempRejected,
    PermRejected,
    Approved,
    ClarificationNeeded,
}

impl IntakeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::TempRejected => "temp_rejected",
            Self::PermRejected => "perm_rejected",
            Self::Approved => "approved",
            Self::ClarificationNeeded => "clarification_needed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "temp_rejected" => Some(Self::TempRejected),
            "perm_rejected" => Some(Self::PermRejected),
            "approved" => Some(Self::Approved),
            "clarification_needed" => Some(Self::ClarificationNeeded),
            _ => None,
        }
    }
}

/// Case lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Queued,
    Open,
    InProgress,
    OnHold,
    Closed,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::OnHold => "on_hold",
            Self::Closed => "closed",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "on_hold" => Some(Self::OnHold),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Client,
    Staff,
    Lawyer,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Staff => "staff",
            Self::Lawyer => "lawyer",
            Self::Admin => "admin",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "client" => Some(Self::Client),
            "staff" => Some(Self::Staff),
            "lawyer" => Some(Self::Lawyer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Banned,
    Pending,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Banned => "banned",
            Self::Pending => "pending",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "banned" => Some(Self::Banned),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffProfile {
    pub name: String,
    pub department: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProfile {
    pub name: String,
}

/// Capacity, specialization, and rating state for one lawyer.
///
/// `active_case_count` and the rating fields are system managed: they only
/// change inside the transaction of the case mutation that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawyerProfile {
    pub name: String,
    pub experience_years: i32,
    pub specializations: BTreeSet<CaseType>,
    pub active_case_count: i32,
    pub rating: Decimal,
    pub rating_count: i32,
}

impl LawyerProfile {
    pub fn new(name: impl Into<String>, specializations: impl IntoIterator<Item = CaseType>) -> Self {
        Self {
            name: name.into(),
            experience_years: 0,
            specializations: specializations.into_iter().collect(),
            active_case_count: 0,
            rating: Decimal::ZERO,
            rating_count: 0,
        }
    }

    pub fn handles(&self, case_type: CaseType) -> bool {
        self.specializations.contains(&case_type)
    }
}

/// Role-specific profile owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RoleProfile {
    Client(ClientProfile),
    Staff(StaffProfile),
    Lawyer(LawyerProfile),
    Admin(AdminProfile),
}

impl RoleProfile {
    pub fn role(&self) -> UserRole {
        match self {
            Self::Client(_) => UserRole::Client,
            Self::Staff(_) => UserRole::Staff,
            Self::Lawyer(_) => UserRole::Lawyer,
            Self::Admin(_) => UserRole::Admin,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Client(p) => &p.name,
            Self::Staff(p) => &p.name,
            Self::Lawyer(p) => &p.name,
            Self::Admin(p) => &p.name,
        }
    }

    pub fn as_lawyer(&self) -> Option<&LawyerProfile> {
        match self {
            Self::Lawyer(profile) => Some(profile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub status: AccountStatus,
    pub profile: RoleProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn role(&self) -> UserRole {
        self.profile.role()
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub email: String,
    pub status: AccountStatus,
    pub profile: RoleProfile,
}

/// A lawyer as seen by the assignment code: identity, account state, profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawyerRecord {
    pub user_id: Uuid,
    pub status: AccountStatus,
    pub profile: LawyerProfile,
}

/// One uploaded revision of an intake document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub version: u32,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A named intake document and its revisions, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeDocument {
    pub file_id: Uuid,
    pub name: String,
    pub versions: Vec<DocumentVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub id: Uuid,
    pub client_id: Uuid,
    pub case_type: CaseType,
    pub details: serde_json::Value,
    pub documents: Vec<IntakeDocument>,
    pub documents_verified: bool,
    pub status: IntakeStatus,
    pub attempts: i32,
    pub assigned_staff_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub internal_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: Uuid,
    pub intake_id: Uuid,
    pub client_id: Uuid,
    pub lawyer_id: Option<Uuid>,
    pub case_number: String,
    pub status: CaseStatus,
    /// Copied from the intake at creation and never changed afterwards.
    pub case_type: CaseType,
    pub next_hearing_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub client_rating: Option<i32>,
    pub client_review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a lawyer may edit on a case they are assigned to.
#[derive(Debug, Clone, Default)]
pub struct UpdateCaseDetailsParams {
    pub next_hearing_date: Option<Option<NaiveDate>>,
    pub notes: Option<Option<String>>,
}

/// Result of turning an approved intake into a case.
#[derive(Debug, Clone)]
pub struct CaseAllocation {
    pub case: CaseRecord,
    /// Lawyer's active case count after the assignment, when one was made.
    pub lawyer_load: Option<i32>,
}

/// A committed status change.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub case: CaseRecord,
    pub previous: CaseStatus,
    /// +1 / -1 / 0 applied to the assigned lawyer's active case count.
    pub load_delta: i32,
}

impl StatusChange {
    /// Lawyer whose capacity was freed by this change, if any.
    pub fn released_lawyer(&self) -> Option<Uuid> {
        if self.load_delta < 0 {
            self.case.lawyer_id
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LawyerRatingChange {
    pub lawyer_id: Uuid,
    pub previous_rating: Decimal,
    pub rating: Decimal,
    pub previous_count: i32,
    pub count: i32,
}

/// A committed client rating.
#[derive(Debug, Clone)]
pub struct RatingOutcome {
    pub case: CaseRecord,
    pub lawyer: Option<LawyerRatingChange>,
}

/// Whose hearings a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HearingScope {
    Lawyer(Uuid),
    Client(Uuid),
    All,
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; leaf consumers can depend on a specific sub-trait instead.

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user and its role profile in one transaction.
    async fn create_user(&self, input: &CreateUserParams) -> Result<UserRecord, DatabaseError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError>;
    async fn list_users_by_role(
        &self,
        role: UserRole,
        status: Option<AccountStatus>,
    ) -> Result<Vec<UserRecord>, DatabaseError>;
    async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError>;
}

/// Read/write view over lawyer capacity, specializations, and ratings.
#[async_trait]
pub trait LawyerDirectory: Send + Sync {
    async fn get_lawyer(&self, user_id: Uuid) -> Result<Option<LawyerRecord>, DatabaseError>;
    /// Lawyers with an ACTIVE account, in registration order.
    async fn list_active_lawyers(&self) -> Result<Vec<LawyerRecord>, DatabaseError>;
    async fn update_specializations(
        &self,
        user_id: Uuid,
        specializations: &BTreeSet<CaseType>,
    ) -> Result<Option<LawyerRecord>, DatabaseError>;
    /// Manual correction of a lawyer's load. Values above the capacity limit
    /// are stored as given and simply block further auto-assignment.
    async fn set_active_case_count(&self, user_id: Uuid, count: i32)
    -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait IntakeStore: Send + Sync {
    async fn insert_intake(&self, intake: &IntakeRecord) -> Result<(), DatabaseError>;
    async fn get_intake(&self, id: Uuid) -> Result<Option<IntakeRecord>, DatabaseError>;
    async fn list_intakes_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<IntakeRecord>, DatabaseError>;
    /// PENDING intakes assigned to `staff_id` plus the unassigned pool, or
    /// every PENDING intake when `staff_id` is `None`.
    async fn list_pending_intakes(
        &self,
        staff_id: Option<Uuid>,
    ) -> Result<Vec<IntakeRecord>, DatabaseError>;
    /// Number of PENDING intakes per assigned staff member.
    async fn pending_intake_load(&self) -> Result<HashMap<Uuid, i64>, DatabaseError>;
    /// Persist `intake` only if the stored row is still in `expected`.
    /// Returns `false` when another writer changed the status first.
    async fn update_intake(
        &self,
        intake: &IntakeRecord,
        expected: IntakeStatus,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Create the case for an approved intake, assigning the lawyer chosen by
    /// `policy` (or queueing the case) and bumping that lawyer's load, all in
    /// one transaction.
    async fn allocate_case(
        &self,
        intake: &IntakeRecord,
        case_number: &str,
        policy: &AssignmentPolicy,
    ) -> Result<CaseAllocation, CaseError>;
    /// Claim the oldest queued case the lawyer can take, skipping cases that
    /// a concurrent claim holds. At most one case per call.
    async fn claim_queued_case(
        &self,
        lawyer_id: Uuid,
        policy: &AssignmentPolicy,
    ) -> Result<Option<CaseRecord>, CaseError>;
    async fn transition_case_status(
        &self,
        case_id: Uuid,
        new_status: CaseStatus,
        actor: &Actor,
    ) -> Result<StatusChange, CaseError>;
    async fn rate_case(
        &self,
        client_id: Uuid,
        case_id: Uuid,
        rating: ClientRating,
        review: Option<&str>,
    ) -> Result<RatingOutcome, CaseError>;
    async fn update_case_details(
        &self,
        case_id: Uuid,
        actor: &Actor,
        input: &UpdateCaseDetailsParams,
    ) -> Result<CaseRecord, CaseError>;
    async fn get_case(&self, id: Uuid) -> Result<Option<CaseRecord>, DatabaseError>;
    async fn get_case_for_intake(
        &self,
        intake_id: Uuid,
    ) -> Result<Option<CaseRecord>, DatabaseError>;
    async fn list_cases_for_lawyer(
        &self,
        lawyer_id: Uuid,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
    async fn list_cases_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
    /// Every case, newest first.
    async fn list_all_cases(&self) -> Result<Vec<CaseRecord>, DatabaseError>;
    /// Queued cases in FCFS order.
    async fn list_queued_cases(
        &self,
        case_type: Option<CaseType>,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
    /// Cases with a hearing in `[from, to]`, earliest first.
    async fn list_hearings_between(
        &self,
        scope: HearingScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database: UserStore + LawyerDirectory + IntakeStore + CaseStore + Send + Sync {
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_db_values_round_trip_for_every_variant() {
        for case_type in CaseType::ALL {
            assert_eq!(CaseType::from_db_value(case_type.as_str()), Some(case_type));
        }
        for status in [
            CaseStatus::Queued,
            CaseStatus::Open,
            CaseStatus::InProgress,
            CaseStatus::OnHold,
            CaseStatus::Closed,
        ] {
            assert_eq!(CaseStatus::from_db_value(status.as_str()), Some(status));
        }
        assert_eq!(IntakeStatus::from_db_value("approved"), Some(IntakeStatus::Approved));
        assert_eq!(UserRole::from_db_value("ADMIN"), None);
    }

    #[test]
    fn role_profile_reports_role_and_name() {
        let profile = RoleProfile::Lawyer(LawyerProfile::new("Ada", [CaseType::Civil]));
        assert_eq!(profile.role(), UserRole::Lawyer);
        assert_eq!(profile.name(), "Ada");
        assert!(profile.as_lawyer().is_some_and(|p| p.handles(CaseType::Civil)));

        let staff = RoleProfile::Staff(StaffProfile {
            name: "Sam".to_string(),
            department: None,
        });
        assert!(staff.as_lawyer().is_none());
    }

    #[test]
    fn released_lawyer_only_on_negative_delta() {
        let lawyer = Uuid::new_v4();
        let case = CaseRecord {
            id: Uuid::new_v4(),
            intake_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            lawyer_id: Some(lawyer),
            case_number: "CAS-2026-000001".to_string(),
            status: CaseStatus::Closed,
            case_type: CaseType::Civil,
            next_hearing_date: None,
            notes: None,
            client_rating: None,
            client_review: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let closed = StatusChange {
            case: case.clone(),
            previous: CaseStatus::Open,
            load_delta: -1,
        };
        assert_eq!(closed.released_lawyer(), Some(lawyer));

        let noop = StatusChange {
            case,
            previous: CaseStatus::Closed,
            load_delta: 0,
        };
        assert_eq!(noop.released_lawyer(), None);
    }
}
