//! PostgreSQL backend for the Database trait.
//!
//! Load-changing operations lock the rows they decide on: candidate lawyer
//! profiles with `FOR UPDATE`, queued cases with `FOR UPDATE SKIP LOCKED` so
//! concurrent drains never wait on each other's claims.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::cases::policy::AssignmentPolicy;
use crate::cases::rating::{self, ClientRating};
use crate::cases::status::{self, Actor};
use crate::config::DatabaseConfig;
use crate::db::{
    AccountStatus, AdminProfile, CaseAllocation, CaseRecord, CaseStatus, CaseStore, CaseType,
    ClientProfile, CreateUserParams, Database, HearingScope, IntakeDocument, IntakeRecord,
    IntakeStatus, IntakeStore, LawyerDirectory, LawyerProfile, LawyerRecord, RatingOutcome,
    RoleProfile, StaffProfile, StatusChange, UpdateCaseDetailsParams, UserRecord, UserRole,
    UserStore,
};
use crate::error::{CaseError, DatabaseError};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const CASE_COLUMNS: &str = "id, intake_id, client_id, lawyer_id, case_number, status, case_type, \
     next_hearing_date, notes, client_rating, client_review, created_at, updated_at";

const INTAKE_COLUMNS: &str = "id, client_id, case_type, details, documents, documents_verified, \
     status, attempts, assigned_staff_id, rejection_reason, internal_notes, created_at, updated_at";

const LAWYER_SELECT: &str = "SELECT u.id, u.status, p.name, p.experience_years, \
     p.specializations, p.active_case_count, p.rating, p.rating_count \
     FROM users u JOIN lawyer_profiles p ON p.user_id = u.id";

const USER_SELECT: &str = "SELECT u.id, u.email, u.role, u.status, u.created_at, u.updated_at, \
     c.name AS client_name, c.phone, \
     s.name AS staff_name, s.department, \
     a.name AS admin_name, \
     l.name AS lawyer_name, l.experience_years, l.specializations, l.active_case_count, \
     l.rating, l.rating_count \
     FROM users u \
     LEFT JOIN client_profiles c ON c.user_id = u.id \
     LEFT JOIN staff_profiles s ON s.user_id = u.id \
     LEFT JOIN admin_profiles a ON a.user_id = u.id \
     LEFT JOIN lawyer_profiles l ON l.user_id = u.id";

/// PostgreSQL database backend.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a new PostgreSQL backend from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| DatabaseError::Pool("DATABASE_URL is not set".to_string()))?;
        let pg_config: tokio_postgres::Config = url
            .expose_secret()
            .parse()
            .map_err(|e: tokio_postgres::Error| DatabaseError::Pool(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Fail fast on a bad URL instead of on first use.
        let _ = pool.get().await?;
        Ok(Self { pool })
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }
}

fn parse_case_type(raw: &str) -> Result<CaseType, DatabaseError> {
    CaseType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid case type '{}'", raw)))
}

fn parse_case_status(raw: &str) -> Result<CaseStatus, DatabaseError> {
    CaseStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid case status '{}'", raw)))
}

fn parse_intake_status(raw: &str) -> Result<IntakeStatus, DatabaseError> {
    IntakeStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid intake status '{}'", raw)))
}

fn parse_account_status(raw: &str) -> Result<AccountStatus, DatabaseError> {
    AccountStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid account status '{}'", raw)))
}

fn parse_specializations(values: &[String]) -> Result<BTreeSet<CaseType>, DatabaseError> {
    values.iter().map(|value| parse_case_type(value)).collect()
}

fn specialization_values(specs: &BTreeSet<CaseType>) -> Vec<&'static str> {
    specs.iter().map(|t| t.as_str()).collect()
}

fn row_to_case(row: &tokio_postgres::Row) -> Result<CaseRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    let case_type_raw: String = row.get("case_type");
    Ok(CaseRecord {
        id: row.get("id"),
        intake_id: row.get("intake_id"),
        client_id: row.get("client_id"),
        lawyer_id: row.get("lawyer_id"),
        case_number: row.get("case_number"),
        status: parse_case_status(&status_raw)?,
        case_type: parse_case_type(&case_type_raw)?,
        next_hearing_date: row.get("next_hearing_date"),
        notes: row.get("notes"),
        client_rating: row.get("client_rating"),
        client_review: row.get("client_review"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_intake(row: &tokio_postgres::Row) -> Result<IntakeRecord, DatabaseError> {
    let case_type_raw: String = row.get("case_type");
    let status_raw: String = row.get("status");
    let documents_value: serde_json::Value = row.get("documents");
    let documents: Vec<IntakeDocument> = serde_json::from_value(documents_value)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    Ok(IntakeRecord {
        id: row.get("id"),
        client_id: row.get("client_id"),
        case_type: parse_case_type(&case_type_raw)?,
        details: row.get("details"),
        documents,
        documents_verified: row.get("documents_verified"),
        status: parse_intake_status(&status_raw)?,
        attempts: row.get("attempts"),
        assigned_staff_id: row.get("assigned_staff_id"),
        rejection_reason: row.get("rejection_reason"),
        internal_notes: row.get("internal_notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_lawyer(row: &tokio_postgres::Row) -> Result<LawyerRecord, DatabaseError> {
    let status_raw: String = row.get("status");
    let specializations: Vec<String> = row.get("specializations");
    Ok(LawyerRecord {
        user_id: row.get("id"),
        status: parse_account_status(&status_raw)?,
        profile: LawyerProfile {
            name: row.get("name"),
            experience_years: row.get("experience_years"),
            specializations: parse_specializations(&specializations)?,
            active_case_count: row.get("active_case_count"),
            rating: row.get("rating"),
            rating_count: row.get("rating_count"),
        },
    })
}

fn row_to_user(row: &tokio_postgres::Row) -> Result<UserRecord, DatabaseError> {
    let id: Uuid = row.get("id");
    let role_raw: String = row.get("role");
    let status_raw: String = row.get("status");
    let role = UserRole::from_db_value(&role_raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid user role '{}'", role_raw)))?;
    let missing =
        || DatabaseError::Query(format!("{} profile missing for user {}", role.as_str(), id));

    let profile = match role {
        UserRole::Client => RoleProfile::Client(ClientProfile {
            name: row.get::<_, Option<String>>("client_name").ok_or_else(missing)?,
            phone: row.get("phone"),
        }),
        UserRole::Staff => RoleProfile::Staff(StaffProfile {
            name: row.get::<_, Option<String>>("staff_name").ok_or_else(missing)?,
            department: row.get("department"),
        }),
        UserRole::Admin => RoleProfile::Admin(AdminProfile {
            name: row.get::<_, Option<String>>("admin_name").ok_or_else(missing)?,
        }),
        UserRole::Lawyer => {
            let name: String = row.get::<_, Option<String>>("lawyer_name").ok_or_else(missing)?;
            let specializations: Vec<String> = row.get("specializations");
            RoleProfile::Lawyer(LawyerProfile {
                name,
                experience_years: row.get("experience_years"),
                specializations: parse_specializations(&specializations)?,
                active_case_count: row.get("active_case_count"),
                rating: row.get("rating"),
                rating_count: row.get("rating_count"),
            })
        }
    };

    Ok(UserRecord {
        id,
        email: row.get("email"),
        status: parse_account_status(&status_raw)?,
        profile,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

async fn fetch_case<C>(conn: &C, id: Uuid, lock: bool) -> Result<Option<CaseRecord>, DatabaseError>
where
    C: GenericClient + Sync,
{
    let suffix = if lock { " FOR UPDATE" } else { "" };
    let row = conn
        .query_opt(
            &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = $1{suffix}"),
            &[&id],
        )
        .await?;
    row.as_ref().map(row_to_case).transpose()
}

async fn fetch_lawyer<C>(conn: &C, user_id: Uuid, lock: bool) -> Result<Option<LawyerRecord>, DatabaseError>
where
    C: GenericClient + Sync,
{
    let suffix = if lock { " FOR UPDATE OF p" } else { "" };
    let row = conn
        .query_opt(&format!("{LAWYER_SELECT} WHERE u.id = $1{suffix}"), &[&user_id])
        .await?;
    row.as_ref().map(row_to_lawyer).transpose()
}

fn collect<T>(
    rows: &[tokio_postgres::Row],
    map: fn(&tokio_postgres::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut client = self.pool.get().await?;
        embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

// ==================== UserStore ====================

#[async_trait]
impl UserStore for PgBackend {
    async fn create_user(&self, input: &CreateUserParams) -> Result<UserRecord, DatabaseError> {
        let email = input.email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Err(DatabaseError::Serialization(
                "user email cannot be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT INTO users (id, email, role, status) VALUES ($1, $2, $3, $4)",
            &[
                &id,
                &email,
                &input.profile.role().as_str(),
                &input.status.as_str(),
            ],
        )
        .await?;

        match &input.profile {
            RoleProfile::Client(p) => {
                tx.execute(
                    "INSERT INTO client_profiles (user_id, name, phone) VALUES ($1, $2, $3)",
                    &[&id, &p.name.trim(), &p.phone],
                )
                .await?;
            }
            RoleProfile::Staff(p) => {
                tx.execute(
                    "INSERT INTO staff_profiles (user_id, name, department) VALUES ($1, $2, $3)",
                    &[&id, &p.name.trim(), &p.department],
                )
                .await?;
            }
            RoleProfile::Admin(p) => {
                tx.execute(
                    "INSERT INTO admin_profiles (user_id, name) VALUES ($1, $2)",
                    &[&id, &p.name.trim()],
                )
                .await?;
            }
            RoleProfile::Lawyer(p) => {
                tx.execute(
                    "INSERT INTO lawyer_profiles \
                     (user_id, name, experience_years, specializations, active_case_count, rating, rating_count) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    &[
                        &id,
                        &p.name.trim(),
                        &p.experience_years,
                        &specialization_values(&p.specializations),
                        &p.active_case_count.max(0),
                        &p.rating,
                        &p.rating_count.max(0),
                    ],
                )
                .await?;
            }
        }

        let row = tx
            .query_one(&format!("{USER_SELECT} WHERE u.id = $1"), &[&id])
            .await?;
        let user = row_to_user(&row)?;
        tx.commit().await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(&format!("{USER_SELECT} WHERE u.id = $1"), &[&id])
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn list_users_by_role(
        &self,
        role: UserRole,
        status: Option<AccountStatus>,
    ) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let status = status.map(AccountStatus::as_str);
        let rows = conn
            .query(
                &format!(
                    "{USER_SELECT} WHERE u.role = $1 AND ($2::TEXT IS NULL OR u.status = $2) \
                     ORDER BY u.created_at ASC, u.seq ASC"
                ),
                &[&role.as_str(), &status],
            )
            .await?;
        collect(&rows, row_to_user)
    }

    async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.pool.get().await?;
        let changed = conn
            .execute(
                "UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1",
                &[&id, &status.as_str()],
            )
            .await?;
        Ok(changed > 0)
    }
}

// ==================== LawyerDirectory ====================

#[async_trait]
impl LawyerDirectory for PgBackend {
    async fn get_lawyer(&self, user_id: Uuid) -> Result<Option<LawyerRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        fetch_lawyer(&conn, user_id, false).await
    }

    async fn list_active_lawyers(&self) -> Result<Vec<LawyerRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "{LAWYER_SELECT} WHERE u.status = 'active' ORDER BY u.created_at ASC, u.seq ASC"
                ),
                &[],
            )
            .await?;
        collect(&rows, row_to_lawyer)
    }

    async fn update_specializations(
        &self,
        user_id: Uuid,
        specializations: &BTreeSet<CaseType>,
    ) -> Result<Option<LawyerRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let changed = conn
            .execute(
                "UPDATE lawyer_profiles SET specializations = $2 WHERE user_id = $1",
                &[&user_id, &specialization_values(specializations)],
            )
            .await?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_lawyer(&conn, user_id, false).await
    }

    async fn set_active_case_count(
        &self,
        user_id: Uuid,
        count: i32,
    ) -> Result<bool, DatabaseError> {
        if count < 0 {
            return Err(DatabaseError::Serialization(
                "active case count cannot be negative".to_string(),
            ));
        }
        let conn = self.pool.get().await?;
        let changed = conn
            .execute(
                "UPDATE lawyer_profiles SET active_case_count = $2 WHERE user_id = $1",
                &[&user_id, &count],
            )
            .await?;
        Ok(changed > 0)
    }
}

// ==================== IntakeStore ====================

#[async_trait]
impl IntakeStore for PgBackend {
    async fn insert_intake(&self, intake: &IntakeRecord) -> Result<(), DatabaseError> {
        let documents = serde_json::to_value(&intake.documents)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let conn = self.pool.get().await?;
        conn.execute(
            &format!(
                "INSERT INTO intakes ({INTAKE_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
            ),
            &[
                &intake.id,
                &intake.client_id,
                &intake.case_type.as_str(),
                &intake.details,
                &documents,
                &intake.documents_verified,
                &intake.status.as_str(),
                &intake.attempts,
                &intake.assigned_staff_id,
                &intake.rejection_reason,
                &intake.internal_notes,
                &intake.created_at,
                &intake.updated_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_intake(&self, id: Uuid) -> Result<Option<IntakeRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {INTAKE_COLUMNS} FROM intakes WHERE id = $1"),
                &[&id],
            )
            .await?;
        row.as_ref().map(row_to_intake).transpose()
    }

    async fn list_intakes_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<IntakeRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {INTAKE_COLUMNS} FROM intakes WHERE client_id = $1 \
                     ORDER BY created_at DESC"
                ),
                &[&client_id],
            )
            .await?;
        collect(&rows, row_to_intake)
    }

    async fn list_pending_intakes(
        &self,
        staff_id: Option<Uuid>,
    ) -> Result<Vec<IntakeRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {INTAKE_COLUMNS} FROM intakes \
                     WHERE status = 'pending' \
                       AND ($1::UUID IS NULL OR assigned_staff_id = $1 OR assigned_staff_id IS NULL) \
                     ORDER BY created_at ASC"
                ),
                &[&staff_id],
            )
            .await?;
        collect(&rows, row_to_intake)
    }

    async fn pending_intake_load(&self) -> Result<HashMap<Uuid, i64>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT assigned_staff_id, COUNT(*) AS pending FROM intakes \
                 WHERE status = 'pending' AND assigned_staff_id IS NOT NULL \
                 GROUP BY assigned_staff_id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("assigned_staff_id"), row.get("pending")))
            .collect())
    }

    async fn update_intake(
        &self,
        intake: &IntakeRecord,
        expected: IntakeStatus,
    ) -> Result<bool, DatabaseError> {
        let documents = serde_json::to_value(&intake.documents)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let conn = self.pool.get().await?;
        let changed = conn
            .execute(
                "UPDATE intakes SET \
                    case_type = $3, details = $4, documents = $5, documents_verified = $6, \
                    status = $7, attempts = $8, assigned_staff_id = $9, rejection_reason = $10, \
                    internal_notes = $11, updated_at = $12 \
                 WHERE id = $1 AND status = $2",
                &[
                    &intake.id,
                    &expected.as_str(),
                    &intake.case_type.as_str(),
                    &intake.details,
                    &documents,
                    &intake.documents_verified,
                    &intake.status.as_str(),
                    &intake.attempts,
                    &intake.assigned_staff_id,
                    &intake.rejection_reason,
                    &intake.internal_notes,
                    &intake.updated_at,
                ],
            )
            .await?;
        Ok(changed > 0)
    }
}

// ==================== CaseStore ====================

#[async_trait]
impl CaseStore for PgBackend {
    async fn allocate_case(
        &self,
        intake: &IntakeRecord,
        case_number: &str,
        policy: &AssignmentPolicy,
    ) -> Result<CaseAllocation, CaseError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT status, case_type, client_id FROM intakes WHERE id = $1 FOR UPDATE",
                &[&intake.id],
            )
            .await?
            .ok_or_else(|| CaseError::not_found("intake", intake.id))?;
        let intake_status: String = row.get("status");
        if intake_status != IntakeStatus::Approved.as_str() {
            return Err(CaseError::Validation(
                "intake must be approved before a case can be generated".to_string(),
            ));
        }
        let case_type_raw: String = row.get("case_type");
        let case_type = parse_case_type(&case_type_raw)?;
        let client_id: Uuid = row.get("client_id");

        let existing = tx
            .query_opt("SELECT id FROM cases WHERE intake_id = $1", &[&intake.id])
            .await?;
        if existing.is_some() {
            return Err(CaseError::Conflict(format!(
                "a case already exists for intake {}",
                intake.id
            )));
        }

        // Lock every candidate in a fixed order so concurrent allocations
        // serialize on the same rows.
        let rows = tx
            .query(
                &format!(
                    "{LAWYER_SELECT} WHERE u.status = 'active' \
                       AND $1 = ANY(p.specializations) AND p.active_case_count < $2 \
                     ORDER BY u.created_at ASC, u.seq ASC FOR UPDATE OF p"
                ),
                &[&case_type.as_str(), &policy.capacity_limit()],
            )
            .await?;
        let lawyers = collect(&rows, row_to_lawyer)?;
        let selected = policy.select(&lawyers, case_type);
        let (lawyer_id, status) = match selected {
            Some(lawyer) => (Some(lawyer.user_id), CaseStatus::Open),
            None => (None, CaseStatus::Queued),
        };

        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO cases \
                     (id, intake_id, client_id, lawyer_id, case_number, status, case_type, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) RETURNING {CASE_COLUMNS}"
                ),
                &[
                    &id,
                    &intake.id,
                    &client_id,
                    &lawyer_id,
                    &case_number,
                    &status.as_str(),
                    &case_type.as_str(),
                    &now,
                ],
            )
            .await?;
        let case = row_to_case(&row)?;

        let lawyer_load = match lawyer_id {
            Some(lawyer_id) => {
                let row = tx
                    .query_one(
                        "UPDATE lawyer_profiles SET active_case_count = active_case_count + 1 \
                         WHERE user_id = $1 RETURNING active_case_count",
                        &[&lawyer_id],
                    )
                    .await?;
                Some(row.get::<_, i32>("active_case_count"))
            }
            None => None,
        };

        tx.commit().await?;
        Ok(CaseAllocation { case, lawyer_load })
    }

    async fn claim_queued_case(
        &self,
        lawyer_id: Uuid,
        policy: &AssignmentPolicy,
    ) -> Result<Option<CaseRecord>, CaseError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        let Some(lawyer) = fetch_lawyer(&tx, lawyer_id, true).await? else {
            return Ok(None);
        };
        if !policy.can_take_queued_work(&lawyer) {
            return Ok(None);
        }

        let specializations = specialization_values(&lawyer.profile.specializations);
        let row = tx
            .query_opt(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE status = 'queued' AND lawyer_id IS NULL AND case_type = ANY($1) \
                     ORDER BY created_at ASC, seq ASC LIMIT 1 FOR UPDATE SKIP LOCKED"
                ),
                &[&specializations],
            )
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let queued = row_to_case(&row)?;

        let row = tx
            .query_one(
                &format!(
                    "UPDATE cases SET lawyer_id = $2, status = 'open', updated_at = NOW() \
                     WHERE id = $1 RETURNING {CASE_COLUMNS}"
                ),
                &[&queued.id, &lawyer_id],
            )
            .await?;
        let claimed = row_to_case(&row)?;
        tx.execute(
            "UPDATE lawyer_profiles SET active_case_count = active_case_count + 1 WHERE user_id = $1",
            &[&lawyer_id],
        )
        .await?;

        tx.commit().await?;
        Ok(Some(claimed))
    }

    async fn transition_case_status(
        &self,
        case_id: Uuid,
        new_status: CaseStatus,
        actor: &Actor,
    ) -> Result<StatusChange, CaseError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        let case = fetch_case(&tx, case_id, true)
            .await?
            .ok_or_else(|| CaseError::not_found("case", case_id))?;
        let plan = status::plan_transition(&case, new_status, actor)?;

        let case = if plan.from != plan.to {
            let row = tx
                .query_one(
                    &format!(
                        "UPDATE cases SET status = $2, updated_at = NOW() WHERE id = $1 \
                         RETURNING {CASE_COLUMNS}"
                    ),
                    &[&case_id, &plan.to.as_str()],
                )
                .await?;
            row_to_case(&row)?
        } else {
            case
        };

        if let Some(lawyer_id) = plan.lawyer_id
            && plan.load_delta != 0
        {
            tx.execute(
                "UPDATE lawyer_profiles \
                 SET active_case_count = GREATEST(active_case_count + $2, 0) WHERE user_id = $1",
                &[&lawyer_id, &plan.load_delta],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(StatusChange {
            case,
            previous: plan.from,
            load_delta: plan.load_delta,
        })
    }

    async fn rate_case(
        &self,
        client_id: Uuid,
        case_id: Uuid,
        rating: ClientRating,
        review: Option<&str>,
    ) -> Result<RatingOutcome, CaseError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        let case = fetch_case(&tx, case_id, true).await?;
        rating::check_ratable(case.as_ref(), client_id, case_id)?;

        let review = review.map(str::trim).filter(|r| !r.is_empty());
        let row = tx
            .query_one(
                &format!(
                    "UPDATE cases SET client_rating = $2, client_review = $3, updated_at = NOW() \
                     WHERE id = $1 RETURNING {CASE_COLUMNS}"
                ),
                &[&case_id, &rating.value(), &review],
            )
            .await?;
        let rated = row_to_case(&row)?;

        let mut lawyer_change = None;
        if let Some(lawyer_id) = rated.lawyer_id {
            let row = tx
                .query_opt(
                    "SELECT rating, rating_count FROM lawyer_profiles WHERE user_id = $1 FOR UPDATE",
                    &[&lawyer_id],
                )
                .await?;
            if let Some(row) = row {
                let change = rating::apply_rating(
                    lawyer_id,
                    row.get("rating"),
                    row.get("rating_count"),
                    rating,
                );
                tx.execute(
                    "UPDATE lawyer_profiles SET rating = $2, rating_count = $3 WHERE user_id = $1",
                    &[&lawyer_id, &change.rating, &change.count],
                )
                .await?;
                lawyer_change = Some(change);
            }
        }

        tx.commit().await?;
        Ok(RatingOutcome {
            case: rated,
            lawyer: lawyer_change,
        })
    }

    async fn update_case_details(
        &self,
        case_id: Uuid,
        actor: &Actor,
        input: &UpdateCaseDetailsParams,
    ) -> Result<CaseRecord, CaseError> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;

        let mut case = fetch_case(&tx, case_id, true)
            .await?
            .ok_or_else(|| CaseError::not_found("case", case_id))?;
        status::authorize_case_actor(&case, actor)?;

        if let Some(date) = input.next_hearing_date {
            case.next_hearing_date = date;
        }
        if let Some(ref notes) = input.notes {
            case.notes = notes.clone();
        }
        let row = tx
            .query_one(
                &format!(
                    "UPDATE cases SET next_hearing_date = $2, notes = $3, updated_at = NOW() \
                     WHERE id = $1 RETURNING {CASE_COLUMNS}"
                ),
                &[&case_id, &case.next_hearing_date, &case.notes],
            )
            .await?;
        let updated = row_to_case(&row)?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        fetch_case(&conn, id, false).await
    }

    async fn get_case_for_intake(
        &self,
        intake_id: Uuid,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE intake_id = $1"),
                &[&intake_id],
            )
            .await?;
        row.as_ref().map(row_to_case).transpose()
    }

    async fn list_cases_for_lawyer(
        &self,
        lawyer_id: Uuid,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases WHERE lawyer_id = $1 ORDER BY updated_at DESC"
                ),
                &[&lawyer_id],
            )
            .await?;
        collect(&rows, row_to_case)
    }

    async fn list_cases_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases WHERE client_id = $1 ORDER BY created_at DESC"
                ),
                &[&client_id],
            )
            .await?;
        collect(&rows, row_to_case)
    }

    async fn list_all_cases(&self) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases ORDER BY created_at DESC, seq DESC"),
                &[],
            )
            .await?;
        collect(&rows, row_to_case)
    }

    async fn list_queued_cases(
        &self,
        case_type: Option<CaseType>,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.pool.get().await?;
        let case_type = case_type.map(CaseType::as_str);
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE status = 'queued' AND ($1::TEXT IS NULL OR case_type = $1) \
                     ORDER BY created_at ASC, seq ASC"
                ),
                &[&case_type],
            )
            .await?;
        collect(&rows, row_to_case)
    }

    async fn list_hearings_between(
        &self,
        scope: HearingScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let (filter, owner) = match scope {
            HearingScope::Lawyer(id) => ("AND lawyer_id = $3", Some(id)),
            HearingScope::Client(id) => ("AND client_id = $3", Some(id)),
            HearingScope::All => ("AND $3::UUID IS NULL", None),
        };
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE next_hearing_date BETWEEN $1 AND $2 {filter} \
                     ORDER BY next_hearing_date ASC, seq ASC"
                ),
                &[&from, &to, &owner],
            )
            .await?;
        collect(&rows, row_to_case)
    }
}
