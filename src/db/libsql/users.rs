use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, params};
use uuid::Uuid;

use crate::db::{
    AccountStatus, AdminProfile, CaseType, ClientProfile, CreateUserParams, LawyerDirectory,
    LawyerProfile, LawyerRecord, RoleProfile, StaffProfile, UserRecord, UserRole, UserStore,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, finish_tx, fmt_ts, get_i32, get_opt_text, get_text, opt_text, parse_decimal,
    parse_timestamp, parse_uuid,
};

const USER_COLUMNS: &str = "id, email, role, status, created_at, updated_at";

pub(super) const LAWYER_SELECT: &str = "SELECT u.id, u.status, p.name, p.experience_years, \
     p.specializations, p.active_case_count, p.rating, p.rating_count \
     FROM users u JOIN lawyer_profiles p ON p.user_id = u.id";

fn parse_role(raw: &str) -> Result<UserRole, DatabaseError> {
    UserRole::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid user role '{}'", raw)))
}

fn parse_account_status(raw: &str) -> Result<AccountStatus, DatabaseError> {
    AccountStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid account status '{}'", raw)))
}

pub(super) fn specializations_to_json(specs: &BTreeSet<CaseType>) -> String {
    let values: Vec<&str> = specs.iter().map(|t| t.as_str()).collect();
    serde_json::Value::from(values).to_string()
}

fn parse_specializations(raw: &str) -> Result<BTreeSet<CaseType>, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let values: Vec<String> =
        serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    values
        .iter()
        .map(|value| {
            CaseType::from_db_value(value).ok_or_else(|| {
                DatabaseError::Serialization(format!("invalid specialization '{}'", value))
            })
        })
        .collect()
}

pub(super) fn row_to_lawyer(row: &libsql::Row) -> Result<LawyerRecord, DatabaseError> {
    Ok(LawyerRecord {
        user_id: parse_uuid(&get_text(row, 0), "lawyer.user_id")?,
        status: parse_account_status(&get_text(row, 1))?,
        profile: LawyerProfile {
            name: get_text(row, 2),
            experience_years: get_i32(row, 3, "experience_years")?,
            specializations: parse_specializations(&get_text(row, 4))?,
            active_case_count: get_i32(row, 5, "active_case_count")?,
            rating: parse_decimal(&get_text(row, 6), "rating")?,
            rating_count: get_i32(row, 7, "rating_count")?,
        },
    })
}

/// Load one lawyer on an existing connection (possibly mid-transaction).
pub(super) async fn fetch_lawyer(
    conn: &Connection,
    user_id: Uuid,
) -> Result<Option<LawyerRecord>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("{LAWYER_SELECT} WHERE u.id = ?1 LIMIT 1"),
            params![user_id.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_lawyer(&row)?)),
        None => Ok(None),
    }
}

/// ACTIVE lawyers in registration order.
pub(super) async fn fetch_active_lawyers(
    conn: &Connection,
) -> Result<Vec<LawyerRecord>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "{LAWYER_SELECT} WHERE u.status = 'active' ORDER BY u.created_at ASC, u.rowid ASC"
            ),
            (),
        )
        .await?;
    let mut lawyers = Vec::new();
    while let Some(row) = rows.next().await? {
        lawyers.push(row_to_lawyer(&row)?);
    }
    Ok(lawyers)
}

async fn load_profile(
    conn: &Connection,
    user_id: &str,
    role: UserRole,
) -> Result<RoleProfile, DatabaseError> {
    let missing = || DatabaseError::Query(format!("{} profile missing for user {}", role.as_str(), user_id));
    let profile = match role {
        UserRole::Client => {
            let row = conn
                .query(
                    "SELECT name, phone FROM client_profiles WHERE user_id = ?1",
                    params![user_id],
                )
                .await?
                .next()
                .await?
                .ok_or_else(missing)?;
            RoleProfile::Client(ClientProfile {
                name: get_text(&row, 0),
                phone: get_opt_text(&row, 1),
            })
        }
        UserRole::Staff => {
            let row = conn
                .query(
                    "SELECT name, department FROM staff_profiles WHERE user_id = ?1",
                    params![user_id],
                )
                .await?
                .next()
                .await?
                .ok_or_else(missing)?;
            RoleProfile::Staff(StaffProfile {
                name: get_text(&row, 0),
                department: get_opt_text(&row, 1),
            })
        }
        UserRole::Admin => {
            let row = conn
                .query(
                    "SELECT name FROM admin_profiles WHERE user_id = ?1",
                    params![user_id],
                )
                .await?
                .next()
                .await?
                .ok_or_else(missing)?;
            RoleProfile::Admin(AdminProfile {
                name: get_text(&row, 0),
            })
        }
        UserRole::Lawyer => {
            let id = parse_uuid(user_id, "user.id")?;
            let lawyer = fetch_lawyer(conn, id).await?.ok_or_else(missing)?;
            RoleProfile::Lawyer(lawyer.profile)
        }
    };
    Ok(profile)
}

async fn row_to_user(conn: &Connection, row: &libsql::Row) -> Result<UserRecord, DatabaseError> {
    let id = get_text(row, 0);
    let role = parse_role(&get_text(row, 2))?;
    let profile = load_profile(conn, &id, role).await?;
    Ok(UserRecord {
        id: parse_uuid(&id, "user.id")?,
        email: get_text(row, 1),
        status: parse_account_status(&get_text(row, 3))?,
        profile,
        created_at: parse_timestamp(&get_text(row, 4))?,
        updated_at: parse_timestamp(&get_text(row, 5))?,
    })
}

async fn insert_profile(
    conn: &Connection,
    user_id: &str,
    profile: &RoleProfile,
) -> Result<(), DatabaseError> {
    match profile {
        RoleProfile::Client(p) => {
            conn.execute(
                "INSERT INTO client_profiles (user_id, name, phone) VALUES (?1, ?2, ?3)",
                params![user_id, p.name.trim(), opt_text(p.phone.as_deref())],
            )
            .await?;
        }
        RoleProfile::Staff(p) => {
            conn.execute(
                "INSERT INTO staff_profiles (user_id, name, department) VALUES (?1, ?2, ?3)",
                params![user_id, p.name.trim(), opt_text(p.department.as_deref())],
            )
            .await?;
        }
        RoleProfile::Admin(p) => {
            conn.execute(
                "INSERT INTO admin_profiles (user_id, name) VALUES (?1, ?2)",
                params![user_id, p.name.trim()],
            )
            .await?;
        }
        RoleProfile::Lawyer(p) => {
            conn.execute(
                "INSERT INTO lawyer_profiles \
                 (user_id, name, experience_years, specializations, active_case_count, rating, rating_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    p.name.trim(),
                    i64::from(p.experience_years),
                    specializations_to_json(&p.specializations),
                    i64::from(p.active_case_count.max(0)),
                    p.rating.to_string(),
                    i64::from(p.rating_count.max(0)),
                ],
            )
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl UserStore for LibSqlBackend {
    async fn create_user(&self, input: &CreateUserParams) -> Result<UserRecord, DatabaseError> {
        let email = input.email.trim().to_ascii_lowercase();
        if email.is_empty() {
            return Err(DatabaseError::Serialization(
                "user email cannot be empty".to_string(),
            ));
        }

        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let now = fmt_ts(&Utc::now());

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<UserRecord, DatabaseError> = async {
            conn.execute(
                "INSERT INTO users (id, email, role, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.as_str(),
                    email.as_str(),
                    input.profile.role().as_str(),
                    input.status.as_str(),
                    now.as_str(),
                ],
            )
            .await?;
            insert_profile(&conn, &id, &input.profile).await?;
            let row = conn
                .query(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id.as_str()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| DatabaseError::Query("failed to load created user".to_string()))?;
            row_to_user(&conn, &row).await
        }
        .await;
        finish_tx(&conn, result).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&conn, &row).await?)),
            None => Ok(None),
        }
    }

    async fn list_users_by_role(
        &self,
        role: UserRole,
        status: Option<AccountStatus>,
    ) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users \
                     WHERE role = ?1 AND (?2 IS NULL OR status = ?2) \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![role.as_str(), opt_text(status.map(AccountStatus::as_str))],
            )
            .await?;
        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_user(&conn, &row).await?);
        }
        Ok(users)
    }

    async fn set_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE users SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), status.as_str(), fmt_ts(&Utc::now())],
            )
            .await?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl LawyerDirectory for LibSqlBackend {
    async fn get_lawyer(&self, user_id: Uuid) -> Result<Option<LawyerRecord>, DatabaseError> {
        let conn = self.connect().await?;
        fetch_lawyer(&conn, user_id).await
    }

    async fn list_active_lawyers(&self) -> Result<Vec<LawyerRecord>, DatabaseError> {
        let conn = self.connect().await?;
        fetch_active_lawyers(&conn).await
    }

    async fn update_specializations(
        &self,
        user_id: Uuid,
        specializations: &BTreeSet<CaseType>,
    ) -> Result<Option<LawyerRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE lawyer_profiles SET specializations = ?2 WHERE user_id = ?1",
                params![user_id.to_string(), specializations_to_json(specializations)],
            )
            .await?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_lawyer(&conn, user_id).await
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
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE lawyer_profiles SET active_case_count = ?2 WHERE user_id = ?1",
                params![user_id.to_string(), i64::from(count)],
            )
            .await?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn backend() -> (LibSqlBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = LibSqlBackend::new_local(&dir.path().join("users.db"))
            .await
            .expect("open libsql");
        backend.run_migrations().await.expect("migrations");
        (backend, dir)
    }

    #[tokio::test]
    async fn create_user_persists_role_profile() {
        let (db, _dir) = backend().await;
        let user = db
            .create_user(&CreateUserParams {
                email: "Ada@Example.com".to_string(),
                status: AccountStatus::Active,
                profile: RoleProfile::Lawyer(LawyerProfile::new(
                    "Ada",
                    [CaseType::Civil, CaseType::Family],
                )),
            })
            .await
            .expect("create lawyer");

        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role(), UserRole::Lawyer);

        let lawyer = db.get_lawyer(user.id).await.expect("query").expect("lawyer");
        assert!(lawyer.profile.handles(CaseType::Family));
        assert_eq!(lawyer.profile.active_case_count, 0);
        assert_eq!(lawyer.profile.rating, rust_decimal::Decimal::ZERO);
    }

    #[tokio::test]
    async fn duplicate_email_is_unique_violation() {
        let (db, _dir) = backend().await;
        let params = CreateUserParams {
            email: "sam@example.com".to_string(),
            status: AccountStatus::Active,
            profile: RoleProfile::Staff(StaffProfile {
                name: "Sam".to_string(),
                department: Some("intake".to_string()),
            }),
        };
        db.create_user(&params).await.expect("first");
        let err = db.create_user(&params).await.expect_err("duplicate");
        assert!(matches!(err, DatabaseError::UniqueViolation(_)), "{err:?}");
        assert_eq!(
            db.list_users_by_role(UserRole::Staff, None)
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn active_lawyers_exclude_inactive_accounts_and_keep_order() {
        let (db, _dir) = backend().await;
        let mut ids = Vec::new();
        for name in ["first", "second", "third"] {
            let user = db
                .create_user(&CreateUserParams {
                    email: format!("{name}@example.com"),
                    status: AccountStatus::Active,
                    profile: RoleProfile::Lawyer(LawyerProfile::new(name, [CaseType::Criminal])),
                })
                .await
                .expect("create");
            ids.push(user.id);
        }
        assert!(
            db.set_account_status(ids[1], AccountStatus::Inactive)
                .await
                .expect("status")
        );

        let active: Vec<Uuid> = db
            .list_active_lawyers()
            .await
            .expect("list")
            .into_iter()
            .map(|l| l.user_id)
            .collect();
        assert_eq!(active, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn specialization_update_round_trips() {
        let (db, _dir) = backend().await;
        let user = db
            .create_user(&CreateUserParams {
                email: "lee@example.com".to_string(),
                status: AccountStatus::Active,
                profile: RoleProfile::Lawyer(LawyerProfile::new("Lee", [])),
            })
            .await
            .expect("create");

        let specs = BTreeSet::from([CaseType::Property, CaseType::Corporate]);
        let updated = db
            .update_specializations(user.id, &specs)
            .await
            .expect("update")
            .expect("lawyer exists");
        assert_eq!(updated.profile.specializations, specs);
        assert!(
            db.update_specializations(Uuid::new_v4(), &specs)
                .await
                .expect("update")
                .is_none()
        );
    }
}
