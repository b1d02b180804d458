use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use libsql::{Connection, params};
use uuid::Uuid;

use crate::cases::policy::AssignmentPolicy;
use crate::cases::rating::{self, ClientRating};
use crate::cases::status::{self, Actor};
use crate::db::{
    CaseAllocation, CaseRecord, CaseStatus, CaseStore, CaseType, HearingScope, IntakeRecord,
    IntakeStatus, RatingOutcome, StatusChange, UpdateCaseDetailsParams,
};
use crate::error::{CaseError, DatabaseError};

use super::intakes::parse_case_type;
use super::users::{fetch_active_lawyers, fetch_lawyer, specializations_to_json};
use super::{
    LibSqlBackend, finish_tx, fmt_date, fmt_ts, get_i32, get_opt_i64, get_opt_text, get_text, opt_text,
    opt_uuid, parse_date_opt, parse_decimal, parse_timestamp, parse_uuid, parse_uuid_opt,
};

const CASE_COLUMNS: &str = "id, intake_id, client_id, lawyer_id, case_number, status, case_type, \
     next_hearing_date, notes, client_rating, client_review, created_at, updated_at";

fn parse_case_status(raw: &str) -> Result<CaseStatus, DatabaseError> {
    CaseStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid case status '{}'", raw)))
}

fn row_to_case(row: &libsql::Row) -> Result<CaseRecord, DatabaseError> {
    let client_rating = get_opt_i64(row, 9)
        .map(i32::try_from)
        .transpose()
        .map_err(|_| DatabaseError::Serialization("client_rating out of range".to_string()))?;
    Ok(CaseRecord {
        id: parse_uuid(&get_text(row, 0), "case.id")?,
        intake_id: parse_uuid(&get_text(row, 1), "case.intake_id")?,
        client_id: parse_uuid(&get_text(row, 2), "case.client_id")?,
        lawyer_id: parse_uuid_opt(get_opt_text(row, 3), "case.lawyer_id")?,
        case_number: get_text(row, 4),
        status: parse_case_status(&get_text(row, 5))?,
        case_type: parse_case_type(&get_text(row, 6))?,
        next_hearing_date: parse_date_opt(get_opt_text(row, 7))?,
        notes: get_opt_text(row, 8),
        client_rating,
        client_review: get_opt_text(row, 10),
        created_at: parse_timestamp(&get_text(row, 11))?,
        updated_at: parse_timestamp(&get_text(row, 12))?,
    })
}

async fn fetch_case(conn: &Connection, id: Uuid) -> Result<Option<CaseRecord>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1"),
            params![id.to_string()],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_case(&row)?)),
        None => Ok(None),
    }
}

async fn collect_cases(mut rows: libsql::Rows) -> Result<Vec<CaseRecord>, DatabaseError> {
    let mut cases = Vec::new();
    while let Some(row) = rows.next().await? {
        cases.push(row_to_case(&row)?);
    }
    Ok(cases)
}

/// Adjust a lawyer's load by one unit in either direction, never below zero.
async fn shift_lawyer_load(conn: &Connection, lawyer_id: Uuid, delta: i32) -> Result<(), DatabaseError> {
    let sql = if delta > 0 {
        "UPDATE lawyer_profiles SET active_case_count = active_case_count + 1 WHERE user_id = ?1"
    } else {
        "UPDATE lawyer_profiles SET active_case_count = MAX(active_case_count - 1, 0) WHERE user_id = ?1"
    };
    conn.execute(sql, params![lawyer_id.to_string()]).await?;
    Ok(())
}

/// Take one slot of a lawyer's capacity. Fails if the slot is already gone.
async fn reserve_slot(
    conn: &Connection,
    lawyer_id: Uuid,
    policy: &AssignmentPolicy,
) -> Result<(), CaseError> {
    let changed = conn
        .execute(
            "UPDATE lawyer_profiles SET active_case_count = active_case_count + 1 \
             WHERE user_id = ?1 AND active_case_count < ?2",
            params![lawyer_id.to_string(), i64::from(policy.capacity_limit())],
        )
        .await?;
    if changed == 0 {
        return Err(CaseError::Conflict(format!(
            "lawyer {lawyer_id} has no free capacity"
        )));
    }
    Ok(())
}

#[async_trait]
impl CaseStore for LibSqlBackend {
    async fn allocate_case(
        &self,
        intake: &IntakeRecord,
        case_number: &str,
        policy: &AssignmentPolicy,
    ) -> Result<CaseAllocation, CaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<CaseAllocation, CaseError> = async {
            let row = conn
                .query(
                    "SELECT status, case_type, client_id FROM intakes WHERE id = ?1",
                    params![intake.id.to_string()],
                )
                .await?
                .next()
                .await?
                .ok_or_else(|| CaseError::not_found("intake", intake.id))?;
            if get_text(&row, 0) != IntakeStatus::Approved.as_str() {
                return Err(CaseError::Validation(
                    "intake must be approved before a case can be generated".to_string(),
                ));
            }
            let case_type = parse_case_type(&get_text(&row, 1))?;
            let client_id = parse_uuid(&get_text(&row, 2), "intake.client_id")?;

            let existing = conn
                .query(
                    "SELECT 1 FROM cases WHERE intake_id = ?1 LIMIT 1",
                    params![intake.id.to_string()],
                )
                .await?
                .next()
                .await?;
            if existing.is_some() {
                return Err(CaseError::Conflict(format!(
                    "a case already exists for intake {}",
                    intake.id
                )));
            }

            let lawyers = fetch_active_lawyers(&conn).await?;
            let selected = policy.select(&lawyers, case_type);
            let (lawyer_id, status) = match selected {
                Some(lawyer) => (Some(lawyer.user_id), CaseStatus::Open),
                None => (None, CaseStatus::Queued),
            };

            let id = Uuid::new_v4();
            let now = fmt_ts(&Utc::now());
            conn.execute(
                "INSERT INTO cases \
                 (id, intake_id, client_id, lawyer_id, case_number, status, case_type, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id.to_string(),
                    intake.id.to_string(),
                    client_id.to_string(),
                    opt_uuid(lawyer_id),
                    case_number,
                    status.as_str(),
                    case_type.as_str(),
                    now.as_str(),
                ],
            )
            .await?;

            let lawyer_load = match selected {
                Some(lawyer) => {
                    reserve_slot(&conn, lawyer.user_id, policy).await?;
                    Some(lawyer.profile.active_case_count + 1)
                }
                None => None,
            };

            let case = fetch_case(&conn, id)
                .await?
                .ok_or_else(|| DatabaseError::Query("failed to load created case".to_string()))?;
            Ok(CaseAllocation { case, lawyer_load })
        }
        .await;
        finish_tx(&conn, result).await
    }

    async fn claim_queued_case(
        &self,
        lawyer_id: Uuid,
        policy: &AssignmentPolicy,
    ) -> Result<Option<CaseRecord>, CaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<Option<CaseRecord>, CaseError> = async {
            let Some(lawyer) = fetch_lawyer(&conn, lawyer_id).await? else {
                return Ok(None);
            };
            if !policy.can_take_queued_work(&lawyer) {
                return Ok(None);
            }

            let mut rows = conn
                .query(
                    &format!(
                        "SELECT {CASE_COLUMNS} FROM cases \
                         WHERE status = 'queued' AND lawyer_id IS NULL \
                           AND case_type IN (SELECT value FROM json_each(?1)) \
                         ORDER BY created_at ASC, rowid ASC LIMIT 1"
                    ),
                    params![specializations_to_json(&lawyer.profile.specializations)],
                )
                .await?;
            let Some(row) = rows.next().await? else {
                return Ok(None);
            };
            let queued = row_to_case(&row)?;
            drop(rows);

            let changed = conn
                .execute(
                    "UPDATE cases SET lawyer_id = ?2, status = 'open', updated_at = ?3 \
                     WHERE id = ?1 AND status = 'queued' AND lawyer_id IS NULL",
                    params![queued.id.to_string(), lawyer_id.to_string(), fmt_ts(&Utc::now())],
                )
                .await?;
            if changed == 0 {
                return Ok(None);
            }
            reserve_slot(&conn, lawyer_id, policy).await?;

            let claimed = fetch_case(&conn, queued.id)
                .await?
                .ok_or_else(|| DatabaseError::Query("claimed case disappeared".to_string()))?;
            Ok(Some(claimed))
        }
        .await;
        finish_tx(&conn, result).await
    }

    async fn transition_case_status(
        &self,
        case_id: Uuid,
        new_status: CaseStatus,
        actor: &Actor,
    ) -> Result<StatusChange, CaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<StatusChange, CaseError> = async {
            let case = fetch_case(&conn, case_id)
                .await?
                .ok_or_else(|| CaseError::not_found("case", case_id))?;
            let plan = status::plan_transition(&case, new_status, actor)?;

            if plan.from != plan.to {
                conn.execute(
                    "UPDATE cases SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![case_id.to_string(), plan.to.as_str(), fmt_ts(&Utc::now())],
                )
                .await?;
            }
            if let Some(lawyer_id) = plan.lawyer_id
                && plan.load_delta != 0
            {
                shift_lawyer_load(&conn, lawyer_id, plan.load_delta).await?;
            }

            let case = fetch_case(&conn, case_id)
                .await?
                .ok_or_else(|| CaseError::not_found("case", case_id))?;
            Ok(StatusChange {
                case,
                previous: plan.from,
                load_delta: plan.load_delta,
            })
        }
        .await;
        finish_tx(&conn, result).await
    }

    async fn rate_case(
        &self,
        client_id: Uuid,
        case_id: Uuid,
        rating: ClientRating,
        review: Option<&str>,
    ) -> Result<RatingOutcome, CaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<RatingOutcome, CaseError> = async {
            let case = fetch_case(&conn, case_id).await?;
            rating::check_ratable(case.as_ref(), client_id, case_id)?;

            let changed = conn
                .execute(
                    "UPDATE cases SET client_rating = ?2, client_review = ?3, updated_at = ?4 \
                     WHERE id = ?1 AND client_rating IS NULL",
                    params![
                        case_id.to_string(),
                        i64::from(rating.value()),
                        opt_text(review.map(str::trim).filter(|r| !r.is_empty())),
                        fmt_ts(&Utc::now()),
                    ],
                )
                .await?;
            if changed == 0 {
                return Err(CaseError::Validation("case already rated".to_string()));
            }

            let lawyer_id = case.as_ref().and_then(|c| c.lawyer_id);
            let mut lawyer_change = None;
            if let Some(lawyer_id) = lawyer_id {
                let row = conn
                    .query(
                        "SELECT rating, rating_count FROM lawyer_profiles WHERE user_id = ?1",
                        params![lawyer_id.to_string()],
                    )
                    .await?
                    .next()
                    .await?;
                if let Some(row) = row {
                    let current = parse_decimal(&get_text(&row, 0), "rating")?;
                    let count = get_i32(&row, 1, "rating_count")?;
                    let change = rating::apply_rating(lawyer_id, current, count, rating);
                    conn.execute(
                        "UPDATE lawyer_profiles SET rating = ?2, rating_count = ?3 WHERE user_id = ?1",
                        params![
                            lawyer_id.to_string(),
                            change.rating.to_string(),
                            i64::from(change.count),
                        ],
                    )
                    .await?;
                    lawyer_change = Some(change);
                }
            }

            let case = fetch_case(&conn, case_id)
                .await?
                .ok_or_else(|| CaseError::not_found("case", case_id))?;
            Ok(RatingOutcome {
                case,
                lawyer: lawyer_change,
            })
        }
        .await;
        finish_tx(&conn, result).await
    }

    async fn update_case_details(
        &self,
        case_id: Uuid,
        actor: &Actor,
        input: &UpdateCaseDetailsParams,
    ) -> Result<CaseRecord, CaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result: Result<CaseRecord, CaseError> = async {
            let mut case = fetch_case(&conn, case_id)
                .await?
                .ok_or_else(|| CaseError::not_found("case", case_id))?;
            status::authorize_case_actor(&case, actor)?;

            if let Some(date) = input.next_hearing_date {
                case.next_hearing_date = date;
            }
            if let Some(ref notes) = input.notes {
                case.notes = notes.clone();
            }
            conn.execute(
                "UPDATE cases SET next_hearing_date = ?2, notes = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    case_id.to_string(),
                    opt_text(case.next_hearing_date.map(|d| fmt_date(&d)).as_deref()),
                    opt_text(case.notes.as_deref()),
                    fmt_ts(&Utc::now()),
                ],
            )
            .await?;

            fetch_case(&conn, case_id)
                .await?
                .ok_or_else(|| CaseError::not_found("case", case_id))
        }
        .await;
        finish_tx(&conn, result).await
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        fetch_case(&conn, id).await
    }

    async fn get_case_for_intake(
        &self,
        intake_id: Uuid,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE intake_id = ?1"),
                params![intake_id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_case(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_cases_for_lawyer(
        &self,
        lawyer_id: Uuid,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases WHERE lawyer_id = ?1 \
                     ORDER BY updated_at DESC, rowid DESC"
                ),
                params![lawyer_id.to_string()],
            )
            .await?;
        collect_cases(rows).await
    }

    async fn list_cases_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases WHERE client_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC"
                ),
                params![client_id.to_string()],
            )
            .await?;
        collect_cases(rows).await
    }

    async fn list_all_cases(&self) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases ORDER BY created_at DESC, rowid DESC"),
                (),
            )
            .await?;
        collect_cases(rows).await
    }

    async fn list_queued_cases(
        &self,
        case_type: Option<CaseType>,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE status = 'queued' AND (?1 IS NULL OR case_type = ?1) \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![opt_text(case_type.map(CaseType::as_str))],
            )
            .await?;
        collect_cases(rows).await
    }

    async fn list_hearings_between(
        &self,
        scope: HearingScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let (filter, owner) = match scope {
            HearingScope::Lawyer(id) => ("AND lawyer_id = ?3", Some(id)),
            HearingScope::Client(id) => ("AND client_id = ?3", Some(id)),
            HearingScope::All => ("AND ?3 IS NULL", None),
        };
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases \
                     WHERE next_hearing_date IS NOT NULL \
                       AND next_hearing_date >= ?1 AND next_hearing_date <= ?2 {filter} \
                     ORDER BY next_hearing_date ASC, rowid ASC"
                ),
                params![fmt_date(&from), fmt_date(&to), opt_uuid(owner)],
            )
            .await?;
        collect_cases(rows).await
    }
}
