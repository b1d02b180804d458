use std::collections::HashMap;

use async_trait::async_trait;
use libsql::params;
use uuid::Uuid;

use crate::db::{CaseType, IntakeDocument, IntakeRecord, IntakeStatus, IntakeStore};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_ts, get_i32, get_i64, get_opt_text, get_text, opt_text, opt_uuid,
    parse_timestamp, parse_uuid, parse_uuid_opt,
};

const INTAKE_COLUMNS: &str = "id, client_id, case_type, details, documents, documents_verified, \
     status, attempts, assigned_staff_id, rejection_reason, internal_notes, created_at, updated_at";

pub(super) fn parse_case_type(raw: &str) -> Result<CaseType, DatabaseError> {
    CaseType::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid case type '{}'", raw)))
}

fn parse_intake_status(raw: &str) -> Result<IntakeStatus, DatabaseError> {
    IntakeStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid intake status '{}'", raw)))
}

fn parse_details(raw: &str) -> Result<serde_json::Value, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn parse_documents(raw: &str) -> Result<Vec<IntakeDocument>, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn documents_to_json(documents: &[IntakeDocument]) -> Result<String, DatabaseError> {
    serde_json::to_string(documents).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_intake(row: &libsql::Row) -> Result<IntakeRecord, DatabaseError> {
    Ok(IntakeRecord {
        id: parse_uuid(&get_text(row, 0), "intake.id")?,
        client_id: parse_uuid(&get_text(row, 1), "intake.client_id")?,
        case_type: parse_case_type(&get_text(row, 2))?,
        details: parse_details(&get_text(row, 3))?,
        documents: parse_documents(&get_text(row, 4))?,
        documents_verified: get_i64(row, 5) != 0,
        status: parse_intake_status(&get_text(row, 6))?,
        attempts: get_i32(row, 7, "attempts")?,
        assigned_staff_id: parse_uuid_opt(get_opt_text(row, 8), "intake.assigned_staff_id")?,
        rejection_reason: get_opt_text(row, 9),
        internal_notes: get_text(row, 10),
        created_at: parse_timestamp(&get_text(row, 11))?,
        updated_at: parse_timestamp(&get_text(row, 12))?,
    })
}

async fn collect_intakes(mut rows: libsql::Rows) -> Result<Vec<IntakeRecord>, DatabaseError> {
    let mut intakes = Vec::new();
    while let Some(row) = rows.next().await? {
        intakes.push(row_to_intake(&row)?);
    }
    Ok(intakes)
}

#[async_trait]
impl IntakeStore for LibSqlBackend {
    async fn insert_intake(&self, intake: &IntakeRecord) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            &format!(
                "INSERT INTO intakes ({INTAKE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                intake.id.to_string(),
                intake.client_id.to_string(),
                intake.case_type.as_str(),
                intake.details.to_string(),
                documents_to_json(&intake.documents)?,
                i64::from(intake.documents_verified),
                intake.status.as_str(),
                i64::from(intake.attempts),
                opt_uuid(intake.assigned_staff_id),
                opt_text(intake.rejection_reason.as_deref()),
                intake.internal_notes.as_str(),
                fmt_ts(&intake.created_at),
                fmt_ts(&intake.updated_at),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_intake(&self, id: Uuid) -> Result<Option<IntakeRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {INTAKE_COLUMNS} FROM intakes WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_intake(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_intakes_for_client(
        &self,
        client_id: Uuid,
    ) -> Result<Vec<IntakeRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {INTAKE_COLUMNS} FROM intakes WHERE client_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC"
                ),
                params![client_id.to_string()],
            )
            .await?;
        collect_intakes(rows).await
    }

    async fn list_pending_intakes(
        &self,
        staff_id: Option<Uuid>,
    ) -> Result<Vec<IntakeRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {INTAKE_COLUMNS} FROM intakes \
                     WHERE status = 'pending' \
                       AND (?1 IS NULL OR assigned_staff_id = ?1 OR assigned_staff_id IS NULL) \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![opt_uuid(staff_id)],
            )
            .await?;
        collect_intakes(rows).await
    }

    async fn pending_intake_load(&self) -> Result<HashMap<Uuid, i64>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT assigned_staff_id, COUNT(*) FROM intakes \
                 WHERE status = 'pending' AND assigned_staff_id IS NOT NULL \
                 GROUP BY assigned_staff_id",
                (),
            )
            .await?;
        let mut load = HashMap::new();
        while let Some(row) = rows.next().await? {
            let staff_id = parse_uuid(&get_text(&row, 0), "intake.assigned_staff_id")?;
            load.insert(staff_id, get_i64(&row, 1));
        }
        Ok(load)
    }

    async fn update_intake(
        &self,
        intake: &IntakeRecord,
        expected: IntakeStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                "UPDATE intakes SET \
                    case_type = ?3, details = ?4, documents = ?5, documents_verified = ?6, \
                    status = ?7, attempts = ?8, assigned_staff_id = ?9, rejection_reason = ?10, \
                    internal_notes = ?11, updated_at = ?12 \
                 WHERE id = ?1 AND status = ?2",
                params![
                    intake.id.to_string(),
                    expected.as_str(),
                    intake.case_type.as_str(),
                    intake.details.to_string(),
                    documents_to_json(&intake.documents)?,
                    i64::from(intake.documents_verified),
                    intake.status.as_str(),
                    i64::from(intake.attempts),
                    opt_uuid(intake.assigned_staff_id),
                    opt_text(intake.rejection_reason.as_deref()),
                    intake.internal_notes.as_str(),
                    fmt_ts(&intake.updated_at),
                ],
            )
            .await?;
        Ok(changed > 0)
    }
}
