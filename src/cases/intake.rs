//! Intake submission and staff review.
//!
//! ```text
//! PENDING --verify------------------> PENDING (documents_verified)
//! PENDING --approve-----------------> APPROVED      (case generated)
//! PENDING --reject_temporarily------> TEMP_REJECTED
//! PENDING --reject_permanently------> PERM_REJECTED (final)
//! PENDING --request_clarification---> CLARIFICATION_NEEDED
//! TEMP_REJECTED / CLARIFICATION_NEEDED --resubmit--> PENDING (attempts + 1)
//! ```
//!
//! Every status change is a compare-and-set against the status the decision
//! was made on, so two reviewers racing on one intake cannot both win.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cases::allocator::CaseAllocator;
use crate::cases::audit::{AuditSink, CaseEvent};
use crate::cases::policy::least_loaded_staff;
use crate::cases::status::Actor;
use crate::db::{
    AccountStatus, CaseRecord, CaseType, Database, DocumentVersion, IntakeDocument, IntakeRecord,
    IntakeStatus, UserRole,
};
use crate::error::CaseError;

/// One uploaded file, already stored elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SubmitIntakeParams {
    pub case_type: CaseType,
    pub details: serde_json::Value,
    pub documents: Vec<DocumentUpload>,
}

#[derive(Debug, Clone, Default)]
pub struct ResubmitIntakeParams {
    /// Replaces the stored details when present.
    pub details: Option<serde_json::Value>,
    pub documents: Vec<DocumentUpload>,
}

/// Fold `uploads` into `documents`. A name already present gets a new
/// version numbered after its existing ones; a new name starts at version 1.
pub fn merge_documents(
    documents: &mut Vec<IntakeDocument>,
    uploads: Vec<DocumentUpload>,
    uploaded_at: DateTime<Utc>,
) {
    for upload in uploads {
        let name = upload.name.trim().to_string();
        match documents.iter_mut().find(|doc| doc.name == name) {
            Some(doc) => {
                let version = u32::try_from(doc.versions.len() + 1).unwrap_or(u32::MAX);
                doc.versions.push(DocumentVersion {
                    version,
                    url: upload.url,
                    uploaded_at,
                });
            }
            None => documents.push(IntakeDocument {
                file_id: Uuid::new_v4(),
                name,
                versions: vec![DocumentVersion {
                    version: 1,
                    url: upload.url,
                    uploaded_at,
                }],
            }),
        }
    }
}

fn validate_uploads(uploads: &[DocumentUpload]) -> Result<(), CaseError> {
    for upload in uploads {
        if upload.name.trim().is_empty() {
            return Err(CaseError::Validation("document name is required".to_string()));
        }
        if upload.url.trim().is_empty() {
            return Err(CaseError::Validation(format!(
                "document '{}' has no url",
                upload.name.trim()
            )));
        }
    }
    Ok(())
}

fn require_reason(reason: &str) -> Result<String, CaseError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(CaseError::Validation("a reason is required".to_string()));
    }
    Ok(reason.to_string())
}

fn require_reviewer(actor: &Actor) -> Result<(), CaseError> {
    match actor.role {
        UserRole::Staff | UserRole::Admin => Ok(()),
        _ => Err(CaseError::Authorization(
            "only staff or admins may review intakes".to_string(),
        )),
    }
}

fn require_pending(intake: &IntakeRecord) -> Result<(), CaseError> {
    if intake.status != IntakeStatus::Pending {
        return Err(CaseError::Validation(format!(
            "intake is {}, only pending intakes can be reviewed",
            intake.status.as_str()
        )));
    }
    Ok(())
}

fn append_note(notes: &mut String, author: Uuid, text: &str, at: DateTime<Utc>) {
    if !notes.is_empty() && !notes.ends_with('\n') {
        notes.push('\n');
    }
    notes.push_str(&format!("[{}] {}: {}\n", at.to_rfc3339(), author, text));
}

/// Client submission and staff review of intakes.
pub struct IntakeLifecycle {
    db: Arc<dyn Database>,
    allocator: Arc<CaseAllocator>,
    audit: Arc<dyn AuditSink>,
}

impl IntakeLifecycle {
    pub fn new(
        db: Arc<dyn Database>,
        allocator: Arc<CaseAllocator>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            db,
            allocator,
            audit,
        }
    }

    async fn load(&self, intake_id: Uuid) -> Result<IntakeRecord, CaseError> {
        self.db
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| CaseError::not_found("intake", intake_id))
    }

    /// Persist `intake` if it is still in `expected`, otherwise report the race.
    async fn save(&self, intake: &IntakeRecord, expected: IntakeStatus) -> Result<(), CaseError> {
        if self.db.update_intake(intake, expected).await? {
            Ok(())
        } else {
            Err(CaseError::Conflict(format!(
                "intake {} was changed by someone else",
                intake.id
            )))
        }
    }

    /// File a new intake for `client_id` and route it to the least busy staff
    /// member. With no active staff it waits in the unassigned pool.
    pub async fn submit(
        &self,
        client_id: Uuid,
        params: SubmitIntakeParams,
    ) -> Result<IntakeRecord, CaseError> {
        let client = self
            .db
            .get_user(client_id)
            .await?
            .ok_or_else(|| CaseError::not_found("user", client_id))?;
        if client.role() != UserRole::Client {
            return Err(CaseError::Authorization(
                "only clients can submit intakes".to_string(),
            ));
        }
        if client.status != AccountStatus::Active {
            return Err(CaseError::Authorization("client account is not active".to_string()));
        }
        validate_uploads(&params.documents)?;

        let staff: Vec<Uuid> = self
            .db
            .list_users_by_role(UserRole::Staff, Some(AccountStatus::Active))
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();
        let pending = self.db.pending_intake_load().await?;
        let assigned_staff_id = least_loaded_staff(&staff, &pending);

        let now = Utc::now();
        let mut documents = Vec::new();
        merge_documents(&mut documents, params.documents, now);
        let intake = IntakeRecord {
            id: Uuid::new_v4(),
            client_id,
            case_type: params.case_type,
            details: params.details,
            documents,
            documents_verified: false,
            status: IntakeStatus::Pending,
            attempts: 1,
            assigned_staff_id,
            rejection_reason: None,
            internal_notes: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.db.insert_intake(&intake).await?;

        tracing::debug!(intake_id = %intake.id, staff_id = ?assigned_staff_id, "Intake submitted");
        self.audit.record(&CaseEvent::IntakeSubmitted {
            intake_id: intake.id,
            client_id,
            assigned_staff_id,
        });
        Ok(intake)
    }

    /// Pending intakes assigned to `staff_id` plus the unassigned pool.
    pub async fn pending_for_staff(&self, staff_id: Uuid) -> Result<Vec<IntakeRecord>, CaseError> {
        Ok(self.db.list_pending_intakes(Some(staff_id)).await?)
    }

    pub async fn for_client(&self, client_id: Uuid) -> Result<Vec<IntakeRecord>, CaseError> {
        Ok(self.db.list_intakes_for_client(client_id).await?)
    }

    /// Apply a review decision to a pending intake.
    async fn review<F>(
        &self,
        intake_id: Uuid,
        actor: &Actor,
        apply: F,
    ) -> Result<IntakeRecord, CaseError>
    where
        F: FnOnce(&mut IntakeRecord) -> Result<(), CaseError>,
    {
        require_reviewer(actor)?;
        let mut intake = self.load(intake_id).await?;
        require_pending(&intake)?;

        let from = intake.status;
        apply(&mut intake)?;
        if intake.assigned_staff_id.is_none() && actor.role == UserRole::Staff {
            intake.assigned_staff_id = Some(actor.user_id);
        }
        intake.updated_at = Utc::now();
        self.save(&intake, from).await?;

        if intake.status != from {
            self.audit.record(&CaseEvent::IntakeReviewed {
                intake_id,
                actor_id: actor.user_id,
                from,
                to: intake.status,
            });
        }
        Ok(intake)
    }

    pub async fn verify_documents(
        &self,
        intake_id: Uuid,
        actor: &Actor,
    ) -> Result<IntakeRecord, CaseError> {
        self.review(intake_id, actor, |intake| {
            intake.documents_verified = true;
            Ok(())
        })
        .await
    }

    /// Approve a verified intake and generate its case.
    ///
    /// The intake is marked APPROVED before the case is created. If case
    /// generation then fails the intake stays APPROVED, and approving it
    /// again retries generation. Approving an intake that already has its
    /// case returns that case.
    pub async fn approve(
        &self,
        intake_id: Uuid,
        actor: &Actor,
    ) -> Result<(IntakeRecord, CaseRecord), CaseError> {
        require_reviewer(actor)?;
        let current = self.load(intake_id).await?;
        if current.status == IntakeStatus::Approved {
            let case = match self.db.get_case_for_intake(intake_id).await? {
                Some(case) => case,
                None => self.allocator.generate_case(&current).await?,
            };
            return Ok((current, case));
        }

        let intake = self
            .review(intake_id, actor, |intake| {
                if !intake.documents_verified {
                    return Err(CaseError::Validation(
                        "documents must be verified before approval".to_string(),
                    ));
                }
                intake.status = IntakeStatus::Approved;
                intake.rejection_reason = None;
                Ok(())
            })
            .await?;
        let case = self.allocator.generate_case(&intake).await?;
        Ok((intake, case))
    }

    pub async fn reject_temporarily(
        &self,
        intake_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> Result<IntakeRecord, CaseError> {
        let reason = require_reason(reason)?;
        self.review(intake_id, actor, |intake| {
            intake.status = IntakeStatus::TempRejected;
            intake.rejection_reason = Some(reason);
            Ok(())
        })
        .await
    }

    pub async fn reject_permanently(
        &self,
        intake_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> Result<IntakeRecord, CaseError> {
        let reason = require_reason(reason)?;
        self.review(intake_id, actor, |intake| {
            intake.status = IntakeStatus::PermRejected;
            intake.rejection_reason = Some(reason);
            Ok(())
        })
        .await
    }

    pub async fn request_clarification(
        &self,
        intake_id: Uuid,
        actor: &Actor,
        question: &str,
    ) -> Result<IntakeRecord, CaseError> {
        let question = require_reason(question)?;
        self.review(intake_id, actor, |intake| {
            intake.status = IntakeStatus::ClarificationNeeded;
            intake.rejection_reason = Some(question);
            Ok(())
        })
        .await
    }

    /// Append a timestamped staff note. Notes are never edited or removed.
    pub async fn add_internal_note(
        &self,
        intake_id: Uuid,
        actor: &Actor,
        note: &str,
    ) -> Result<IntakeRecord, CaseError> {
        require_reviewer(actor)?;
        let note = note.trim();
        if note.is_empty() {
            return Err(CaseError::Validation("note cannot be empty".to_string()));
        }
        let mut intake = self.load(intake_id).await?;
        if matches!(
            intake.status,
            IntakeStatus::Approved | IntakeStatus::PermRejected
        ) {
            return Err(CaseError::Validation(format!(
                "intake is {} and can no longer be changed",
                intake.status.as_str()
            )));
        }

        let now = Utc::now();
        append_note(&mut intake.internal_notes, actor.user_id, note, now);
        intake.updated_at = now;
        self.save(&intake, intake.status).await?;
        Ok(intake)
    }

    /// Client resubmission after a temporary rejection or a clarification
    /// request.
    pub async fn resubmit(
        &self,
        intake_id: Uuid,
        client_id: Uuid,
        params: ResubmitIntakeParams,
    ) -> Result<IntakeRecord, CaseError> {
        let mut intake = self.load(intake_id).await?;
        if intake.client_id != client_id {
            return Err(CaseError::not_found("intake", intake_id));
        }
        let from = intake.status;
        match from {
            IntakeStatus::TempRejected | IntakeStatus::ClarificationNeeded => {}
            IntakeStatus::PermRejected => {
                return Err(CaseError::Validation(
                    "intake was permanently rejected and cannot be resubmitted".to_string(),
                ));
            }
            other => {
                return Err(CaseError::Validation(format!(
                    "intake is {} and cannot be resubmitted",
                    other.as_str()
                )));
            }
        }
        validate_uploads(&params.documents)?;

        let now = Utc::now();
        if let Some(details) = params.details {
            intake.details = details;
        }
        merge_documents(&mut intake.documents, params.documents, now);
        intake.attempts += 1;
        intake.status = IntakeStatus::Pending;
        intake.documents_verified = false;
        intake.rejection_reason = None;
        intake.updated_at = now;
        self.save(&intake, from).await?;

        self.audit.record(&CaseEvent::IntakeResubmitted {
            intake_id,
            attempts: intake.attempts,
        });
        Ok(intake)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn upload(name: &str, url: &str) -> DocumentUpload {
        DocumentUpload {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn merge_versions_existing_names_and_appends_new_ones() {
        let first = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("ts");
        let second = Utc.with_ymd_and_hms(2026, 3, 8, 9, 0, 0).single().expect("ts");

        let mut docs = Vec::new();
        merge_documents(
            &mut docs,
            vec![upload("id-proof", "s3://a/1"), upload("lease", "s3://a/2")],
            first,
        );
        let lease_id = docs[1].file_id;

        merge_documents(
            &mut docs,
            vec![upload("lease", "s3://a/3"), upload("photos", "s3://a/4")],
            second,
        );

        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["id-proof", "lease", "photos"]);
        assert_eq!(docs[1].file_id, lease_id);
        let versions: Vec<u32> = docs[1].versions.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(docs[1].versions[1].url, "s3://a/3");
        assert_eq!(docs[1].versions[1].uploaded_at, second);
        assert_eq!(docs[2].versions[0].version, 1);
    }

    #[test]
    fn uploads_need_name_and_url() {
        assert!(validate_uploads(&[upload("lease", "s3://x")]).is_ok());
        assert!(matches!(
            validate_uploads(&[upload("  ", "s3://x")]),
            Err(CaseError::Validation(_))
        ));
        assert!(matches!(
            validate_uploads(&[upload("lease", "")]),
            Err(CaseError::Validation(_))
        ));
    }

    #[test]
    fn notes_append_with_author_and_timestamp() {
        let author = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 12, 30, 0).single().expect("ts");
        let mut notes = String::new();
        append_note(&mut notes, author, "called client", at);
        append_note(&mut notes, author, "awaiting lease copy", at);

        let lines: Vec<&str> = notes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[2026-05-04T12:30:00+00:00]"));
        assert!(lines[1].ends_with("awaiting lease copy"));
        assert!(lines[0].contains(&author.to_string()));
    }

    #[test]
    fn only_staff_and_admins_review() {
        let id = Uuid::new_v4();
        assert!(require_reviewer(&Actor::new(id, UserRole::Staff)).is_ok());
        assert!(require_reviewer(&Actor::new(id, UserRole::Admin)).is_ok());
        assert!(matches!(
            require_reviewer(&Actor::new(id, UserRole::Lawyer)),
            Err(CaseError::Authorization(_))
        ));
        assert!(matches!(require_reason("   "), Err(CaseError::Validation(_))));
    }
}
