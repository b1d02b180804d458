//! Turns approved intakes into cases.

use std::sync::Arc;

use crate::cases::audit::{AuditSink, CaseEvent};
use crate::cases::number::CaseNumberGenerator;
use crate::cases::policy::AssignmentPolicy;
use crate::db::{CaseRecord, Database, IntakeRecord, IntakeStatus};
use crate::error::CaseError;

/// Creates the case for an approved intake and assigns it to the least loaded
/// eligible lawyer, or queues it when nobody qualifies.
pub struct CaseAllocator {
    db: Arc<dyn Database>,
    numbers: CaseNumberGenerator,
    policy: AssignmentPolicy,
    audit: Arc<dyn AuditSink>,
}

impl CaseAllocator {
    pub fn new(
        db: Arc<dyn Database>,
        numbers: CaseNumberGenerator,
        policy: AssignmentPolicy,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            db,
            numbers,
            policy,
            audit,
        }
    }

    /// Generate the case for `intake`.
    ///
    /// The case insert and the lawyer's load increment commit together; on any
    /// error nothing is written. A second call for the same intake fails with
    /// [`CaseError::Conflict`]. Failures are not retried here.
    pub async fn generate_case(&self, intake: &IntakeRecord) -> Result<CaseRecord, CaseError> {
        if intake.status != IntakeStatus::Approved {
            return Err(CaseError::Validation(
                "intake must be approved before a case can be generated".to_string(),
            ));
        }

        let case_number = self.numbers.next();
        let allocation = self
            .db
            .allocate_case(intake, &case_number, &self.policy)
            .await?;
        let case = allocation.case;

        match case.lawyer_id {
            Some(lawyer_id) => tracing::debug!(
                case_id = %case.id,
                %lawyer_id,
                load = ?allocation.lawyer_load,
                "Assigned new case"
            ),
            None => tracing::debug!(
                case_id = %case.id,
                case_type = case.case_type.as_str(),
                "No eligible lawyer, case queued"
            ),
        }

        self.audit.record(&CaseEvent::CaseCreated {
            case_id: case.id,
            intake_id: case.intake_id,
            case_number: case.case_number.clone(),
            lawyer_id: case.lawyer_id,
            status: case.status,
        });
        Ok(case)
    }
}
