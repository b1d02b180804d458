//! FCFS queue draining.
//!
//! Draining is a background correction: it runs after the action that freed
//! capacity has already committed, and its failures stay here.

use std::sync::Arc;

use uuid::Uuid;

use crate::cases::audit::{AuditSink, CaseEvent};
use crate::cases::policy::AssignmentPolicy;
use crate::db::{CaseRecord, Database};
use crate::error::CaseError;

pub struct QueueDrainer {
    db: Arc<dyn Database>,
    policy: AssignmentPolicy,
    audit: Arc<dyn AuditSink>,
}

impl QueueDrainer {
    pub fn new(db: Arc<dyn Database>, policy: AssignmentPolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, policy, audit }
    }

    /// Hand the oldest matching queued case to `lawyer_id`, if the lawyer has
    /// room. Claims at most one case and never returns an error.
    pub async fn process_queue_for_lawyer(&self, lawyer_id: Uuid) {
        match self.claim_next(lawyer_id).await {
            Ok(Some(case)) => {
                tracing::info!(
                    case_id = %case.id,
                    %lawyer_id,
                    case_number = %case.case_number,
                    "Assigned queued case"
                );
            }
            Ok(None) => {
                tracing::debug!(%lawyer_id, "No queued case for lawyer");
            }
            Err(e) => {
                tracing::warn!(%lawyer_id, error = %e, "Queue drain failed");
            }
        }
    }

    /// One claim attempt, with errors surfaced. Used by callers that want to
    /// know what happened (operator tooling, tests).
    pub async fn claim_next(&self, lawyer_id: Uuid) -> Result<Option<CaseRecord>, CaseError> {
        let claimed = self.db.claim_queued_case(lawyer_id, &self.policy).await?;
        if let Some(ref case) = claimed {
            self.audit.record(&CaseEvent::CaseClaimed {
                case_id: case.id,
                lawyer_id,
            });
        }
        Ok(claimed)
    }

    /// Claim repeatedly until the lawyer's free slots are used up or nothing
    /// matches. Returns the claimed cases. Stops quietly on the first error.
    pub async fn drain_free_slots(&self, lawyer_id: Uuid) -> Vec<CaseRecord> {
        let slots = match self.db.get_lawyer(lawyer_id).await {
            Ok(Some(lawyer)) => self.policy.free_slots(&lawyer.profile),
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(%lawyer_id, error = %e, "Queue drain failed");
                return Vec::new();
            }
        };

        let mut claimed = Vec::new();
        for _ in 0..slots {
            match self.claim_next(lawyer_id).await {
                Ok(Some(case)) => claimed.push(case),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(%lawyer_id, error = %e, "Queue drain failed");
                    break;
                }
            }
        }
        if !claimed.is_empty() {
            tracing::info!(%lawyer_id, count = claimed.len(), "Assigned queued cases");
        }
        claimed
    }
}
