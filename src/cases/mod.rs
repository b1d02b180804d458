//! Case assignment, queueing, lifecycle, and feedback.
//!
//! [`CaseWorkflow`] is the entry point callers use. It runs each mutation
//! through the database (one transaction per operation) and then issues the
//! follow-up actions explicitly: audit notification and, when a lawyer gained
//! room, a queue drain whose failures never reach the caller.

pub mod allocator;
pub mod audit;
pub mod hearings;
pub mod intake;
pub mod number;
pub mod policy;
pub mod queue;
pub mod rating;
pub mod status;

use std::collections::BTreeSet;
use std::sync::Arc;

use uuid::Uuid;

pub use allocator::CaseAllocator;
pub use audit::{AuditSink, CaseEvent, JsonlAuditLog, MemoryAudit, NoopAudit};
pub use hearings::HearingCalendar;
pub use intake::{DocumentUpload, IntakeLifecycle, ResubmitIntakeParams, SubmitIntakeParams};
pub use number::CaseNumberGenerator;
pub use policy::AssignmentPolicy;
pub use queue::QueueDrainer;
pub use rating::ClientRating;
pub use status::Actor;

use crate::config::{AssignmentConfig, Config};
use crate::db::{
    AccountStatus, CaseRecord, CaseStatus, CaseType, CreateUserParams, Database, LawyerRecord,
    RoleProfile, UpdateCaseDetailsParams, UserRecord, UserRole,
};
use crate::error::CaseError;

pub struct CaseWorkflow {
    db: Arc<dyn Database>,
    policy: AssignmentPolicy,
    allocator: Arc<CaseAllocator>,
    drainer: QueueDrainer,
    intakes: IntakeLifecycle,
    hearings: HearingCalendar,
    audit: Arc<dyn AuditSink>,
}

impl CaseWorkflow {
    pub fn new(
        db: Arc<dyn Database>,
        assignment: &AssignmentConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let policy = AssignmentPolicy::from_config(assignment);
        let allocator = Arc::new(CaseAllocator::new(
            Arc::clone(&db),
            CaseNumberGenerator::new(assignment.case_number_prefix.clone()),
            policy,
            Arc::clone(&audit),
        ));
        Self {
            drainer: QueueDrainer::new(Arc::clone(&db), policy, Arc::clone(&audit)),
            intakes: IntakeLifecycle::new(Arc::clone(&db), Arc::clone(&allocator), Arc::clone(&audit)),
            hearings: HearingCalendar::new(Arc::clone(&db), assignment.hearing_window_days),
            db,
            policy,
            allocator,
            audit,
        }
    }

    /// Build from resolved configuration, including the configured audit sink.
    pub fn from_config(db: Arc<dyn Database>, config: &Config) -> Self {
        Self::new(db, &config.assignment, audit::sink_from_config(&config.audit))
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn policy(&self) -> AssignmentPolicy {
        self.policy
    }

    pub fn allocator(&self) -> &CaseAllocator {
        &self.allocator
    }

    pub fn drainer(&self) -> &QueueDrainer {
        &self.drainer
    }

    pub fn intakes(&self) -> &IntakeLifecycle {
        &self.intakes
    }

    pub fn hearings(&self) -> &HearingCalendar {
        &self.hearings
    }

    // ==================== Users ====================

    /// Create a user with its role profile. Lawyer load and rating always
    /// start at zero regardless of what the caller passed.
    pub async fn create_user(&self, mut params: CreateUserParams) -> Result<UserRecord, CaseError> {
        params.email = params.email.trim().to_ascii_lowercase();
        if !params.email.contains('@') {
            return Err(CaseError::Validation(format!(
                "invalid email address '{}'",
                params.email
            )));
        }
        if params.profile.name().trim().is_empty() {
            return Err(CaseError::Validation("name is required".to_string()));
        }
        if let RoleProfile::Lawyer(ref mut lawyer) = params.profile {
            if lawyer.experience_years < 0 {
                return Err(CaseError::Validation(
                    "experience years cannot be negative".to_string(),
                ));
            }
            lawyer.active_case_count = 0;
            lawyer.rating = rust_decimal::Decimal::ZERO;
            lawyer.rating_count = 0;
        }

        let user = self.db.create_user(&params).await?;
        self.audit.record(&CaseEvent::UserCreated {
            user_id: user.id,
            role: user.role(),
        });
        Ok(user)
    }

    /// Change an account's status. A lawyer coming back to ACTIVE picks up
    /// queued work for their free slots.
    pub async fn set_account_status(
        &self,
        user_id: Uuid,
        status: AccountStatus,
    ) -> Result<UserRecord, CaseError> {
        if !self.db.set_account_status(user_id, status).await? {
            return Err(CaseError::not_found("user", user_id));
        }
        self.audit.record(&CaseEvent::AccountStatusChanged { user_id, status });

        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or_else(|| CaseError::not_found("user", user_id))?;
        if user.role() == UserRole::Lawyer && status == AccountStatus::Active {
            self.drainer.drain_free_slots(user_id).await;
        }
        Ok(user)
    }

    // ==================== Lawyers ====================

    /// Replace a lawyer's specializations, then let them pick up matching
    /// queued cases, one claim per free slot.
    pub async fn update_specializations(
        &self,
        lawyer_id: Uuid,
        specializations: BTreeSet<CaseType>,
    ) -> Result<LawyerRecord, CaseError> {
        self.db
            .update_specializations(lawyer_id, &specializations)
            .await?
            .ok_or_else(|| CaseError::not_found("lawyer", lawyer_id))?;
        self.audit.record(&CaseEvent::SpecializationsUpdated {
            lawyer_id,
            specializations,
        });

        self.drainer.drain_free_slots(lawyer_id).await;

        self.db
            .get_lawyer(lawyer_id)
            .await?
            .ok_or_else(|| CaseError::not_found("lawyer", lawyer_id))
    }

    // ==================== Cases ====================

    /// Generate (or retry generating) the case for an approved intake.
    pub async fn generate_case(&self, intake_id: Uuid) -> Result<CaseRecord, CaseError> {
        let intake = self
            .db
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| CaseError::not_found("intake", intake_id))?;
        self.allocator.generate_case(&intake).await
    }

    /// Move a case to `new_status` on behalf of `actor_id`.
    ///
    /// Closing a case frees a slot for its lawyer; the queue is drained for
    /// that lawyer after the change commits.
    pub async fn update_status(
        &self,
        case_id: Uuid,
        new_status: CaseStatus,
        actor_id: Uuid,
        actor_role: UserRole,
    ) -> Result<CaseRecord, CaseError> {
        let actor = Actor::new(actor_id, actor_role);
        let change = self
            .db
            .transition_case_status(case_id, new_status, &actor)
            .await?;

        if change.previous != change.case.status {
            self.audit.record(&CaseEvent::CaseStatusChanged {
                case_id,
                actor_id,
                from: change.previous,
                to: change.case.status,
                load_delta: change.load_delta,
            });
        }

        if let Some(lawyer_id) = change.released_lawyer() {
            self.drainer.process_queue_for_lawyer(lawyer_id).await;
        }
        Ok(change.case)
    }

    /// Record the client's rating of a closed case and fold it into the
    /// lawyer's average.
    pub async fn rate_lawyer(
        &self,
        client_id: Uuid,
        case_id: Uuid,
        rating: i64,
        review: Option<&str>,
    ) -> Result<CaseRecord, CaseError> {
        let rating = ClientRating::new(rating)?;
        let outcome = self.db.rate_case(client_id, case_id, rating, review).await?;

        if let Some(ref change) = outcome.lawyer {
            tracing::debug!(
                lawyer_id = %change.lawyer_id,
                rating = %change.rating,
                count = change.count,
                "Lawyer rating updated"
            );
        }
        self.audit.record(&CaseEvent::CaseRated {
            case_id,
            client_id,
            rating: rating.value(),
            lawyer: outcome.lawyer,
        });
        Ok(outcome.case)
    }

    /// Set the next hearing date and/or notes. Assigned lawyer or admin only.
    pub async fn update_case_details(
        &self,
        case_id: Uuid,
        actor: &Actor,
        params: &UpdateCaseDetailsParams,
    ) -> Result<CaseRecord, CaseError> {
        let case = self.db.update_case_details(case_id, actor, params).await?;
        self.audit.record(&CaseEvent::CaseDetailsUpdated {
            case_id,
            actor_id: actor.user_id,
        });
        Ok(case)
    }

    pub async fn upcoming_hearings(&self, actor: &Actor) -> Result<Vec<CaseRecord>, CaseError> {
        self.hearings.upcoming(actor).await
    }

    /// Cases visible to `actor`: their own as lawyer or client, the waiting
    /// queue for staff, every case for admins.
    pub async fn cases_for(&self, actor: &Actor) -> Result<Vec<CaseRecord>, CaseError> {
        let cases = match actor.role {
            UserRole::Lawyer => self.db.list_cases_for_lawyer(actor.user_id).await?,
            UserRole::Client => self.db.list_cases_for_client(actor.user_id).await?,
            UserRole::Staff => self.db.list_queued_cases(None).await?,
            UserRole::Admin => self.db.list_all_cases().await?,
        };
        Ok(cases)
    }
}
