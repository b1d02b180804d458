//! Case status state machine.
//!
//! ```text
//! QUEUED      -> OPEN, CLOSED
//! OPEN        -> IN_PROGRESS, ON_HOLD, CLOSED
//! IN_PROGRESS -> ON_HOLD, CLOSED, OPEN
//! ON_HOLD     -> IN_PROGRESS, CLOSED, OPEN
//! CLOSED      -> OPEN
//! ```
//!
//! Only the assigned lawyer or an admin may move a case. Admins are not bound
//! by the table, but nobody can send a case back to QUEUED: the queue only
//! holds cases that were never assigned. Setting the current status again is
//! always accepted.
//!
//! An admin moving a QUEUED case to OPEN leaves it OPEN with no lawyer. That
//! takes it out of the queue on purpose: drains only claim QUEUED cases, so
//! the admin owns assigning it from there.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CaseRecord, CaseStatus, UserRole};
use crate::error::CaseError;

/// The user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Statuses reachable from `from` without admin override.
pub fn allowed_transitions(from: CaseStatus) -> &'static [CaseStatus] {
    use CaseStatus::*;
    match from {
        Queued => &[Open, Closed],
        Open => &[InProgress, OnHold, Closed],
        InProgress => &[OnHold, Closed, Open],
        OnHold => &[InProgress, Closed, Open],
        Closed => &[Open],
    }
}

pub fn is_allowed(from: CaseStatus, to: CaseStatus) -> bool {
    from == to || allowed_transitions(from).contains(&to)
}

/// Whether an assigned case in `status` occupies a slot of the lawyer's capacity.
fn holds_capacity(status: CaseStatus) -> bool {
    status != CaseStatus::Closed
}

/// A validated transition and its effect on the assigned lawyer's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: CaseStatus,
    pub to: CaseStatus,
    pub lawyer_id: Option<Uuid>,
    pub load_delta: i32,
}

/// Only the assignee (as a lawyer) or an admin may act on a case.
pub fn authorize_case_actor(case: &CaseRecord, actor: &Actor) -> Result<(), CaseError> {
    match actor.role {
        UserRole::Admin => Ok(()),
        UserRole::Lawyer if case.lawyer_id == Some(actor.user_id) => Ok(()),
        UserRole::Lawyer => Err(CaseError::Authorization(
            "you are not the assigned lawyer for this case".to_string(),
        )),
        UserRole::Client => Err(CaseError::Authorization(
            "clients cannot change case status".to_string(),
        )),
        UserRole::Staff => Err(CaseError::Authorization(
            "only the assigned lawyer or an admin may change a case".to_string(),
        )),
    }
}

/// Check `actor` may move `case` to `to`, and work out the load change.
pub fn plan_transition(
    case: &CaseRecord,
    to: CaseStatus,
    actor: &Actor,
) -> Result<TransitionPlan, CaseError> {
    authorize_case_actor(case, actor)?;

    let from = case.status;
    if to == CaseStatus::Queued && from != CaseStatus::Queued {
        return Err(CaseError::Validation(format!(
            "invalid transition from {} to queued",
            from.as_str()
        )));
    }
    if !actor.is_admin() && !is_allowed(from, to) {
        return Err(CaseError::Validation(format!(
            "invalid transition from {} to {}",
            from.as_str(),
            to.as_str()
        )));
    }

    let load_delta = match case.lawyer_id {
        Some(_) => i32::from(holds_capacity(to)) - i32::from(holds_capacity(from)),
        None => 0,
    };

    Ok(TransitionPlan {
        from,
        to,
        lawyer_id: case.lawyer_id,
        load_delta,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::CaseType;

    fn case_with(status: CaseStatus, lawyer_id: Option<Uuid>) -> CaseRecord {
        CaseRecord {
            id: Uuid::new_v4(),
            intake_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            lawyer_id,
            case_number: "CAS-2026-123456".to_string(),
            status,
            case_type: CaseType::Civil,
            next_hearing_date: None,
            notes: None,
            client_rating: None,
            client_review: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn assigned_lawyer_can_close_open_case() {
        let lawyer = Uuid::new_v4();
        let case = case_with(CaseStatus::Open, Some(lawyer));
        let plan = plan_transition(&case, CaseStatus::Closed, &Actor::new(lawyer, UserRole::Lawyer))
            .expect("allowed");
        assert_eq!(plan.load_delta, -1);
        assert_eq!(plan.lawyer_id, Some(lawyer));
    }

    #[test]
    fn other_lawyer_is_not_authorized() {
        let case = case_with(CaseStatus::Open, Some(Uuid::new_v4()));
        let err = plan_transition(
            &case,
            CaseStatus::Closed,
            &Actor::new(Uuid::new_v4(), UserRole::Lawyer),
        )
        .expect_err("not the assignee");
        assert!(matches!(err, CaseError::Authorization(_)));
    }

    #[test]
    fn clients_and_staff_never_change_status() {
        let case = case_with(CaseStatus::Open, Some(Uuid::new_v4()));
        for role in [UserRole::Client, UserRole::Staff] {
            let err = plan_transition(&case, CaseStatus::OnHold, &Actor::new(case.client_id, role))
                .expect_err("forbidden");
            assert!(matches!(err, CaseError::Authorization(_)), "role {role:?}");
        }
    }

    #[test]
    fn transitions_outside_the_table_fail_validation() {
        let lawyer = Uuid::new_v4();
        let case = case_with(CaseStatus::Closed, Some(lawyer));
        let err = plan_transition(
            &case,
            CaseStatus::InProgress,
            &Actor::new(lawyer, UserRole::Lawyer),
        )
        .expect_err("closed cannot jump to in_progress");
        let CaseError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("invalid transition"), "unexpected: {message}");
    }

    #[test]
    fn admin_bypasses_the_table() {
        let lawyer = Uuid::new_v4();
        let case = case_with(CaseStatus::Closed, Some(lawyer));
        let plan = plan_transition(
            &case,
            CaseStatus::InProgress,
            &Actor::new(Uuid::new_v4(), UserRole::Admin),
        )
        .expect("admin override");
        assert_eq!(plan.load_delta, 1);
    }

    #[test]
    fn nobody_requeues_a_case() {
        let case = case_with(CaseStatus::Open, Some(Uuid::new_v4()));
        let err = plan_transition(
            &case,
            CaseStatus::Queued,
            &Actor::new(Uuid::new_v4(), UserRole::Admin),
        )
        .expect_err("admin cannot requeue");
        assert!(matches!(err, CaseError::Validation(_)));
    }

    #[test]
    fn same_status_is_always_allowed_and_load_neutral() {
        let lawyer = Uuid::new_v4();
        for status in [CaseStatus::Open, CaseStatus::OnHold, CaseStatus::Closed] {
            let case = case_with(status, Some(lawyer));
            let plan = plan_transition(&case, status, &Actor::new(lawyer, UserRole::Lawyer))
                .expect("no-op");
            assert_eq!(plan.load_delta, 0);
        }
    }

    #[test]
    fn moves_between_active_states_keep_load() {
        let lawyer = Uuid::new_v4();
        let case = case_with(CaseStatus::InProgress, Some(lawyer));
        let plan = plan_transition(&case, CaseStatus::OnHold, &Actor::new(lawyer, UserRole::Lawyer))
            .expect("allowed");
        assert_eq!(plan.load_delta, 0);
    }

    #[test]
    fn unassigned_cases_never_change_load() {
        let case = case_with(CaseStatus::Queued, None);
        let plan = plan_transition(
            &case,
            CaseStatus::Closed,
            &Actor::new(Uuid::new_v4(), UserRole::Admin),
        )
        .expect("admin closes queued case");
        assert_eq!(plan.load_delta, 0);
    }

    #[test]
    fn admin_opens_queued_case_without_a_lawyer() {
        let case = case_with(CaseStatus::Queued, None);
        let plan = plan_transition(
            &case,
            CaseStatus::Open,
            &Actor::new(Uuid::new_v4(), UserRole::Admin),
        )
        .expect("admin opens queued case");
        assert_eq!(plan.to, CaseStatus::Open);
        assert_eq!(plan.lawyer_id, None);
        assert_eq!(plan.load_delta, 0);
    }

    #[test]
    fn table_matches_reference_transitions() {
        use CaseStatus::*;
        assert!(is_allowed(Queued, Open));
        assert!(is_allowed(Queued, Closed));
        assert!(!is_allowed(Queued, InProgress));
        assert!(is_allowed(Open, OnHold));
        assert!(!is_allowed(Open, Queued));
        assert!(is_allowed(InProgress, Open));
        assert!(is_allowed(OnHold, InProgress));
        assert!(is_allowed(Closed, Open));
        assert!(!is_allowed(Closed, OnHold));
    }
}
