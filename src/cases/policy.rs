//! Lawyer and staff selection rules.
//!
//! Everything here is pure: backends load candidates inside their
//! transaction, call into this module, and write back the outcome.

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::AssignmentConfig;
use crate::db::{AccountStatus, CaseType, LawyerProfile, LawyerRecord};

pub const DEFAULT_CAPACITY_LIMIT: u32 = 5;

/// Capacity and specialization matching for case assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentPolicy {
    capacity_limit: i32,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_LIMIT)
    }
}

impl AssignmentPolicy {
    pub fn new(capacity_limit: u32) -> Self {
        Self {
            capacity_limit: i32::try_from(capacity_limit).unwrap_or(i32::MAX),
        }
    }

    pub fn from_config(config: &AssignmentConfig) -> Self {
        Self::new(config.capacity_limit)
    }

    pub fn capacity_limit(&self) -> i32 {
        self.capacity_limit
    }

    pub fn has_room(&self, profile: &LawyerProfile) -> bool {
        profile.active_case_count < self.capacity_limit
    }

    /// Slots left before auto-assignment stops. Over-limit loads count as zero.
    pub fn free_slots(&self, profile: &LawyerProfile) -> u32 {
        u32::try_from(self.capacity_limit - profile.active_case_count).unwrap_or(0)
    }

    pub fn is_eligible(&self, lawyer: &LawyerRecord, case_type: CaseType) -> bool {
        lawyer.status == AccountStatus::Active
            && self.has_room(&lawyer.profile)
            && lawyer.profile.handles(case_type)
    }

    /// Whether a queue drain for this lawyer could claim anything at all.
    pub fn can_take_queued_work(&self, lawyer: &LawyerRecord) -> bool {
        lawyer.status == AccountStatus::Active
            && self.has_room(&lawyer.profile)
            && !lawyer.profile.specializations.is_empty()
    }

    /// Eligible lawyers, least loaded first. Equal loads keep input order.
    pub fn rank<'a>(&self, lawyers: &'a [LawyerRecord], case_type: CaseType) -> Vec<&'a LawyerRecord> {
        let mut candidates: Vec<&LawyerRecord> = lawyers
            .iter()
            .filter(|lawyer| self.is_eligible(lawyer, case_type))
            .collect();
        candidates.sort_by_key(|lawyer| lawyer.profile.active_case_count);
        candidates
    }

    pub fn select<'a>(
        &self,
        lawyers: &'a [LawyerRecord],
        case_type: CaseType,
    ) -> Option<&'a LawyerRecord> {
        self.rank(lawyers, case_type).into_iter().next()
    }
}

/// Pick the staff member with the fewest pending intakes. Ties go to the
/// earlier entry in `staff`; an empty list leaves the intake in the pool.
pub fn least_loaded_staff(staff: &[Uuid], pending: &HashMap<Uuid, i64>) -> Option<Uuid> {
    let mut best: Option<(Uuid, i64)> = None;
    for id in staff {
        let load = pending.get(id).copied().unwrap_or(0);
        match best {
            Some((_, best_load)) if best_load <= load => {}
            _ => best = Some((*id, load)),
        }
    }
    best.map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lawyer(load: i32, specs: &[CaseType]) -> LawyerRecord {
        let mut profile = LawyerProfile::new("lawyer", specs.iter().copied());
        profile.active_case_count = load;
        LawyerRecord {
            user_id: Uuid::new_v4(),
            status: AccountStatus::Active,
            profile,
        }
    }

    #[test]
    fn selects_least_loaded_specialist() {
        let lawyers = vec![
            lawyer(2, &[CaseType::Civil]),
            lawyer(0, &[CaseType::Civil, CaseType::Family]),
        ];
        let picked = AssignmentPolicy::default()
            .select(&lawyers, CaseType::Civil)
            .expect("candidate");
        assert_eq!(picked.user_id, lawyers[1].user_id);
    }

    #[test]
    fn equal_loads_keep_registration_order() {
        let lawyers = vec![
            lawyer(1, &[CaseType::Property]),
            lawyer(1, &[CaseType::Property]),
            lawyer(1, &[CaseType::Property]),
        ];
        let ranked = AssignmentPolicy::default().rank(&lawyers, CaseType::Property);
        let ids: Vec<Uuid> = ranked.iter().map(|l| l.user_id).collect();
        let expected: Vec<Uuid> = lawyers.iter().map(|l| l.user_id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn full_or_over_limit_lawyers_are_skipped() {
        let lawyers = vec![lawyer(5, &[CaseType::Criminal]), lawyer(7, &[CaseType::Criminal])];
        assert!(
            AssignmentPolicy::default()
                .select(&lawyers, CaseType::Criminal)
                .is_none()
        );
    }

    #[test]
    fn non_specialists_and_inactive_accounts_are_skipped() {
        let mut inactive = lawyer(0, &[CaseType::Corporate]);
        inactive.status = AccountStatus::Inactive;
        let lawyers = vec![inactive, lawyer(0, &[CaseType::Civil])];
        assert!(
            AssignmentPolicy::default()
                .select(&lawyers, CaseType::Corporate)
                .is_none()
        );
    }

    #[test]
    fn free_slots_never_underflow() {
        let policy = AssignmentPolicy::new(5);
        assert_eq!(policy.free_slots(&lawyer(2, &[]).profile), 3);
        assert_eq!(policy.free_slots(&lawyer(9, &[]).profile), 0);
    }

    #[test]
    fn queued_work_needs_room_and_specializations() {
        let policy = AssignmentPolicy::default();
        assert!(policy.can_take_queued_work(&lawyer(4, &[CaseType::Family])));
        assert!(!policy.can_take_queued_work(&lawyer(5, &[CaseType::Family])));
        assert!(!policy.can_take_queued_work(&lawyer(0, &[])));
    }

    #[test]
    fn least_loaded_staff_prefers_lowest_then_first() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let pending = HashMap::from([(a, 3), (b, 1)]);
        // c has no pending intakes at all.
        assert_eq!(least_loaded_staff(&[a, b, c], &pending), Some(c));
        assert_eq!(least_loaded_staff(&[a, b], &pending), Some(b));

        let tied = HashMap::from([(a, 2), (b, 2)]);
        assert_eq!(least_loaded_staff(&[a, b], &tied), Some(a));
        assert_eq!(least_loaded_staff(&[], &tied), None);
    }
}
