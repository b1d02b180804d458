//! Client feedback on closed cases and the lawyer running average.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{CaseRecord, CaseStatus, LawyerRatingChange};
use crate::error::CaseError;

/// A star rating, 1 through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i32")]
pub struct ClientRating(u8);

impl ClientRating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self, CaseError> {
        match u8::try_from(value) {
            Ok(v) if (Self::MIN..=Self::MAX).contains(&v) => Ok(Self(v)),
            _ => Err(CaseError::Validation(format!(
                "rating must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            ))),
        }
    }

    pub fn value(self) -> i32 {
        i32::from(self.0)
    }
}

impl TryFrom<i64> for ClientRating {
    type Error = CaseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClientRating> for i32 {
    fn from(rating: ClientRating) -> Self {
        rating.value()
    }
}

/// Rating preconditions, checked against the locked case row.
pub fn check_ratable(case: Option<&CaseRecord>, client_id: Uuid, case_id: Uuid) -> Result<(), CaseError> {
    let case = match case {
        Some(case) if case.client_id == client_id => case,
        _ => return Err(CaseError::not_found("case", case_id)),
    };
    if case.status != CaseStatus::Closed {
        return Err(CaseError::Validation(
            "case must be closed before it can be rated".to_string(),
        ));
    }
    if case.client_rating.is_some() {
        return Err(CaseError::Validation("case already rated".to_string()));
    }
    Ok(())
}

/// Fold one more rating into a running average, rounded to two decimals.
pub fn next_average(current: Decimal, count: i32, rating: ClientRating) -> Decimal {
    let count = Decimal::from(count.max(0));
    let total = current * count + Decimal::from(rating.value());
    (total / (count + Decimal::ONE)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn apply_rating(
    lawyer_id: Uuid,
    current: Decimal,
    count: i32,
    rating: ClientRating,
) -> LawyerRatingChange {
    LawyerRatingChange {
        lawyer_id,
        previous_rating: current,
        rating: next_average(current, count, rating),
        previous_count: count,
        count: count.max(0) + 1,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::CaseType;

    fn rating(v: i64) -> ClientRating {
        ClientRating::new(v).expect("valid rating")
    }

    #[test]
    fn rating_bounds() {
        assert!(ClientRating::new(0).is_err());
        assert!(ClientRating::new(6).is_err());
        assert!(ClientRating::new(-1).is_err());
        assert_eq!(rating(1).value(), 1);
        assert_eq!(rating(5).value(), 5);
    }

    #[test]
    fn running_average_matches_reference_sequence() {
        let first = next_average(Decimal::ZERO, 0, rating(4));
        assert_eq!(first, dec!(4.00));
        let second = next_average(first, 1, rating(2));
        assert_eq!(second, dec!(3.00));
    }

    #[test]
    fn average_rounds_to_two_places() {
        // (5 + 5 + 4) / 3 = 4.666...
        let avg = next_average(dec!(5), 2, rating(4));
        assert_eq!(avg, dec!(4.67));
        // (4.67 * 3 + 1) / 4 = 3.7525
        assert_eq!(next_average(avg, 3, rating(1)), dec!(3.75));
    }

    #[test]
    fn apply_rating_reports_before_and_after() {
        let lawyer = Uuid::new_v4();
        let change = apply_rating(lawyer, dec!(3.00), 2, rating(5));
        assert_eq!(change.previous_rating, dec!(3.00));
        assert_eq!(change.rating, dec!(3.67));
        assert_eq!(change.previous_count, 2);
        assert_eq!(change.count, 3);
    }

    fn closed_case(client_id: Uuid) -> CaseRecord {
        CaseRecord {
            id: Uuid::new_v4(),
            intake_id: Uuid::new_v4(),
            client_id,
            lawyer_id: Some(Uuid::new_v4()),
            case_number: "CAS-2026-000042".to_string(),
            status: CaseStatus::Closed,
            case_type: CaseType::Family,
            next_hearing_date: None,
            notes: None,
            client_rating: None,
            client_review: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ratable_preconditions_are_distinct_failures() {
        let client = Uuid::new_v4();
        let mut case = closed_case(client);
        assert!(check_ratable(Some(&case), client, case.id).is_ok());

        let err = check_ratable(Some(&case), Uuid::new_v4(), case.id).expect_err("not owner");
        assert!(matches!(err, CaseError::NotFound { .. }));
        let err = check_ratable(None, client, case.id).expect_err("missing");
        assert!(matches!(err, CaseError::NotFound { .. }));

        case.status = CaseStatus::InProgress;
        let err = check_ratable(Some(&case), client, case.id).expect_err("not closed");
        assert!(matches!(err, CaseError::Validation(_)));

        case.status = CaseStatus::Closed;
        case.client_rating = Some(4);
        let err = check_ratable(Some(&case), client, case.id).expect_err("already rated");
        let CaseError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("already rated"));
    }
}
