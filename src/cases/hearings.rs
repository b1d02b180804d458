//! Upcoming hearing lookups.

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};

use crate::cases::status::Actor;
use crate::db::{CaseRecord, Database, HearingScope, UserRole};
use crate::error::CaseError;

/// Lawyers and clients see their own cases, staff and admins see everything.
pub fn scope_for(actor: &Actor) -> HearingScope {
    match actor.role {
        UserRole::Lawyer => HearingScope::Lawyer(actor.user_id),
        UserRole::Client => HearingScope::Client(actor.user_id),
        UserRole::Staff | UserRole::Admin => HearingScope::All,
    }
}

/// Inclusive `[today, today + days]`.
pub fn window(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let end = today
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX);
    (today, end)
}

pub struct HearingCalendar {
    db: Arc<dyn Database>,
    window_days: u32,
}

impl HearingCalendar {
    pub fn new(db: Arc<dyn Database>, window_days: u32) -> Self {
        Self { db, window_days }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Hearings in the configured window starting today (UTC).
    pub async fn upcoming(&self, actor: &Actor) -> Result<Vec<CaseRecord>, CaseError> {
        self.upcoming_from(actor, Utc::now().date_naive(), self.window_days)
            .await
    }

    pub async fn upcoming_from(
        &self,
        actor: &Actor,
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<CaseRecord>, CaseError> {
        let (from, to) = window(today, days);
        Ok(self
            .db
            .list_hearings_between(scope_for(actor), from, to)
            .await?)
    }
}
