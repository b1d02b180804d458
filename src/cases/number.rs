//! Human-readable case numbers: `<PREFIX>-<year>-<6 digits>`.
//!
//! The suffix is the tail of a millisecond clock that never repeats within a
//! process, so deleted rows can never cause a number to be reissued the way a
//! row count would.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Datelike, Utc};

const SUFFIX_MODULUS: i64 = 1_000_000;

#[derive(Debug)]
pub struct CaseNumberGenerator {
    prefix: String,
    last_issued_ms: AtomicI64,
}

impl Default for CaseNumberGenerator {
    fn default() -> Self {
        Self::new("CAS")
    }
}

impl CaseNumberGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last_issued_ms: AtomicI64::new(0),
        }
    }

    pub fn next(&self) -> String {
        self.next_at(Utc::now())
    }

    pub fn next_at(&self, now: DateTime<Utc>) -> String {
        let now_ms = now.timestamp_millis();
        let issued = match self
            .last_issued_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            }) {
            Ok(last) | Err(last) => now_ms.max(last + 1),
        };
        format!(
            "{}-{}-{:06}",
            self.prefix,
            now.year(),
            issued.rem_euclid(SUFFIX_MODULUS)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;
    use regex::Regex;

    use super::*;

    #[test]
    fn format_is_prefix_year_six_digits() {
        let generator = CaseNumberGenerator::default();
        let number = generator.next();
        let pattern = Regex::new(r"^CAS-\d{4}-\d{6}$").expect("regex");
        assert!(pattern.is_match(&number), "unexpected number {number}");
    }

    #[test]
    fn suffix_is_timestamp_tail() {
        let generator = CaseNumberGenerator::new("CIV");
        let now = Utc.timestamp_millis_opt(1_767_225_600_123).single().expect("ts");
        assert_eq!(generator.next_at(now), "CIV-2026-600123");
    }

    #[test]
    fn same_millisecond_never_repeats() {
        let generator = CaseNumberGenerator::default();
        let now = Utc.timestamp_millis_opt(1_767_225_600_999).single().expect("ts");
        let numbers: HashSet<String> = (0..100).map(|_| generator.next_at(now)).collect();
        assert_eq!(numbers.len(), 100);
    }
}
