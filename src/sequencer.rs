use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Utc};
use sqlx::PgPool;

use crate::error::EngineError;

/// Human-readable daily ticket code: `YYYY-MMDD` for the first lead of the
/// day, then `YYYY-MMDD-01`, `-02`, ... Suffixes keep two-digit padding but
/// are unbounded past 99.
pub fn ticket_code(date: NaiveDate, suffix: u32) -> String {
    let base = format!("{:04}-{:02}{:02}", date.year(), date.month(), date.day());
    if suffix == 0 {
        base
    } else {
        format!("{base}-{suffix:02}")
    }
}

/// Probe suffixed variants in order until one is not taken. Codes are never
/// reused even if the lead that owned one is later deleted, so callers must
/// feed every code ever issued for the date.
pub fn next_code(date: NaiveDate, taken: &HashSet<String>) -> String {
    let mut suffix = 0;
    loop {
        let code = ticket_code(date, suffix);
        if !taken.contains(&code) {
            return code;
        }
        suffix += 1;
    }
}

/// Next unused ticket code for today, checked against persisted leads.
///
/// The probe alone is racy under concurrent lead creation: two requests in
/// the same instant can both see a code as free. The `leads.ticket_id`
/// UNIQUE constraint is the actual guarantee; `create_lead` retries the
/// sequence-then-insert step when the insert hits a unique violation.
pub async fn next_ticket_id(db: &PgPool) -> Result<String, EngineError> {
    let today = Utc::now().date_naive();
    let base = ticket_code(today, 0);
    let pattern = format!("{base}%");
    let existing: Vec<String> =
        sqlx::query_scalar("SELECT ticket_id FROM leads WHERE ticket_id LIKE $1")
            .bind(&pattern)
            .fetch_all(db)
            .await?;
    let taken: HashSet<String> = existing.into_iter().collect();
    Ok(next_code(today, &taken))
}

/// Postgres unique-violation check, used to retry ticket sequencing when two
/// concurrent creations race on the same daily suffix.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn base_code_is_zero_padded() {
        assert_eq!(ticket_code(day(2025, 3, 7), 0), "2025-0307");
        assert_eq!(ticket_code(day(2025, 11, 21), 0), "2025-1121");
    }

    #[test]
    fn suffixes_are_two_digit_padded_and_unbounded() {
        assert_eq!(ticket_code(day(2025, 3, 7), 1), "2025-0307-01");
        assert_eq!(ticket_code(day(2025, 3, 7), 42), "2025-0307-42");
        assert_eq!(ticket_code(day(2025, 3, 7), 100), "2025-0307-100");
    }

    #[test]
    fn first_lead_of_the_day_gets_the_bare_code() {
        assert_eq!(next_code(day(2025, 3, 7), &HashSet::new()), "2025-0307");
    }

    #[test]
    fn probe_skips_every_taken_code() {
        let mut taken = HashSet::new();
        taken.insert("2025-0307".to_string());
        assert_eq!(next_code(day(2025, 3, 7), &taken), "2025-0307-01");

        taken.insert("2025-0307-01".to_string());
        taken.insert("2025-0307-02".to_string());
        assert_eq!(next_code(day(2025, 3, 7), &taken), "2025-0307-03");
    }

    #[test]
    fn deleted_leads_do_not_free_their_code() {
        // the probe only sees what the caller feeds it; feeding every code
        // ever issued (not just live leads) means no reuse after deletion
        let mut issued = HashSet::new();
        issued.insert("2025-0307".to_string());
        issued.insert("2025-0307-01".to_string());
        assert_eq!(next_code(day(2025, 3, 7), &issued), "2025-0307-02");
    }

    #[test]
    fn probe_result_is_never_a_taken_code() {
        let mut taken = HashSet::new();
        for suffix in 0..150 {
            let code = next_code(day(2025, 12, 31), &taken);
            assert!(!taken.contains(&code), "suffix {suffix} reissued {code}");
            taken.insert(code);
        }
    }
}
