use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::{PgPool, Row};

use crate::error::EngineError;
use crate::types::{Analytics, STATUS_RESOLVED};

/// Share of resolved leads as a whole percentage; 0 for an empty set.
pub fn resolved_percentage(resolved: i64, total: i64) -> i64 {
    if total == 0 {
        return 0;
    }
    (resolved as f64 / total as f64 * 100.0).round() as i64
}

/// Mean response time in whole seconds over leads that have been replied
/// to. The 0 sentinel marks "no staff reply yet" and is excluded from both
/// numerator and denominator, so unanswered leads never drag the average.
pub fn average_response_time(response_times: &[i64]) -> i64 {
    let replied: Vec<i64> = response_times.iter().copied().filter(|&t| t != 0).collect();
    if replied.is_empty() {
        return 0;
    }
    let sum: i64 = replied.iter().sum();
    (sum as f64 / replied.len() as f64).round() as i64
}

/// Week number with Sunday-started weeks anchored to January 1st:
/// ceil((day_of_year + jan1_weekday) / 7), weekday counted from Sunday = 0.
pub fn week_of_year(date: NaiveDate) -> i64 {
    let jan1 = date.with_ordinal(1).unwrap_or(date);
    let jan1_weekday = jan1.weekday().num_days_from_sunday() as i64;
    let day_of_year = date.ordinal() as i64;
    (day_of_year + jan1_weekday + 6) / 7
}

/// Ten weekly buckets of missed chats, oldest first, index 9 = the current
/// week. Only current-year leads are binned; anything more than 9 weeks back
/// is dropped, not clamped into the oldest bucket.
pub fn bin_missed_by_week(now: NaiveDate, missed_created: &[NaiveDate]) -> Vec<i64> {
    let current_week = week_of_year(now);
    let mut buckets = vec![0i64; 10];
    for created in missed_created {
        if created.year() != now.year() {
            continue;
        }
        let offset = current_week - week_of_year(*created);
        if (0..10).contains(&offset) {
            buckets[(9 - offset) as usize] += 1;
        }
    }
    buckets
}

/// Derive the dashboard numbers from stored lead state. Read-only.
pub async fn compute_analytics(db: &PgPool) -> Result<Analytics, EngineError> {
    let rows = sqlx::query("SELECT status, response_time, is_missed_chat, created_at FROM leads")
        .fetch_all(db)
        .await?;

    let total = rows.len() as i64;
    let mut resolved = 0i64;
    let mut response_times = Vec::with_capacity(rows.len());
    let mut missed_created = Vec::new();
    for row in &rows {
        if row.get::<String, _>("status") == STATUS_RESOLVED {
            resolved += 1;
        }
        response_times.push(row.get::<i64, _>("response_time"));
        if row.get::<bool, _>("is_missed_chat") {
            missed_created.push(row.get::<DateTime<Utc>, _>("created_at").date_naive());
        }
    }

    Ok(Analytics {
        total_leads: total,
        // percentage, not a count
        total_resolved_leads: resolved_percentage(resolved, total),
        average_response_time: average_response_time(&response_times),
        lead_graph: bin_missed_by_week(Utc::now().date_naive(), &missed_created),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn empty_set_resolves_to_zero_percent() {
        assert_eq!(resolved_percentage(0, 0), 0);
    }

    #[test]
    fn percentage_rounds_to_nearest_whole() {
        assert_eq!(resolved_percentage(1, 3), 33);
        assert_eq!(resolved_percentage(2, 3), 67);
        assert_eq!(resolved_percentage(5, 5), 100);
    }

    #[test]
    fn average_excludes_the_no_reply_sentinel() {
        // two unanswered leads must not drag the mean down
        assert_eq!(average_response_time(&[0, 0, 1800, 600]), 1200);
    }

    #[test]
    fn average_of_no_replied_leads_is_zero() {
        assert_eq!(average_response_time(&[]), 0);
        assert_eq!(average_response_time(&[0, 0, 0]), 0);
    }

    #[test]
    fn week_numbering_starts_weeks_on_sunday() {
        // 2023-01-01 was a Sunday
        assert_eq!(week_of_year(day(2023, 1, 1)), 1);
        assert_eq!(week_of_year(day(2023, 1, 7)), 1);
        assert_eq!(week_of_year(day(2023, 1, 8)), 2);

        // 2025-01-01 was a Wednesday (weekday 3 from Sunday)
        assert_eq!(week_of_year(day(2025, 1, 1)), 1);
        assert_eq!(week_of_year(day(2025, 1, 4)), 1);
        assert_eq!(week_of_year(day(2025, 1, 5)), 2);
    }

    #[test]
    fn graph_bins_current_week_at_the_end() {
        let now = day(2025, 6, 15);
        let graph = bin_missed_by_week(now, &[now, now, day(2025, 6, 9)]);
        assert_eq!(graph[9], 2);
        assert_eq!(graph[8], 1);
        assert_eq!(graph.iter().sum::<i64>(), 3);
    }

    #[test]
    fn graph_drops_leads_older_than_ten_weeks() {
        let now = day(2025, 6, 15);
        let ancient = day(2025, 1, 5);
        let graph = bin_missed_by_week(now, &[ancient]);
        assert_eq!(graph.iter().sum::<i64>(), 0);
    }

    #[test]
    fn graph_ignores_previous_year_leads() {
        let now = day(2025, 1, 10);
        let graph = bin_missed_by_week(now, &[day(2024, 12, 30)]);
        assert_eq!(graph.iter().sum::<i64>(), 0);
    }

    #[test]
    fn graph_always_has_ten_buckets() {
        let graph = bin_missed_by_week(day(2025, 6, 15), &[]);
        assert_eq!(graph.len(), 10);
        assert!(graph.iter().all(|&n| n == 0));
    }
}
