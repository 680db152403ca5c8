//! Cron schedule parsing.
//!
//! Job schedules are written as classic 5-field cron expressions or the
//! `@`-keywords (`@hourly`, `@daily`, ...). The cron crate wants a seconds
//! field, so 5-field expressions are normalized by prepending `0`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::ValidationError;

pub fn parse_schedule(expr: &str) -> Result<Schedule, ValidationError> {
    let normalized = normalize(expr);

    Schedule::from_str(&normalized).map_err(|err| ValidationError::InvalidSchedule {
        expr: expr.to_string(),
        reason: err.to_string(),
    })
}

fn normalize(expr: &str) -> String {
    let trimmed = expr.trim();
    if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Next fire time strictly after `after`, if the schedule has one.
pub fn next_occurrence(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_expressions_parse() {
        assert!(parse_schedule("* * * * *").is_ok());
        assert!(parse_schedule("30 4 * * 1").is_ok());
        assert!(parse_schedule("0 0 1 1 *").is_ok());
    }

    #[test]
    fn keyword_expressions_parse() {
        for expr in ["@hourly", "@daily", "@weekly", "@monthly", "@yearly"] {
            assert!(parse_schedule(expr).is_ok(), "{expr} should parse");
        }
    }

    #[test]
    fn garbage_is_rejected() {
        for expr in ["not a schedule", "* * *", "99 99 * * *", ""] {
            assert!(
                matches!(
                    parse_schedule(expr),
                    Err(ValidationError::InvalidSchedule { .. })
                ),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn next_occurrence_advances() {
        let schedule = parse_schedule("0 3 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let next = next_occurrence(&schedule, after).unwrap();
        assert_eq!(
            Utc.with_ymd_and_hms(2024, 5, 2, 3, 0, 0).unwrap(),
            next
        );
    }
}
