use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::error::AppError;

pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Accepts `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_instant(raw: &str) -> Result<u64, AppError> {
    let raw = raw.trim();

    let millis = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc().timestamp_millis()),
        Err(_) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|instant| instant.timestamp_millis()),
    };

    millis
        .and_then(|millis| u64::try_from(millis).ok())
        .ok_or_else(|| AppError::BadRequest(format!("Invalid date {raw:?}")))
}

/// Midnight UTC of the current day.
pub fn today_ms() -> u64 {
    let now = ledger::position::now_millis();
    now - now % DAY_MS
}

pub fn label(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_day_and_timestamp() {
        assert_eq!(parse_instant("2024-01-02").unwrap(), 1_704_153_600_000);
        assert_eq!(parse_instant("2024-01-02T01:00:00Z").unwrap(), 1_704_157_200_000);
        assert!(matches!(parse_instant("yesterday"), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_label_is_rfc3339() {
        assert_eq!(label(1_704_153_600_000), "2024-01-02T00:00:00Z");
    }

    #[test]
    fn test_today_is_midnight() {
        assert_eq!(today_ms() % DAY_MS, 0);
    }
}
