//! Date-range validation and day-aligned chunk splitting for backfill runs

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("date range start {from} is after end {to}")]
    Inverted { from: NaiveDate, to: NaiveDate },
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, RangeError> {
        if from > to {
            return Err(RangeError::Inverted { from, to });
        }
        Ok(Self { from, to })
    }

    /// Preset helper: the `days` most recent days ending at `today`.
    pub fn last_n_days(today: NaiveDate, days: u32) -> Self {
        let days = days.max(1);
        Self {
            from: today - Duration::days(i64::from(days) - 1),
            to: today,
        }
    }
}

/// One backfill unit: `[from 00:00:00, to 23:59:59]`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

/// Splits `range` into consecutive day-aligned chunks of at most
/// `chunk_days` days (minimum 1). Chunks never overlap and never leave a
/// gap; the last chunk is clamped to the range end.
pub fn split_into_chunks(range: DateRange, chunk_days: u32) -> Vec<Chunk> {
    let step = i64::from(chunk_days.max(1));
    let mut chunks = Vec::new();
    let mut cursor = range.from;
    while cursor <= range.to {
        let end_date = (cursor + Duration::days(step - 1)).min(range.to);
        chunks.push(Chunk {
            from: day_start(cursor),
            to: day_end(end_date),
        });
        cursor = end_date + Duration::days(1);
    }
    chunks
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(0, 0, 0).expect("midnight is a valid time")
}

fn day_end(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_opt(23, 59, 59).expect("23:59:59 is a valid time")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn ten_days_with_seven_day_chunks_gives_two_chunks() {
        let range = DateRange::new(date("2025-03-01"), date("2025-03-10")).unwrap();
        let chunks = split_into_chunks(range, 7);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].from, date("2025-03-01").and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(chunks[0].to, date("2025-03-07").and_hms_opt(23, 59, 59).unwrap());
        assert_eq!(chunks[1].from, date("2025-03-08").and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(chunks[1].to, date("2025-03-10").and_hms_opt(23, 59, 59).unwrap());
    }

    #[test]
    fn exact_multiple_has_no_trailing_sliver() {
        let range = DateRange::new(date("2025-03-01"), date("2025-03-14")).unwrap();
        let chunks = split_into_chunks(range, 7);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].to, date("2025-03-14").and_hms_opt(23, 59, 59).unwrap());
    }

    #[test]
    fn single_day_range_is_one_chunk() {
        let range = DateRange::new(date("2025-03-05"), date("2025-03-05")).unwrap();
        let chunks = split_into_chunks(range, 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].from, date("2025-03-05").and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(chunks[0].to, date("2025-03-05").and_hms_opt(23, 59, 59).unwrap());
    }

    #[test]
    fn zero_chunk_days_is_clamped_to_one() {
        let range = DateRange::new(date("2025-03-01"), date("2025-03-03")).unwrap();
        let chunks = split_into_chunks(range, 0);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(DateRange::new(date("2025-03-10"), date("2025-03-01")).is_err());
    }

    #[test]
    fn last_n_days_preset() {
        let range = DateRange::last_n_days(date("2025-03-10"), 7);
        assert_eq!(range.from, date("2025-03-04"));
        assert_eq!(range.to, date("2025-03-10"));
    }
}
