//! Summaries over sequences of hourly records.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use std::collections::HashMap;

use crate::{condition::ConditionCode, model::WeatherRecord};

/// The single condition that best describes `records` within
/// `[range_start, range_end]`.
///
/// Any hazardous condition in range wins outright (the most severe one),
/// so a single tornado hour is not outvoted by a sunny afternoon. Otherwise
/// the most frequent condition wins, ties going to the more severe one and
/// then to definition order. `NotAvailable` records do not vote.
pub fn dominant_condition(
    records: &[WeatherRecord],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> ConditionCode {
    if range_start > range_end {
        return ConditionCode::NotAvailable;
    }

    // records are ascending, so the window is a contiguous slice
    let first = records.partition_point(|r| r.represented_date() < range_start);
    let last = records.partition_point(|r| r.represented_date() <= range_end);
    if first >= last {
        return ConditionCode::NotAvailable;
    }

    dominant_of(records[first..last].iter().map(WeatherRecord::condition))
}

/// Dominant condition per local calendar day, ascending by day.
///
/// `utc_offset_seconds` places each hour in the location's day. A single
/// fixed offset is used for the whole series, so the hours around a DST
/// change can land one hour off.
pub fn daily_conditions(
    records: &[WeatherRecord],
    utc_offset_seconds: i64,
) -> Vec<(NaiveDate, ConditionCode)> {
    let offset = i32::try_from(utc_offset_seconds)
        .ok()
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());

    let mut days: Vec<(NaiveDate, Vec<ConditionCode>)> = Vec::new();
    for record in records {
        let day = record.represented_date().with_timezone(&offset).date_naive();
        match days.last_mut() {
            Some((current, conditions)) if *current == day => conditions.push(record.condition()),
            _ => days.push((day, vec![record.condition()])),
        }
    }

    days.into_iter()
        .map(|(day, conditions)| (day, dominant_of(conditions.into_iter())))
        .collect()
}

fn dominant_of(conditions: impl Iterator<Item = ConditionCode>) -> ConditionCode {
    let mut counts: HashMap<ConditionCode, usize> = HashMap::new();
    for condition in conditions.filter(|c| *c != ConditionCode::NotAvailable) {
        *counts.entry(condition).or_default() += 1;
    }

    let hazardous = counts
        .iter()
        .filter(|(condition, _)| condition.is_hazardous())
        .max_by(|(a, a_count), (b, b_count)| {
            a.severity()
                .cmp(&b.severity())
                .then(a_count.cmp(b_count))
                .then(b.code().cmp(&a.code()))
        });
    if let Some((condition, _)) = hazardous {
        return *condition;
    }

    counts
        .iter()
        .max_by(|(a, a_count), (b, b_count)| {
            a_count
                .cmp(b_count)
                .then(a.severity().cmp(&b.severity()))
                .then(b.code().cmp(&a.code()))
        })
        .map(|(condition, _)| *condition)
        .unwrap_or(ConditionCode::NotAvailable)
}
