use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{Medication, TakenRecord, WeekDay, WeekView};

const WEEKDAY_KEYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Sunday on or before `today`.
pub fn week_start(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
}

/// The seven dates of the week containing `today`, Sunday first.
pub fn week_dates(today: NaiveDate) -> Vec<NaiveDate> {
    let start = week_start(today);
    (0..7).map(|i| start + Duration::days(i)).collect()
}

/// Builds the weekly adherence grid.
///
/// Every day has one cell per expected dose of the currently active
/// medications, whether or not a medication's course covered that day. Cells
/// are filled by count: the first `taken` cells are true, regardless of which
/// dose was actually taken.
pub fn build_week(
    active: &[Medication],
    records: &HashMap<NaiveDate, TakenRecord>,
    today: NaiveDate,
) -> WeekView {
    let total: usize = active.iter().map(|m| m.dosage as usize).sum();

    let days = week_dates(today)
        .into_iter()
        .zip(WEEKDAY_KEYS)
        .map(|(date, key)| {
            let taken = records
                .get(&date)
                .map(TakenRecord::taken_count)
                .unwrap_or(0)
                .min(total);
            let mut doses = vec![true; taken];
            doses.resize(total, false);
            WeekDay { key, date, doses }
        })
        .collect();

    WeekView {
        start: week_start(today),
        days,
    }
}
