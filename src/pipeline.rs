//! Full derivation of a user's day and week from store documents.
//!
//! Nothing here is incremental: every change notification rebuilds the whole
//! snapshot from scratch, so the same inputs always give the same output.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Medication, TakenRecord, Todo, WeekView};
use crate::schedule::{
    active_medications, build_today_todos, build_week, compute_end_date, progress, week_dates,
};
use crate::store::{DocumentStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub todos: Vec<Todo>,
    pub progress: f64,
    pub week: WeekView,
}

/// Fills in end dates that were never stored, from the free-text duration.
fn resolve_end_dates(meds: &[Medication]) -> Vec<Medication> {
    meds.iter()
        .cloned()
        .map(|mut med| {
            if med.end_date.is_none() {
                med.end_date = compute_end_date(med.start_date, &med.duration).map(|end| end.date());
            }
            med
        })
        .collect()
}

pub fn derive(
    meds: &[Medication],
    records: &HashMap<NaiveDate, TakenRecord>,
    today: NaiveDate,
) -> Snapshot {
    let active = active_medications(&resolve_end_dates(meds), today);
    let empty = TakenRecord::default();
    let todos = build_today_todos(&active, records.get(&today).unwrap_or(&empty));
    Snapshot {
        date: today,
        progress: progress(&todos),
        week: build_week(&active, records, today),
        todos,
    }
}

pub async fn load(store: &dyn DocumentStore, uid: &str, today: NaiveDate) -> StoreResult<Snapshot> {
    let meds = store.tracking(uid).await?;
    let mut records = HashMap::new();
    for date in week_dates(today) {
        records.insert(date, store.taken_record(uid, date).await?);
    }
    Ok(derive(&meds, &records, today))
}
