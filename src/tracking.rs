//! Dose toggling.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::ApiError;
use crate::models::{split_todo_id, Medication, TakenRecord};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub todo_id: String,
    pub completed: bool,
    /// `None` when the medication is not in the user's tracking document.
    pub taken_count: Option<u32>,
}

impl ToggleOutcome {
    pub fn observe(taken: &TakenRecord, meds: &[Medication], todo_id: &str) -> Self {
        let taken_count = split_todo_id(todo_id)
            .and_then(|(med_id, _)| meds.iter().find(|m| m.medication_id == med_id))
            .map(|m| m.taken_count);
        Self {
            todo_id: todo_id.to_string(),
            completed: taken.is_taken(todo_id),
            taken_count,
        }
    }
}

/// Flips `todo_id` in the day's record and moves the medication's counter
/// with it. Returns the new flag.
///
/// Toggling on bumps `takenCount` and stamps `lastTaken`, remembering the old
/// stamp. Toggling off decrements (never below zero) and restores it.
pub fn apply_toggle(
    taken: &mut TakenRecord,
    meds: &mut [Medication],
    todo_id: &str,
    now: DateTime<Utc>,
) -> bool {
    let completed = !taken.is_taken(todo_id);
    taken.pills.insert(todo_id.to_string(), completed);

    let med = split_todo_id(todo_id)
        .and_then(|(med_id, _)| meds.iter_mut().find(|m| m.medication_id == med_id));
    match med {
        Some(med) if completed => {
            med.taken_count += 1;
            med.previous_taken = med.last_taken;
            med.last_taken = Some(now);
            med.updated_at = Some(now);
        }
        Some(med) => {
            med.taken_count = med.taken_count.saturating_sub(1);
            med.last_taken = med.previous_taken.take();
            med.updated_at = Some(now);
        }
        None => tracing::warn!(todo_id, "⚠️ Toggled dose has no tracked medication"),
    }
    completed
}

/// Handles a user toggling a dose.
///
/// When `date` is the day the user's reminder session is scheduling, the
/// reminder for the todo is suppressed and the session's in-memory list
/// flipped before the store write. The change feed then rebuilds the views.
pub async fn toggle_todo(
    state: &AppState,
    uid: &str,
    todo_id: &str,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<ToggleOutcome, ApiError> {
    if split_todo_id(todo_id).is_none() {
        return Err(ApiError::BadRequest(format!("Invalid todo id: {todo_id}")));
    }

    state.sessions.toggle_local(uid, todo_id, date);

    let outcome = state.store.toggle_dose(uid, date, todo_id, now).await?;
    tracing::info!(
        uid,
        todo_id,
        completed = outcome.completed,
        taken_count = outcome.taken_count,
        "💊 Dose toggled"
    );
    Ok(outcome)
}
