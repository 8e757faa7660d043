use chrono::{NaiveDate, NaiveTime};

use crate::models::{Medication, MedicationStatus, TakenRecord, Todo};

const DEFAULT_SLOTS: [&str; 3] = ["08:00", "14:00", "20:00"];

/// Medications whose status is active and whose date range contains `today`.
pub fn active_medications(meds: &[Medication], today: NaiveDate) -> Vec<Medication> {
    meds.iter()
        .filter(|m| m.status == MedicationStatus::Active)
        .filter(|m| m.start_date <= today)
        .filter(|m| m.end_date.map_or(true, |end| today <= end))
        .cloned()
        .collect()
}

/// Expands active medications into today's todo list.
///
/// One todo per configured time slot, never `dosage` entries, so a medication
/// with fewer slots than its dosage contributes fewer todos. Sorting is stable
/// so shared slots keep medication order.
pub fn build_today_todos(active: &[Medication], taken: &TakenRecord) -> Vec<Todo> {
    let mut todos: Vec<Todo> = active
        .iter()
        .flat_map(|med| {
            med.time_slots.iter().map(move |slot| {
                let id = med.todo_id(slot);
                Todo {
                    completed: taken.is_taken(&id),
                    id,
                    medication_id: med.medication_id.clone(),
                    text: med.pill_name.clone(),
                    time_slot: slot.clone(),
                    time: format_slot(slot),
                }
            })
        })
        .collect();
    todos.sort_by(|a, b| a.time_slot.cmp(&b.time_slot));
    todos
}

/// Fraction of todos completed, `0.0` for an empty day.
pub fn progress(todos: &[Todo]) -> f64 {
    if todos.is_empty() {
        return 0.0;
    }
    let done = todos.iter().filter(|t| t.completed).count();
    done as f64 / todos.len() as f64
}

/// Formats an `HH:MM` slot as a 12-hour clock string ("08:00 PM").
/// Slots that do not parse are returned unchanged.
pub fn format_slot(slot: &str) -> String {
    match parse_slot(slot) {
        Some(time) => time.format("%I:%M %p").to_string(),
        None => slot.to_string(),
    }
}

pub fn parse_slot(slot: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(slot.trim(), "%H:%M").ok()
}

/// Default slots for a daily dose count: morning, afternoon, evening.
/// Counts above three have no defaults and need explicit slots.
pub fn default_time_slots(dosage: u32) -> Option<Vec<String>> {
    let n = usize::try_from(dosage).ok()?;
    if n > DEFAULT_SLOTS.len() {
        return None;
    }
    Some(DEFAULT_SLOTS[..n].iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{date as d, medication as med};

    #[test]
    fn scenario_a_two_pending_todos_in_slot_order() {
        let meds = vec![med("m1", &["20:00", "08:00"])];
        let active = active_medications(&meds, d("2024-01-15"));
        let todos = build_today_todos(&active, &TakenRecord::default());

        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].time_slot, "08:00");
        assert_eq!(todos[1].time_slot, "20:00");
        assert!(todos.iter().all(|t| !t.completed));
        assert_eq!(todos[0].time, "08:00 AM");
        assert_eq!(todos[1].time, "08:00 PM");
    }

    #[test]
    fn scenario_b_taken_flag_marks_todo_and_progress() {
        let meds = vec![med("m1", &["08:00", "20:00"])];
        let mut taken = TakenRecord::default();
        taken.pills.insert("m1:08:00".into(), true);

        let todos = build_today_todos(&active_medications(&meds, d("2024-01-15")), &taken);
        assert!(todos[0].completed);
        assert!(!todos[1].completed);
        assert_eq!(progress(&todos), 0.5);
    }

    #[test]
    fn shared_slots_are_kept_in_medication_order() {
        let meds = vec![med("a", &["09:00", "21:00"]), med("b", &["09:00"]), med("c", &["07:30"])];
        let todos = build_today_todos(&meds, &TakenRecord::default());

        let ids: Vec<&str> = todos.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["c:07:30", "a:09:00", "b:09:00", "a:21:00"]);
        assert_eq!(todos.len(), 4);
    }

    #[test]
    fn fewer_slots_than_dosage_are_not_backfilled() {
        let mut m = med("m1", &["08:00"]);
        m.dosage = 3;
        let todos = build_today_todos(&[m], &TakenRecord::default());
        assert_eq!(todos.len(), 1);
    }

    #[test]
    fn active_filter_is_inclusive_and_respects_status() {
        let mut inactive = med("off", &["08:00"]);
        inactive.status = MedicationStatus::Inactive;
        let mut open_ended = med("open", &["08:00"]);
        open_ended.end_date = None;
        let meds = vec![med("m1", &["08:00"]), inactive, open_ended];

        let ids = |day: &str| -> Vec<String> {
            active_medications(&meds, d(day))
                .into_iter()
                .map(|m| m.medication_id)
                .collect()
        };
        assert_eq!(ids("2024-01-01"), ["m1", "open"]);
        assert_eq!(ids("2024-01-31"), ["m1", "open"]);
        assert_eq!(ids("2024-02-01"), ["open"]);
        assert!(ids("2023-12-31").is_empty());
    }

    #[test]
    fn progress_of_empty_day_is_zero() {
        assert_eq!(progress(&[]), 0.0);
    }

    #[test]
    fn default_slots_follow_dose_count() {
        assert_eq!(default_time_slots(2).unwrap(), ["08:00", "14:00"]);
        assert_eq!(default_time_slots(0).unwrap(), Vec::<String>::new());
        assert!(default_time_slots(4).is_none());
    }

    #[test]
    fn unparsable_slot_is_shown_verbatim() {
        assert_eq!(format_slot("noon"), "noon");
        assert_eq!(format_slot("13:05"), "01:05 PM");
    }
}
