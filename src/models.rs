use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MedicationStatus {
    #[default]
    Active,
    Inactive,
}

/// One tracked prescription inside `tracking/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub medication_id: String,
    pub pill_name: String,
    #[serde(default)]
    pub dosage_info: String,
    /// Doses per day.
    pub dosage: u32,
    #[serde(default)]
    pub duration: String,
    pub start_date: NaiveDate,
    /// `None` means the duration could not be parsed; the course never ends.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub time_slots: Vec<String>,
    #[serde(default)]
    pub status: MedicationStatus,
    #[serde(default)]
    pub taken_count: u32,
    #[serde(default)]
    pub last_taken: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_taken: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Medication {
    pub fn todo_id(&self, slot: &str) -> String {
        todo_id(&self.medication_id, slot)
    }
}

pub fn todo_id(medication_id: &str, slot: &str) -> String {
    format!("{medication_id}:{slot}")
}

/// Splits a todo id into `(medication_id, time_slot)`. Slots contain a colon
/// themselves, so only the first one separates the parts.
pub fn split_todo_id(id: &str) -> Option<(&str, &str)> {
    let (med, slot) = id.split_once(':')?;
    if med.is_empty() || slot.is_empty() {
        return None;
    }
    Some((med, slot))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingDoc {
    #[serde(default)]
    pub medications: Vec<Medication>,
}

/// Per-user, per-day map of `todoId -> taken`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TakenRecord {
    #[serde(default)]
    pub pills: BTreeMap<String, bool>,
}

impl TakenRecord {
    pub fn is_taken(&self, todo_id: &str) -> bool {
        self.pills.get(todo_id).copied().unwrap_or(false)
    }

    pub fn taken_count(&self) -> usize {
        self.pills.values().filter(|taken| **taken).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    pub medication_id: String,
    pub text: String,
    pub time_slot: String,
    pub time: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekDay {
    pub key: &'static str,
    pub date: NaiveDate,
    pub doses: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekView {
    pub start: NaiveDate,
    pub days: Vec<WeekDay>,
}

impl WeekView {
    pub fn get(&self, key: &str) -> Option<&[bool]> {
        self.days
            .iter()
            .find(|d| d.key == key)
            .map(|d| d.doses.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub medication_id: String,
    pub pill_name: String,
    #[serde(default)]
    pub dosage_info: String,
    pub dosage: u32,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub side_effects: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub scanned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub added_to_tracking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryDoc {
    #[serde(default)]
    pub medications: Vec<HistoryEntry>,
}

/// Legacy per-scan record kept in `pills/{pillId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PillRecord {
    pub id: String,
    pub user_id: String,
    pub image_url: Option<String>,
    pub status: String,
    pub medicine_name: String,
    pub dosage: String,
    #[serde(default)]
    pub instructions: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub gender: Option<String>,
    pub age: Option<u32>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn is_onboarded(&self) -> bool {
        self.gender.is_some()
            && self.age.is_some()
            && self.emergency_contact_name.is_some()
            && self.emergency_contact_email.is_some()
    }
}

/// Extracted prescription data shown to the user for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineData {
    pub pill_name: String,
    pub dosage_info: String,
    pub dosage: u32,
    pub duration: String,
    pub condition: String,
    pub instructions: String,
    pub side_effects: Vec<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Active medication running through January 2024, one dose per slot.
    pub fn medication(id: &str, slots: &[&str]) -> Medication {
        Medication {
            medication_id: id.into(),
            pill_name: format!("pill {id}"),
            dosage_info: String::new(),
            dosage: slots.len() as u32,
            duration: "30 days".into(),
            start_date: date("2024-01-01"),
            end_date: Some(date("2024-01-31")),
            time_slots: slots.iter().map(|s| s.to_string()).collect(),
            status: MedicationStatus::Active,
            taken_count: 0,
            last_taken: None,
            previous_taken: None,
            image_url: None,
            history_ref: None,
            created_at: None,
            updated_at: None,
        }
    }
}
