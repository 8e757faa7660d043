//! Prescription analysis and the confirm-schedule flow.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{HistoryEntry, Medication, MedicationStatus, MedicineData, PillRecord};
use crate::schedule::compute_end_date;
use crate::state::AppState;
use crate::validate::{validate_schedule, ScheduleRequest};

const UNKNOWN_MEDICINE: &str = "Unknown Medicine";
const DEFAULT_DURATION: &str = "7 days";

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analysis request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analysis service returned status {status}")]
    Status { status: u16, body: String },

    #[error("Analysis response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client for the vision service that reads prescription photos.
pub struct AnalysisClient {
    url: String,
    client: reqwest::Client,
}

impl AnalysisClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub async fn analyze(&self, jpeg: Vec<u8>) -> Result<MedicineData, AnalysisError> {
        let part = Part::bytes(jpeg)
            .file_name("prescription.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let response = self.client.post(&self.url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "❌ Analysis service failed");
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = serde_json::from_str(&body)?;
        Ok(parse_analysis(&value))
    }
}

fn text(fields: &Value, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn duration_text(raw: Option<&Value>) -> String {
    match raw {
        Some(Value::Number(n)) if n.as_f64().is_some_and(|d| d > 0.0) => format!("{n} days"),
        Some(Value::String(s)) if !s.trim().is_empty() => {
            let s = s.trim();
            if s.parse::<f64>().is_ok() {
                format!("{s} days")
            } else {
                s.to_string()
            }
        }
        _ => DEFAULT_DURATION.to_string(),
    }
}

/// Maps the analysis service's answer onto [`MedicineData`]. The payload is
/// either flat or wrapped in a `response` object; missing fields fall back to
/// values the user can correct before confirming.
pub fn parse_analysis(raw: &Value) -> MedicineData {
    let fields = raw
        .get("response")
        .filter(|r| r.is_object())
        .unwrap_or(raw);

    let pill_name = text(fields, "pillName");
    let dosage = match fields.get("dosage") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .and_then(|d| u32::try_from(d).ok())
    .filter(|d| *d > 0)
    .unwrap_or(1);

    MedicineData {
        pill_name: if pill_name.is_empty() {
            UNKNOWN_MEDICINE.to_string()
        } else {
            pill_name
        },
        dosage_info: text(fields, "dosageInfo"),
        dosage,
        duration: duration_text(fields.get("duration")),
        condition: text(fields, "condition"),
        instructions: text(fields, "instructions"),
        side_effects: fields
            .get("sideEffects")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn image_key(uid: &str, now: DateTime<Utc>) -> String {
    format!("prescriptions/{uid}/{}.jpg", now.timestamp_millis())
}

/// Turns a reviewed prescription into a tracked medication.
///
/// The image is uploaded first. History and tracking are written together;
/// if that fails, the upload is removed again. The legacy pill record is
/// best-effort.
pub async fn confirm(
    state: &AppState,
    uid: &str,
    image: Vec<u8>,
    req: ScheduleRequest,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Result<Medication, ApiError> {
    let time_slots = validate_schedule(&req).map_err(ApiError::Validation)?;
    let start_date = req.start_date.unwrap_or(today);
    let end_date = compute_end_date(start_date, &req.duration).map(|end| end.date());
    let medication_id = format!("med_{}", Uuid::new_v4().simple());

    let key = image_key(uid, now);
    let image_url = state.blobs.put(&key, image).await?;

    let entry = HistoryEntry {
        medication_id: medication_id.clone(),
        pill_name: req.pill_name.trim().to_string(),
        dosage_info: req.dosage_info.clone(),
        dosage: req.dosage,
        duration: req.duration.clone(),
        condition: req.condition.clone(),
        instructions: req.instructions.clone(),
        side_effects: req.side_effects.clone(),
        image_url: Some(image_url.clone()),
        scanned_at: Some(now),
        added_to_tracking: true,
    };
    let medication = Medication {
        medication_id: medication_id.clone(),
        pill_name: entry.pill_name.clone(),
        dosage_info: req.dosage_info.clone(),
        dosage: req.dosage,
        duration: req.duration.clone(),
        start_date,
        end_date,
        time_slots,
        status: MedicationStatus::Active,
        taken_count: 0,
        last_taken: None,
        previous_taken: None,
        image_url: Some(image_url.clone()),
        history_ref: Some(medication_id.clone()),
        created_at: Some(now),
        updated_at: Some(now),
    };

    let written = state
        .store
        .record_medication(uid, entry, medication.clone())
        .await;
    if let Err(e) = written {
        tracing::error!(uid, "❌ Failed to save medication: {}", e);
        if let Err(cleanup) = state.blobs.delete(&key).await {
            tracing::warn!(key, "⚠️ Could not remove orphaned image: {}", cleanup);
        }
        return Err(e.into());
    }

    let pill = PillRecord {
        id: Uuid::new_v4().to_string(),
        user_id: uid.to_string(),
        image_url: Some(image_url),
        status: "analyzed".to_string(),
        medicine_name: medication.pill_name.clone(),
        dosage: if req.dosage_info.is_empty() {
            format!("{} per day", req.dosage)
        } else {
            req.dosage_info.clone()
        },
        instructions: req.instructions,
        start_date: Some(start_date),
        end_date,
        source: "camera".to_string(),
        created_at: now,
        analyzed_at: now,
    };
    if let Err(e) = state.store.put_pill(&pill).await {
        tracing::warn!(uid, "⚠️ Legacy pill record not written: {}", e);
    }

    tracing::info!(
        uid,
        medication_id = %medication.medication_id,
        slots = medication.time_slots.len(),
        "✅ Medication added to tracking"
    );
    Ok(medication)
}
