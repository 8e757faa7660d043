use axum::{
    Router,
    routing::{get, post},
    extract::{DefaultBodyLimit, Multipart, State, Query},
    Json,
    http::StatusCode,
};
use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Medication, MedicineData};
use crate::prescription;
use crate::schedule::compute_end_date;
use crate::routes::UserQuery;
use crate::state::AppState;
use crate::validate::ScheduleRequest;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Deserialize)]
pub struct EndDateQuery {
    pub start_date: Option<NaiveDate>,
    pub duration: String,
}

/// End date preview for the review form. Both fields are null for an
/// open-ended course.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndDatePreview {
    pub end_date: Option<String>,
    pub display: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/prescriptions/analyze", post(analyze))
        .route("/prescriptions", post(confirm))
        .route("/prescriptions/end-date", get(preview_end_date))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Malformed upload: {e}"))
}

async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MedicineData>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() == Some("file") {
            let bytes = field.bytes().await.map_err(bad_multipart)?;
            tracing::info!(bytes = bytes.len(), "🔍 Analyzing prescription");
            let data = state.analysis.analyze(bytes.to_vec()).await?;
            return Ok(Json(data));
        }
    }
    Err(ApiError::BadRequest("Missing `file` field".into()))
}

async fn preview_end_date(Query(params): Query<EndDateQuery>) -> Json<EndDatePreview> {
    let start = params.start_date.unwrap_or_else(|| Local::now().date_naive());
    let end = compute_end_date(start, &params.duration);
    Json(EndDatePreview {
        end_date: end.map(|e| e.storage()),
        display: end.map(|e| e.display()),
    })
}

async fn confirm(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Medication>), ApiError> {
    let mut image = None;
    let mut schedule = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => image = Some(field.bytes().await.map_err(bad_multipart)?.to_vec()),
            Some("schedule") => {
                let text = field.text().await.map_err(bad_multipart)?;
                let req: ScheduleRequest = serde_json::from_str(&text)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid schedule: {e}")))?;
                schedule = Some(req);
            }
            _ => {}
        }
    }

    let Some(image) = image else {
        return Err(ApiError::BadRequest("Missing `image` field".into()));
    };
    let Some(schedule) = schedule else {
        return Err(ApiError::BadRequest("Missing `schedule` field".into()));
    };

    let medication = prescription::confirm(
        &state,
        &params.user_id,
        image,
        schedule,
        Utc::now(),
        Local::now().date_naive(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(medication)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::send;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    const BOUNDARY: &str = "pillpal-test-boundary";

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Body {
        let mut body = Vec::new();
        for (name, file_name, bytes) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(file) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file}\"\r\nContent-Type: image/jpeg\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    fn upload(uri: &str, body: Body) -> Request<Body> {
        Request::post(uri)
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn confirm_creates_a_tracked_medication() {
        let (state, _dir) = test_state();
        let app = routes(state.clone());
        let schedule = json!({
            "pillName": "Metformin",
            "dosageInfo": "850mg",
            "dosage": 2,
            "duration": "3 months",
            "startDate": "2024-01-31",
            "timeSlots": ["09:00", "21:00"]
        })
        .to_string();

        let body = multipart(&[
            ("image", Some("prescription.jpg"), &[0xFF, 0xD8][..]),
            ("schedule", None, schedule.as_bytes()),
        ]);
        let (status, med) = send(&app, upload("/prescriptions?user_id=u1", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(med["timeSlots"], json!(["09:00", "21:00"]));
        assert_eq!(med["endDate"], "2024-04-30");
        assert_eq!(state.store.tracking("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn end_date_preview() {
        let (state, _dir) = test_state();
        let app = routes(state);

        let (_, body) = crate::routes::testing::get(
            &app,
            "/prescriptions/end-date?start_date=2024-03-01&duration=2%20weeks",
        )
        .await;
        assert_eq!(body, json!({ "endDate": "2024-03-15", "display": "03/15/2024" }));

        let (_, body) =
            crate::routes::testing::get(&app, "/prescriptions/end-date?duration=as%20needed").await;
        assert_eq!(body, json!({ "endDate": null, "display": null }));
    }

    #[tokio::test]
    async fn confirm_requires_both_parts() {
        let (state, _dir) = test_state();
        let app = routes(state);

        let body = multipart(&[("image", Some("prescription.jpg"), &[0xFF][..])]);
        let (status, body) = send(&app, upload("/prescriptions?user_id=u1", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Missing `schedule` field");
    }

    #[tokio::test]
    async fn analyze_reports_unreachable_service_as_bad_gateway() {
        let (state, _dir) = test_state();
        let app = routes(state);

        let body = multipart(&[("file", Some("prescription.jpg"), &[0xFF][..])]);
        let (status, _) = send(&app, upload("/prescriptions/analyze", body)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
