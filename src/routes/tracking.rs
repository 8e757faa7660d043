use axum::{
    Router,
    routing::{get, post},
    extract::{State, Query},
    Json,
};
use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Medication, Todo, WeekView};
use crate::pipeline;
use crate::routes::UserQuery;
use crate::state::AppState;
use crate::tracking::{toggle_todo, ToggleOutcome};

#[derive(Deserialize)]
pub struct DayQuery {
    pub user_id: String,
    /// Defaults to today in the server's local time.
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct ToggleRequest {
    pub user_id: String,
    pub todo_id: String,
    pub date: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct TodayView {
    pub date: NaiveDate,
    pub todos: Vec<Todo>,
    pub progress: f64,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/medications", get(get_medications))
        .route("/today", get(get_today))
        .route("/week", get(get_week))
        .route("/toggle", post(toggle))
        .with_state(state)
}

async fn get_medications(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Vec<Medication>>, ApiError> {
    Ok(Json(state.store.tracking(&params.user_id).await?))
}

async fn get_today(
    State(state): State<AppState>,
    Query(params): Query<DayQuery>,
) -> Result<Json<TodayView>, ApiError> {
    let date = params.date.unwrap_or_else(today);
    let snapshot = pipeline::load(state.store.as_ref(), &params.user_id, date).await?;
    Ok(Json(TodayView {
        date: snapshot.date,
        todos: snapshot.todos,
        progress: snapshot.progress,
    }))
}

async fn get_week(
    State(state): State<AppState>,
    Query(params): Query<DayQuery>,
) -> Result<Json<WeekView>, ApiError> {
    let date = params.date.unwrap_or_else(today);
    let snapshot = pipeline::load(state.store.as_ref(), &params.user_id, date).await?;
    Ok(Json(snapshot.week))
}

async fn toggle(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<ToggleOutcome>, ApiError> {
    let date = body.date.unwrap_or_else(today);
    let outcome = toggle_todo(&state, &body.user_id, &body.todo_id, date, Utc::now()).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::medication;
    use crate::routes::testing::{get, post_json};
    use crate::state::test_state;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn toggle_shows_up_in_today_and_week() {
        let (state, _dir) = test_state();
        state
            .store
            .add_medication("u1", medication("m1", &["20:00", "08:00"]))
            .await
            .unwrap();
        let app = routes(state);

        let (status, body) = get(&app, "/today?user_id=u1&date=2024-01-17").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["todos"][0]["id"], "m1:08:00");
        assert_eq!(body["todos"][0]["time"], "08:00 AM");
        assert_eq!(body["progress"], 0.0);

        let (status, body) = post_json(
            &app,
            "/toggle",
            json!({ "user_id": "u1", "todo_id": "m1:08:00", "date": "2024-01-17" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "todoId": "m1:08:00", "completed": true, "takenCount": 1 }));

        let (_, body) = get(&app, "/today?user_id=u1&date=2024-01-17").await;
        assert_eq!(body["todos"][0]["completed"], true);
        assert_eq!(body["progress"], 0.5);

        let (_, week) = get(&app, "/week?user_id=u1&date=2024-01-17").await;
        assert_eq!(week["start"], "2024-01-14");
        assert_eq!(week["days"][3]["key"], "wed");
        assert_eq!(week["days"][3]["doses"], json!([true, false]));
    }

    #[tokio::test]
    async fn malformed_todo_id_is_rejected() {
        let (state, _dir) = test_state();
        let app = routes(state);

        let (status, _) = post_json(&app, "/toggle", json!({ "user_id": "u1", "todo_id": "nocolon" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn medications_lists_tracking() {
        let (state, _dir) = test_state();
        state
            .store
            .add_medication("u1", medication("m1", &["08:00"]))
            .await
            .unwrap();
        let app = routes(state);

        let (_, body) = get(&app, "/medications?user_id=u1").await;
        assert_eq!(body[0]["medicationId"], "m1");
        let (_, body) = get(&app, "/medications?user_id=u2").await;
        assert_eq!(body, json!([]));
    }
}
