use axum::{
    Router,
    routing::{get, post},
    extract::{State, Query},
    Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::reminder::ReminderStatus;
use crate::routes::{UserBody, UserQuery};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SubscriptionView {
    pub active: bool,
    /// False when the request did not change anything.
    pub changed: bool,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reminders", get(get_reminders))
        .route("/reminders/subscribe", post(subscribe))
        .route("/reminders/unsubscribe", post(unsubscribe))
        .with_state(state)
}

async fn subscribe(
    State(state): State<AppState>,
    Json(body): Json<UserBody>,
) -> Json<SubscriptionView> {
    let changed = state.sessions.subscribe(&body.user_id);
    Json(SubscriptionView {
        active: state.sessions.is_active(&body.user_id),
        changed,
    })
}

async fn unsubscribe(
    State(state): State<AppState>,
    Json(body): Json<UserBody>,
) -> Json<SubscriptionView> {
    let changed = state.sessions.unsubscribe(&body.user_id);
    Json(SubscriptionView {
        active: state.sessions.is_active(&body.user_id),
        changed,
    })
}

async fn get_reminders(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Vec<ReminderStatus>>, ApiError> {
    state
        .sessions
        .reminders(&params.user_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No reminder session for {}", params.user_id)))
}
