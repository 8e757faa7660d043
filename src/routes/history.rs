use axum::{
    Router,
    routing::get,
    extract::{State, Query},
    Json,
};

use crate::error::ApiError;
use crate::models::{HistoryEntry, PillRecord};
use crate::routes::UserQuery;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/history", get(get_history))
        .route("/pills", get(get_pills))
        .with_state(state)
}

/// Every confirmed scan, newest first.
async fn get_history(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let mut entries = state.store.history(&params.user_id).await?;
    entries.reverse();
    Ok(Json(entries))
}

async fn get_pills(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<Vec<PillRecord>>, ApiError> {
    Ok(Json(state.store.pills_for_user(&params.user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::medication;
    use crate::routes::testing::get;
    use crate::state::test_state;
    use axum::http::StatusCode;

    fn entry(id: &str) -> HistoryEntry {
        HistoryEntry {
            medication_id: id.into(),
            pill_name: "Aspirin".into(),
            dosage: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let (state, _dir) = test_state();
        for id in ["med_a", "med_b"] {
            state
                .store
                .record_medication("u1", entry(id), medication(id, &["08:00"]))
                .await
                .unwrap();
        }
        let app = routes(state);

        let (status, body) = get(&app, "/history?user_id=u1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["medicationId"], "med_b");
        assert_eq!(body[1]["medicationId"], "med_a");

        let (_, body) = get(&app, "/pills?user_id=u1").await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn missing_user_id_is_rejected() {
        let (state, _dir) = test_state();
        let (status, _) = get(&routes(state), "/history").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
