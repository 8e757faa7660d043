pub mod blobs;
pub mod history;
pub mod prescriptions;
pub mod profile;
pub mod reminders;
pub mod tracking;

use axum::{routing::get, Router};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct UserBody {
    pub user_id: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(profile::routes(state.clone()))
        .merge(prescriptions::routes(state.clone()))
        .merge(tracking::routes(state.clone()))
        .merge(history::routes(state.clone()))
        .merge(reminders::routes(state.clone()))
        .merge(blobs::routes(state))
        .route("/health", get(|| async { "✅ Backend up" }))
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use tower::ServiceExt;

    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
        send(app, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::testing::get;
    use super::*;
    use crate::state::test_state;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health() {
        let (state, _dir) = test_state();
        let (status, body) = get(&app(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "✅ Backend up");
    }
}
