use axum::{
    Router,
    routing::{get, post},
    extract::{State, Query},
    Json,
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::models::UserProfile;
use crate::routes::{UserBody, UserQuery};
use crate::state::AppState;
use crate::validate::{validate_onboarding, validate_registration, OnboardingForm, RegistrationForm};

#[derive(Deserialize)]
pub struct NewProfile {
    pub user_id: String,
    #[serde(flatten)]
    pub form: RegistrationForm,
}

#[derive(Deserialize)]
pub struct OnboardingRequest {
    pub user_id: String,
    #[serde(flatten)]
    pub form: OnboardingForm,
}

#[derive(Serialize)]
pub struct ProfileView {
    pub profile: UserProfile,
    pub onboarded: bool,
}

impl From<UserProfile> for ProfileView {
    fn from(profile: UserProfile) -> Self {
        Self {
            onboarded: profile.is_onboarded(),
            profile,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/profile", get(get_profile).post(register))
        .route("/profile/login", post(login))
        .route("/onboarding", post(onboard))
        .with_state(state)
}

async fn get_profile(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<ProfileView>, ApiError> {
    let Some(mut profile) = state.store.profile(&params.user_id).await? else {
        return Err(ApiError::NotFound(format!("No profile for {}", params.user_id)));
    };
    profile.uid = params.user_id;
    Ok(Json(profile.into()))
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<NewProfile>,
) -> Result<(StatusCode, Json<ProfileView>), ApiError> {
    let reg = validate_registration(&body.form).map_err(ApiError::Validation)?;
    let now = Utc::now();

    let existing = state.store.profile(&body.user_id).await?;
    let mut fields = json!({
        "uid": body.user_id,
        "name": reg.name,
        "email": reg.email,
        "updatedAt": now,
    });
    if existing.is_none() {
        fields["createdAt"] = json!(now);
        fields["emailVerified"] = json!(false);
    }

    let profile = state.store.merge_profile(&body.user_id, fields).await?;
    tracing::info!(uid = %body.user_id, "👤 Profile saved");
    let status = if existing.is_none() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(profile.into())))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<UserBody>,
) -> Result<Json<ProfileView>, ApiError> {
    let Some(mut profile) = state.store.profile(&body.user_id).await? else {
        return Err(ApiError::NotFound(format!("No profile for {}", body.user_id)));
    };

    let now = Utc::now();
    match state
        .store
        .merge_profile(&body.user_id, json!({ "lastLoginAt": now }))
        .await
    {
        Ok(updated) => profile = updated,
        Err(e) => tracing::warn!(uid = %body.user_id, "⚠️ Could not record login: {}", e),
    }
    profile.uid = body.user_id;
    Ok(Json(profile.into()))
}

async fn onboard(
    State(state): State<AppState>,
    Json(body): Json<OnboardingRequest>,
) -> Result<Json<ProfileView>, ApiError> {
    let onboarding = validate_onboarding(&body.form).map_err(ApiError::Validation)?;

    let profile = state
        .store
        .merge_profile(
            &body.user_id,
            json!({
                "gender": onboarding.gender,
                "age": onboarding.age,
                "emergencyContactName": onboarding.emergency_contact_name,
                "emergencyContactEmail": onboarding.emergency_contact_email,
                "updatedAt": Utc::now(),
            }),
        )
        .await?;
    tracing::info!(uid = %body.user_id, "🎉 Onboarding complete");
    Ok(Json(profile.into()))
}
