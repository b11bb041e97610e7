use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, patch},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{
        CreateMedicationRequest, MedicationListResponse, MedicationView, ToggleRequest,
        UpdateMedicationRequest,
    },
    model::MedicationPatch,
    services,
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn medication_routes() -> Router<AppState> {
    Router::new()
        .route("/medications", get(list_medications).post(create_medication))
        .route(
            "/medications/:id",
            get(get_medication)
                .patch(update_medication)
                .delete(delete_medication),
        )
        .route("/medications/:id/toggle", patch(toggle_dose))
}

/// POST /medications
#[instrument(skip(state, payload))]
pub async fn create_medication(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreateMedicationRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<MedicationView>)> {
    let med = services::create(&state, payload.into_new(user_id)?).await?;

    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(&format!("/api/v1/medications/{}", med.id))
        .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;
    headers.insert(header::LOCATION, location);

    Ok((StatusCode::CREATED, headers, Json(med.into())))
}

/// GET /medications: own plus guarded subjects'.
#[instrument(skip(state))]
pub async fn list_medications(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<MedicationListResponse>> {
    let visible = services::list_visible(&state, user_id).await?;
    Ok(Json(visible.into()))
}

#[instrument(skip(state))]
pub async fn get_medication(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MedicationView>> {
    Ok(Json(services::get(&state, id, user_id).await?.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_medication(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMedicationRequest>,
) -> AppResult<Json<MedicationView>> {
    let patch = MedicationPatch::try_from(payload)?;
    Ok(Json(services::update(&state, id, user_id, patch).await?.into()))
}

#[instrument(skip(state))]
pub async fn delete_medication(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::delete(&state, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /medications/:id/toggle { date, time }
#[instrument(skip(state, payload))]
pub async fn toggle_dose(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ToggleRequest>,
) -> AppResult<Json<MedicationView>> {
    let (date, time) = payload.parse()?;
    let med = services::toggle_dose(&state, id, date, time, user_id).await?;
    Ok(Json(med.into()))
}
