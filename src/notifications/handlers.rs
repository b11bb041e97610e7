use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;

use super::services;
use crate::{auth::AuthUser, error::AppResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct PushAddressRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/notifications/push-address",
            post(register_push_address).delete(clear_push_address),
        )
        .route("/notifications/send", post(send_to_self))
}

#[instrument(skip(state, payload))]
pub async fn register_push_address(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<PushAddressRequest>,
) -> AppResult<StatusCode> {
    services::update_push_address(&state, user_id, &payload.address).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn clear_push_address(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    services::clear_push_address(&state, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /notifications/send: test message to the caller's own device.
#[instrument(skip(state, payload))]
pub async fn send_to_self(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SendRequest>,
) -> AppResult<StatusCode> {
    services::send_manual(&state, user_id, &payload.title, &payload.body, payload.data).await?;
    Ok(StatusCode::ACCEPTED)
}
