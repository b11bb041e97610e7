use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{InvitationResponse, InviteRequest},
    repo::GuardianLink,
    services::{self, LinkView},
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn guardian_routes() -> Router<AppState> {
    Router::new()
        .route("/guardians", get(list_guardians))
        .route("/guardians/invite", post(invite))
        .route("/guardians/accept/:token", post(accept))
        .route("/guardians/for", get(list_subjects))
        .route("/guardians/for/:subject_id", delete(leave_subject))
        .route("/guardians/:guardian_id", delete(remove_guardian))
}

#[instrument(skip(state, payload))]
pub async fn invite(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<InviteRequest>,
) -> AppResult<(StatusCode, Json<InvitationResponse>)> {
    let link = services::invite(&state, user_id, &payload.email).await?;
    let invitation_token = link
        .invitation_token
        .clone()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("pending link without token")))?;
    Ok((
        StatusCode::CREATED,
        Json(InvitationResponse {
            link,
            invitation_token,
        }),
    ))
}

#[instrument(skip(state, token))]
pub async fn accept(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(token): Path<String>,
) -> AppResult<Json<GuardianLink>> {
    Ok(Json(services::accept(&state, &token, user_id).await?))
}

#[instrument(skip(state))]
pub async fn list_guardians(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<LinkView>>> {
    Ok(Json(services::list_guardians_of(&state, user_id).await?))
}

#[instrument(skip(state))]
pub async fn list_subjects(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<LinkView>>> {
    Ok(Json(services::list_subjects_for(&state, user_id).await?))
}

/// Subject removes one of their guardians.
#[instrument(skip(state))]
pub async fn remove_guardian(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(guardian_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::revoke(&state, user_id, guardian_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Guardian stops watching a subject.
#[instrument(skip(state))]
pub async fn leave_subject(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(subject_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::revoke(&state, subject_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
