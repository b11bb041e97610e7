mod dto;
pub mod handlers;
mod repo;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use repo::{GuardianLink, GuardianStore, PendingLink, PgGuardianStore};

pub fn router() -> Router<AppState> {
    handlers::guardian_routes()
}
