pub mod handlers;
mod push;
pub mod scheduler;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use push::{HttpPushGateway, PushGateway};
pub use scheduler::ReminderScheduler;

#[cfg(test)]
pub use push::RecordingGateway;

pub fn router() -> Router<AppState> {
    handlers::notification_routes()
}
