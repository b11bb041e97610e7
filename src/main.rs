mod app;
mod auth;
mod clock;
mod config;
mod error;
mod guardians;
mod medications;
#[cfg(test)]
mod memory;
mod notifications;
mod state;
mod users;

use crate::{notifications::ReminderScheduler, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "medremind=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    let scheduler = ReminderScheduler::new(app_state.clone()).spawn();

    let res = app::serve(app::build_app(app_state)).await;
    scheduler.abort();
    res
}
