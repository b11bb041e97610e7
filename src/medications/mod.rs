pub mod due;
mod dto;
pub mod handlers;
pub(crate) mod model;
mod repo;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use model::{Medication, NewMedication, TakenLedger, TimeOfDay};
pub use repo::{MedicationStore, Mutation, PgMedicationStore};

pub fn router() -> Router<AppState> {
    handlers::medication_routes()
}
