use serde::Serialize;
use time::Date;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::model::{validate_window, Medication, MedicationPatch, NewMedication, TimeOfDay};
use crate::{
    error::{AppError, AppResult},
    guardians::services::{ensure_access, visible_owners},
    state::AppState,
    users::PublicUser,
};

/// Medications of one subject seen through an accepted guardian link.
#[derive(Debug, Serialize)]
pub struct SharedMedications {
    pub user: PublicUser,
    pub medications: Vec<Medication>,
}

#[derive(Debug, Serialize)]
pub struct VisibleMedications {
    pub own: Vec<Medication>,
    pub shared: Vec<SharedMedications>,
}

#[instrument(skip(st, new), fields(owner_id = %new.owner_id))]
pub async fn create(st: &AppState, new: NewMedication) -> AppResult<Medication> {
    validate_window(new.start_date, new.end_date)?;
    if new.times.is_empty() {
        return Err(AppError::invalid("at least one time is required"));
    }
    let med = st.medications.insert(new).await?;
    info!(medication_id = %med.id, "medication created");
    Ok(med)
}

/// The viewer's own medications plus those of every subject they guard.
#[instrument(skip(st))]
pub async fn list_visible(st: &AppState, viewer_id: Uuid) -> AppResult<VisibleMedications> {
    let own = st.medications.list_by_owner(viewer_id).await?;

    let subjects: Vec<Uuid> = visible_owners(st, viewer_id)
        .await?
        .into_iter()
        .filter(|id| *id != viewer_id)
        .collect();
    let users = st.users.find_many(&subjects).await?;

    let mut shared = Vec::with_capacity(subjects.len());
    for subject_id in subjects {
        let Some(user) = users.iter().find(|u| u.id == subject_id) else {
            warn!(%subject_id, "guarded subject no longer exists");
            continue;
        };
        shared.push(SharedMedications {
            user: PublicUser::from(user),
            medications: st.medications.list_by_owner(subject_id).await?,
        });
    }

    Ok(VisibleMedications { own, shared })
}

/// Owner or accepted guardian.
#[instrument(skip(st))]
pub async fn get(st: &AppState, id: Uuid, viewer_id: Uuid) -> AppResult<Medication> {
    let med = st
        .medications
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Medication not found"))?;
    ensure_access(st, viewer_id, med.owner_id).await?;
    Ok(med)
}

async fn get_owned(st: &AppState, id: Uuid, owner_id: Uuid) -> AppResult<Medication> {
    let med = get(st, id, owner_id).await?;
    if med.owner_id != owner_id {
        return Err(AppError::access_denied("Only the owner may change this medication"));
    }
    Ok(med)
}

#[instrument(skip(st, patch))]
pub async fn update(
    st: &AppState,
    id: Uuid,
    owner_id: Uuid,
    patch: MedicationPatch,
) -> AppResult<Medication> {
    get_owned(st, id, owner_id).await?;
    let med = st
        .medications
        .modify(id, &|med: &mut Medication| patch.apply(med))
        .await?
        .ok_or_else(|| AppError::not_found("Medication not found"))?;
    info!(medication_id = %id, "medication updated");
    Ok(med)
}

#[instrument(skip(st))]
pub async fn delete(st: &AppState, id: Uuid, owner_id: Uuid) -> AppResult<()> {
    get_owned(st, id, owner_id).await?;
    if !st.medications.delete(id).await? {
        return Err(AppError::not_found("Medication not found"));
    }
    info!(medication_id = %id, "medication deleted");
    Ok(())
}

/// Flips one dose between taken and not taken.
///
/// The acting user must own the medication or guard its owner. The change is
/// applied under the store's record lock, so concurrent toggles on the same
/// medication serialize instead of losing updates.
#[instrument(skip(st))]
pub async fn toggle_dose(
    st: &AppState,
    medication_id: Uuid,
    date: Date,
    time: TimeOfDay,
    acting_user: Uuid,
) -> AppResult<Medication> {
    // Ownership never changes, so the access check can run before the locked write.
    get(st, medication_id, acting_user).await?;

    let med = st
        .medications
        .modify(medication_id, &|med: &mut Medication| {
            med.toggle_dose(date, time).map(|_| ())
        })
        .await?
        .ok_or_else(|| AppError::not_found("Medication not found"))?;

    info!(
        %medication_id,
        %date,
        %time,
        taken = med.taken_dates.is_taken(date, time),
        "dose toggled"
    );
    Ok(med)
}
