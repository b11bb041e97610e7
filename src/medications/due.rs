use time::Date;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::model::{Medication, TimeOfDay};
use crate::{error::AppResult, state::AppState};

/// Owner details a reminder needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueOwner {
    pub id: Uuid,
    pub name: String,
    pub push_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DueMedication {
    pub medication: Medication,
    pub owner: DueOwner,
}

/// Every medication with a dose scheduled at exactly `time` on `date` that is
/// inside its window and not yet marked taken, joined with its owner.
#[instrument(skip(st))]
pub async fn find_due(st: &AppState, time: TimeOfDay, date: Date) -> AppResult<Vec<DueMedication>> {
    // The store filter is a text prefilter; slot membership is re-checked exactly.
    let candidates = st
        .medications
        .list_active_on(date, &time.to_string())
        .await?;
    let due: Vec<Medication> = candidates
        .into_iter()
        .filter(|m| m.is_due(date, time))
        .collect();
    if due.is_empty() {
        return Ok(Vec::new());
    }

    let mut owner_ids: Vec<Uuid> = due.iter().map(|m| m.owner_id).collect();
    owner_ids.sort_unstable();
    owner_ids.dedup();
    let owners = st.users.find_many(&owner_ids).await?;

    let mut out = Vec::with_capacity(due.len());
    for medication in due {
        let Some(user) = owners.iter().find(|u| u.id == medication.owner_id) else {
            warn!(medication_id = %medication.id, owner_id = %medication.owner_id, "due medication has no owner");
            continue;
        };
        out.push(DueMedication {
            owner: DueOwner {
                id: user.id,
                name: user.name.clone(),
                push_address: user.push_address.clone(),
            },
            medication,
        });
    }
    debug!(count = out.len(), "due medications resolved");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medications::{model::parse_times, model::tests::t, services, NewMedication};
    use crate::users::UserStore;
    use time::macros::date;

    async fn seed(st: &AppState, owner_id: Uuid, name: &str, times: &[&str]) -> Medication {
        services::create(
            st,
            NewMedication {
                owner_id,
                name: name.into(),
                dose: "1 tablet".into(),
                times: parse_times(times).unwrap(),
                start_date: date!(2024 - 01 - 01),
                end_date: date!(2024 - 01 - 10),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn morning_and_evening_slots() {
        let (st, fakes) = AppState::fake();
        let owner = fakes.users.add("Alice", "alice@example.com");
        fakes.users.set_push_address(owner.id, Some("device-1")).await.unwrap();
        let med = seed(&st, owner.id, "Aspirin", &["08:00", "20:00"]).await;
        let day = date!(2024 - 01 - 05);

        let due = find_due(&st, t("08:00"), day).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].medication.id, med.id);
        assert_eq!(due[0].owner.name, "Alice");
        assert_eq!(due[0].owner.push_address.as_deref(), Some("device-1"));

        assert!(find_due(&st, t("12:00"), day).await.unwrap().is_empty());
        assert_eq!(find_due(&st, t("20:00"), day).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn taken_doses_are_excluded_only_for_their_slot() {
        let (st, fakes) = AppState::fake();
        let owner = fakes.users.add("Alice", "alice@example.com");
        let med = seed(&st, owner.id, "Aspirin", &["08:00", "20:00"]).await;
        let day = date!(2024 - 01 - 05);

        services::toggle_dose(&st, med.id, day, t("08:00"), owner.id)
            .await
            .unwrap();
        assert!(find_due(&st, t("08:00"), day).await.unwrap().is_empty());
        assert_eq!(find_due(&st, t("20:00"), day).await.unwrap().len(), 1);
        assert_eq!(
            find_due(&st, t("08:00"), date!(2024 - 01 - 06)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn window_bounds_are_inclusive() {
        let (st, fakes) = AppState::fake();
        let owner = fakes.users.add("Alice", "alice@example.com");
        seed(&st, owner.id, "Aspirin", &["08:00"]).await;

        for day in [date!(2024 - 01 - 01), date!(2024 - 01 - 10)] {
            assert_eq!(find_due(&st, t("08:00"), day).await.unwrap().len(), 1);
        }
        for day in [date!(2023 - 12 - 31), date!(2024 - 01 - 11)] {
            assert!(find_due(&st, t("08:00"), day).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn prefilter_matches_are_rechecked_exactly() {
        let (st, fakes) = AppState::fake();
        let owner = fakes.users.add("Alice", "alice@example.com");
        seed(&st, owner.id, "Aspirin", &["08:00", "18:00"]).await;
        let day = date!(2024 - 01 - 05);

        assert_eq!(find_due(&st, t("18:00"), day).await.unwrap().len(), 1);
        assert!(find_due(&st, t("08:01"), day).await.unwrap().is_empty());
        assert!(find_due(&st, t("10:00"), day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn owners_without_address_are_still_reported() {
        let (st, fakes) = AppState::fake();
        let alice = fakes.users.add("Alice", "alice@example.com");
        let bob = fakes.users.add("Bob", "bob@example.com");
        seed(&st, alice.id, "Aspirin", &["08:00"]).await;
        seed(&st, bob.id, "Ibuprofen", &["08:00"]).await;
        seed(&st, bob.id, "Vitamin D", &["08:00"]).await;

        let due = find_due(&st, t("08:00"), date!(2024 - 01 - 05)).await.unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.iter().all(|d| d.owner.push_address.is_none()));
        assert_eq!(due.iter().filter(|d| d.owner.id == bob.id).count(), 2);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let (st, fakes) = AppState::fake();
        fakes.medications.fail_reads(true);
        assert!(find_due(&st, t("08:00"), date!(2024 - 01 - 05)).await.is_err());
    }
}
