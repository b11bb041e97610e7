//! In-memory store implementations backing `AppState::fake()`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    error::AppResult,
    guardians::{GuardianLink, GuardianStore, PendingLink},
    medications::{Medication, MedicationStore, Mutation, NewMedication, TakenLedger},
    users::{User, UserStore},
};

/// Strictly increasing timestamps so "most recently created" is deterministic.
#[derive(Default)]
struct Stamper(Mutex<Option<OffsetDateTime>>);

impl Stamper {
    fn next(&self) -> OffsetDateTime {
        let mut last = self.0.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let stamp = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

#[derive(Default)]
pub struct MemoryUsers {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUsers {
    pub fn add(&self, name: &str, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.to_lowercase(),
            push_address: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.users.lock().unwrap().insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_many(&self, ids: &[Uuid]) -> anyhow::Result<Vec<User>> {
        let users = self.users.lock().unwrap();
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn set_push_address(&self, id: Uuid, address: Option<&str>) -> anyhow::Result<bool> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&id) {
            Some(user) => {
                user.push_address = address.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryMedications {
    meds: Mutex<HashMap<Uuid, Medication>>,
    stamps: Stamper,
    failing: AtomicBool,
}

impl MemoryMedications {
    /// Makes every subsequent read fail, to exercise persistence outages.
    pub fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("medication store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MedicationStore for MemoryMedications {
    async fn insert(&self, new: NewMedication) -> anyhow::Result<Medication> {
        let now = self.stamps.next();
        let med = Medication {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            name: new.name,
            dose: new.dose,
            times: new.times,
            start_date: new.start_date,
            end_date: new.end_date,
            taken_dates: TakenLedger::default(),
            created_at: now,
            updated_at: now,
        };
        self.meds.lock().unwrap().insert(med.id, med.clone());
        Ok(med)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Medication>> {
        self.check()?;
        Ok(self.meds.lock().unwrap().get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: Uuid) -> anyhow::Result<Vec<Medication>> {
        self.check()?;
        let mut out: Vec<Medication> = self
            .meds
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.times
                .first()
                .cmp(&b.times.first())
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }

    async fn list_active_on(
        &self,
        date: Date,
        time_fragment: &str,
    ) -> anyhow::Result<Vec<Medication>> {
        self.check()?;
        Ok(self
            .meds
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.covers(date))
            .filter(|m| {
                let text: Vec<String> = m.times.iter().map(|t| t.to_string()).collect();
                text.join(",").contains(time_fragment)
            })
            .cloned()
            .collect())
    }

    async fn modify(&self, id: Uuid, f: Mutation<'_>) -> AppResult<Option<Medication>> {
        self.check()?;
        let mut meds = self.meds.lock().unwrap();
        let Some(current) = meds.get(&id) else {
            return Ok(None);
        };
        let mut next = current.clone();
        f(&mut next)?;
        next.updated_at = self.stamps.next();
        meds.insert(id, next.clone());
        Ok(Some(next))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.meds.lock().unwrap().remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct MemoryGuardians {
    links: Mutex<Vec<GuardianLink>>,
    stamps: Stamper,
}

#[async_trait]
impl GuardianStore for MemoryGuardians {
    async fn insert_pending(&self, p: PendingLink) -> anyhow::Result<Option<GuardianLink>> {
        let mut links = self.links.lock().unwrap();
        if links
            .iter()
            .any(|l| l.subject_id == p.subject_id && l.guardian_id == p.guardian_id)
        {
            return Ok(None);
        }
        let now = self.stamps.next();
        let link = GuardianLink {
            id: Uuid::new_v4(),
            subject_id: p.subject_id,
            guardian_id: p.guardian_id,
            is_accepted: false,
            invitation_token: Some(p.token),
            invitation_expires_at: Some(p.expires_at),
            created_at: now,
            updated_at: now,
        };
        links.push(link.clone());
        Ok(Some(link))
    }

    async fn find_pending(
        &self,
        token: &str,
        guardian_id: Uuid,
    ) -> anyhow::Result<Option<GuardianLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.invitation_token.as_deref() == Some(token) && l.guardian_id == guardian_id)
            .cloned())
    }

    async fn mark_accepted(&self, id: Uuid, token: &str) -> anyhow::Result<Option<GuardianLink>> {
        let mut links = self.links.lock().unwrap();
        let Some(link) = links
            .iter_mut()
            .find(|l| l.id == id && l.invitation_token.as_deref() == Some(token))
        else {
            return Ok(None);
        };
        link.is_accepted = true;
        link.invitation_token = None;
        link.invitation_expires_at = None;
        link.updated_at = self.stamps.next();
        Ok(Some(link.clone()))
    }

    async fn find_pair(
        &self,
        subject_id: Uuid,
        guardian_id: Uuid,
    ) -> anyhow::Result<Option<GuardianLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.subject_id == subject_id && l.guardian_id == guardian_id)
            .cloned())
    }

    async fn delete_pair(&self, subject_id: Uuid, guardian_id: Uuid) -> anyhow::Result<bool> {
        let mut links = self.links.lock().unwrap();
        let before = links.len();
        links.retain(|l| !(l.subject_id == subject_id && l.guardian_id == guardian_id));
        Ok(links.len() != before)
    }

    async fn list_by_subject(&self, subject_id: Uuid) -> anyhow::Result<Vec<GuardianLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn list_by_guardian(&self, guardian_id: Uuid) -> anyhow::Result<Vec<GuardianLink>> {
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.guardian_id == guardian_id)
            .cloned()
            .collect())
    }
}
