use std::collections::HashMap;

use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use serde::Serialize;
use time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::repo::{GuardianLink, PendingLink};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
    users::PublicUser,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// 32 bytes from the OS RNG, hex encoded.
fn invitation_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A link joined with the public identity of the other party.
#[derive(Debug, Clone, Serialize)]
pub struct LinkView {
    #[serde(flatten)]
    pub link: GuardianLink,
    pub user: PublicUser,
}

#[instrument(skip(st))]
pub async fn invite(st: &AppState, subject_id: Uuid, guardian_email: &str) -> AppResult<GuardianLink> {
    let email = guardian_email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::invalid("Invalid email"));
    }

    if st.users.find_by_id(subject_id).await?.is_none() {
        return Err(AppError::not_found("User not found"));
    }

    let guardian = st
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::not_found("Guardian user not found"))?;

    if guardian.id == subject_id {
        return Err(AppError::invalid("Cannot add yourself as a guardian"));
    }

    let pending = PendingLink {
        subject_id,
        guardian_id: guardian.id,
        token: invitation_token(),
        expires_at: st.clock.now() + Duration::hours(st.config.invitation_ttl_hours),
    };
    let link = st
        .guardians
        .insert_pending(pending)
        .await?
        .ok_or_else(|| AppError::Conflict("Guardian relationship already exists".into()))?;

    info!(%subject_id, guardian_id = %guardian.id, link_id = %link.id, "guardian invited");
    Ok(link)
}

#[instrument(skip(st, token))]
pub async fn accept(st: &AppState, token: &str, guardian_id: Uuid) -> AppResult<GuardianLink> {
    let Some(link) = st.guardians.find_pending(token, guardian_id).await? else {
        warn!(%guardian_id, "no pending invitation matches token");
        return Err(AppError::not_found("Invalid invitation token"));
    };

    if link.is_expired(st.clock.now()) {
        warn!(%guardian_id, link_id = %link.id, "invitation expired");
        return Err(AppError::Expired("Invitation has expired".into()));
    }

    // Revoked or accepted concurrently: the token no longer matches.
    let accepted = st
        .guardians
        .mark_accepted(link.id, token)
        .await?
        .ok_or_else(|| AppError::not_found("Invalid invitation token"))?;

    info!(%guardian_id, subject_id = %accepted.subject_id, link_id = %accepted.id, "invitation accepted");
    Ok(accepted)
}

#[instrument(skip(st))]
pub async fn revoke(st: &AppState, subject_id: Uuid, guardian_id: Uuid) -> AppResult<()> {
    if !st.guardians.delete_pair(subject_id, guardian_id).await? {
        return Err(AppError::not_found("Guardian relationship not found"));
    }
    info!(%subject_id, %guardian_id, "guardian link removed");
    Ok(())
}

/// All links watching `subject_id`, pending and accepted, with guardian identity.
pub async fn list_guardians_of(st: &AppState, subject_id: Uuid) -> AppResult<Vec<LinkView>> {
    let links = st.guardians.list_by_subject(subject_id).await?;
    join_counterparts(st, links, |l| l.guardian_id).await
}

/// All links where `guardian_id` is the watcher, with subject identity.
pub async fn list_subjects_for(st: &AppState, guardian_id: Uuid) -> AppResult<Vec<LinkView>> {
    let links = st.guardians.list_by_guardian(guardian_id).await?;
    join_counterparts(st, links, |l| l.subject_id).await
}

async fn join_counterparts(
    st: &AppState,
    links: Vec<GuardianLink>,
    counterpart: fn(&GuardianLink) -> Uuid,
) -> AppResult<Vec<LinkView>> {
    let ids: Vec<Uuid> = links.iter().map(counterpart).collect();
    let users: HashMap<Uuid, PublicUser> = st
        .users
        .find_many(&ids)
        .await?
        .iter()
        .map(|u| (u.id, PublicUser::from(u)))
        .collect();

    Ok(links
        .into_iter()
        .filter_map(|link| {
            let id = counterpart(&link);
            match users.get(&id) {
                Some(user) => Some(LinkView {
                    user: user.clone(),
                    link,
                }),
                None => {
                    warn!(link_id = %link.id, user_id = %id, "link references unknown user");
                    None
                }
            }
        })
        .collect())
}

/// Owners may always read; guardians only through an accepted link.
pub async fn can_access(st: &AppState, viewer_id: Uuid, subject_id: Uuid) -> AppResult<bool> {
    if viewer_id == subject_id {
        return Ok(true);
    }
    Ok(st
        .guardians
        .find_pair(subject_id, viewer_id)
        .await?
        .is_some_and(|l| l.is_accepted))
}

pub async fn ensure_access(st: &AppState, viewer_id: Uuid, subject_id: Uuid) -> AppResult<()> {
    if can_access(st, viewer_id, subject_id).await? {
        Ok(())
    } else {
        Err(AppError::access_denied(
            "You do not have access to this medication",
        ))
    }
}

/// The viewer followed by every subject that accepted them as guardian.
pub async fn visible_owners(st: &AppState, viewer_id: Uuid) -> AppResult<Vec<Uuid>> {
    let mut owners = vec![viewer_id];
    owners.extend(
        st.guardians
            .list_by_guardian(viewer_id)
            .await?
            .into_iter()
            .filter(|l| l.is_accepted)
            .map(|l| l.subject_id),
    );
    Ok(owners)
}
