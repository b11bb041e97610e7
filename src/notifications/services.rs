use std::collections::BTreeMap;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::push::{Priority, PushMessage};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// Registers (or replaces) the device address reminders are delivered to.
#[instrument(skip(st, address))]
pub async fn update_push_address(st: &AppState, user_id: Uuid, address: &str) -> AppResult<()> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AppError::invalid("push address must not be empty"));
    }
    if !st.users.set_push_address(user_id, Some(address)).await? {
        return Err(AppError::not_found("User not found"));
    }
    info!(%user_id, "push address registered");
    Ok(())
}

#[instrument(skip(st))]
pub async fn clear_push_address(st: &AppState, user_id: Uuid) -> AppResult<()> {
    if !st.users.set_push_address(user_id, None).await? {
        return Err(AppError::not_found("User not found"));
    }
    info!(%user_id, "push address cleared");
    Ok(())
}

/// Sends one ad-hoc notification to a user's registered device.
#[instrument(skip(st, title, body, data))]
pub async fn send_manual(
    st: &AppState,
    user_id: Uuid,
    title: &str,
    body: &str,
    data: BTreeMap<String, String>,
) -> AppResult<()> {
    let user = st
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let address = user
        .push_address
        .ok_or_else(|| AppError::not_found("User has no push address"))?;

    let msg = PushMessage {
        address,
        title: title.to_string(),
        body: body.to_string(),
        data,
        priority: Priority::Normal,
    };
    st.push.send(&msg).await.map_err(|e| {
        warn!(%user_id, error = %e, "manual push failed");
        AppError::Gateway(e.to_string())
    })?;
    info!(%user_id, "manual push sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserStore;

    #[tokio::test]
    async fn push_address_lifecycle() {
        let (st, fakes) = AppState::fake();
        let alice = fakes.users.add("Alice", "alice@example.com");

        update_push_address(&st, alice.id, " device-1 ").await.unwrap();
        let stored = fakes.users.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.push_address.as_deref(), Some("device-1"));

        update_push_address(&st, alice.id, "device-2").await.unwrap();
        let stored = fakes.users.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.push_address.as_deref(), Some("device-2"));

        clear_push_address(&st, alice.id).await.unwrap();
        let stored = fakes.users.find_by_id(alice.id).await.unwrap().unwrap();
        assert!(stored.push_address.is_none());
    }

    #[tokio::test]
    async fn push_address_errors() {
        let (st, fakes) = AppState::fake();
        let alice = fakes.users.add("Alice", "alice@example.com");

        let err = update_push_address(&st, alice.id, "   ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        let err = update_push_address(&st, Uuid::new_v4(), "device").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = clear_push_address(&st, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn manual_send_delivers_to_registered_device() {
        let (st, fakes) = AppState::fake();
        let alice = fakes.users.add("Alice", "alice@example.com");
        update_push_address(&st, alice.id, "device-1").await.unwrap();

        let data = BTreeMap::from([("kind".to_string(), "test".to_string())]);
        send_manual(&st, alice.id, "Hello", "Just checking", data.clone())
            .await
            .unwrap();

        let sent = fakes.push.delivered();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].address, "device-1");
        assert_eq!(sent[0].title, "Hello");
        assert_eq!(sent[0].data, data);
    }

    #[tokio::test]
    async fn manual_send_errors() {
        let (st, fakes) = AppState::fake();
        let alice = fakes.users.add("Alice", "alice@example.com");

        let err = send_manual(&st, alice.id, "t", "b", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = send_manual(&st, Uuid::new_v4(), "t", "b", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(fakes.push.attempts().is_empty());

        update_push_address(&st, alice.id, "device-1").await.unwrap();
        fakes.push.fail_for("device-1");
        let err = send_manual(&st, alice.id, "t", "b", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
    }
}
