//! Notification fan-out.
//!
//! Fan-out is presence-gated and fire-and-forget: resolve the target's
//! active sessions, push to each, and skip silently when there are none.
//! Nothing is queued or retried. Durable persistence, when requested, is an
//! independent effect — it happens whether or not anyone was online, and a
//! failed write never claws back pushes that already went out.

use std::sync::Arc;

use chrono::Utc;

use reel_sdk::event::ServerEvent;

use crate::db::{NewNotification, NotificationRow};
use crate::error::PersistError;
use crate::server::SharedState;

/// Result of one [`notify`] call.
#[derive(Debug)]
pub struct NotifyOutcome {
    /// Pushes that reached a live local connection.
    pub delivered: usize,
    /// The durable record, when persistence was requested and a database is
    /// configured.
    pub record: Option<NotificationRow>,
}

/// Queue an event on one local connection. A missing or saturated channel
/// drops the push — delivery is best-effort by contract.
pub fn send_to_connection(state: &SharedState, connection_id: &str, event: ServerEvent) {
    let Some(tx) = state.connections.lock().get(connection_id).cloned() else {
        tracing::debug!(%connection_id, "no local channel for connection, dropping push");
        return;
    };
    if tx.try_send(event).is_err() {
        tracing::warn!(%connection_id, "send buffer full or closed, dropping push");
    }
}

/// Push one event to every active session of `target_user_id`. Returns how
/// many local connections it reached. Sessions owned by other gateway
/// instances are skipped here — their own process delivers to them.
pub async fn push_to_user(state: &SharedState, target_user_id: &str, event: &ServerEvent) -> usize {
    let sessions = state.registry.list_sessions(target_user_id).await;
    if sessions.is_empty() {
        tracing::debug!(%target_user_id, "delivery miss: no active sessions");
        return 0;
    }
    let mut delivered = 0;
    for connection_id in &sessions {
        let tx = state.connections.lock().get(connection_id).cloned();
        if let Some(tx) = tx
            && tx.try_send(event.clone()).is_ok()
        {
            delivered += 1;
        }
    }
    delivered
}

/// Deliver a notification to a user's live sessions and, if `persist`,
/// write the durable record.
pub async fn notify(
    state: &Arc<SharedState>,
    target_user_id: &str,
    kind: &str,
    message: &str,
    from_user_id: &str,
    metadata: serde_json::Value,
    persist: bool,
) -> Result<NotifyOutcome, PersistError> {
    let event = ServerEvent::Notification {
        kind: kind.to_string(),
        message: message.to_string(),
        from_user_id: from_user_id.to_string(),
        metadata: metadata.clone(),
    };
    let delivered = push_to_user(state, target_user_id, &event).await;

    let record = if persist {
        state
            .create_notification(&NewNotification {
                user_id: target_user_id,
                from_user_id: Some(from_user_id),
                kind,
                message,
                metadata: &metadata,
            })
            .inspect_err(|e| {
                tracing::error!(%target_user_id, delivered, "durable write failed: {e}");
            })?
    } else {
        None
    };

    Ok(NotifyOutcome { delivered, record })
}

/// Tell a user's friends that they came online or went fully offline.
pub async fn broadcast_status(state: &Arc<SharedState>, user_id: &str, is_online: bool) {
    let friends = state.friends.accepted_friend_ids(user_id).await;
    if friends.is_empty() {
        return;
    }
    let event = ServerEvent::UserStatusChanged {
        user_id: user_id.to_string(),
        is_online,
        timestamp: Utc::now(),
    };
    for friend in &friends {
        push_to_user(state, friend, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friends::StaticFriends;
    use crate::server::testing;
    use reel_sdk::event::ServerEvent;
    use tokio::sync::mpsc;

    /// Register a fake local connection and return its receiving end.
    fn attach_connection(
        state: &SharedState,
        connection_id: &str,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(16);
        state
            .connections
            .lock()
            .insert(connection_id.to_string(), tx);
        rx
    }

    #[tokio::test]
    async fn zero_sessions_zero_pushes_one_durable_write() {
        let state = testing::state(Arc::new(StaticFriends::new()), true);

        let outcome = notify(
            &state,
            "alice",
            "review_liked",
            "bob liked your review",
            "bob",
            serde_json::json!({"review_id": 12}),
            true,
        )
        .await
        .unwrap();

        assert_eq!(outcome.delivered, 0);
        let record = outcome.record.expect("durable write must happen anyway");
        assert_eq!(record.kind, "review_liked");

        let stored = state
            .with_db(|db| db.list_notifications("alice", 10))
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn push_reaches_every_session() {
        let state = testing::state(Arc::new(StaticFriends::new()), false);
        state.registry.add_session("alice", "c1").await;
        state.registry.add_session("alice", "c2").await;
        let mut rx1 = attach_connection(&state, "c1");
        let mut rx2 = attach_connection(&state, "c2");

        let outcome = notify(
            &state,
            "alice",
            "watch_party",
            "starting now",
            "bob",
            serde_json::Value::Null,
            false,
        )
        .await
        .unwrap();

        assert_eq!(outcome.delivered, 2);
        assert!(outcome.record.is_none());
        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerEvent::Notification { .. }
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            ServerEvent::Notification { .. }
        ));
    }

    #[tokio::test]
    async fn stale_session_is_skipped_silently() {
        let state = testing::state(Arc::new(StaticFriends::new()), false);
        // Session registered but its connection already tore down.
        state.registry.add_session("alice", "c-stale").await;

        let outcome = notify(
            &state,
            "alice",
            "watch_party",
            "starting now",
            "bob",
            serde_json::Value::Null,
            false,
        )
        .await
        .unwrap();
        assert_eq!(outcome.delivered, 0);
    }

    #[tokio::test]
    async fn persist_without_database_yields_no_record() {
        let state = testing::state(Arc::new(StaticFriends::new()), false);
        let outcome = notify(
            &state,
            "alice",
            "system",
            "hello",
            "reel",
            serde_json::Value::Null,
            true,
        )
        .await
        .unwrap();
        assert!(outcome.record.is_none());
    }

    #[tokio::test]
    async fn status_broadcast_goes_to_friends_sessions_only() {
        let friends = Arc::new(StaticFriends::new());
        friends.befriend("alice", "bob");
        let state = testing::state(friends, false);

        state.registry.add_session("bob", "c-bob").await;
        state.registry.add_session("carol", "c-carol").await;
        let mut bob_rx = attach_connection(&state, "c-bob");
        let mut carol_rx = attach_connection(&state, "c-carol");

        broadcast_status(&state, "alice", true).await;

        match bob_rx.try_recv().unwrap() {
            ServerEvent::UserStatusChanged { user_id, is_online, .. } => {
                assert_eq!(user_id, "alice");
                assert!(is_online);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(carol_rx.try_recv().is_err(), "carol is not a friend");
    }
}
