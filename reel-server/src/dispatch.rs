//! Inbound event dispatch.
//!
//! Handlers for a connection are bound exactly once: [`EventDispatcher::bind`]
//! refuses a connection id that already has a live event loop, so a re-entry
//! can never double-bind handlers and double their side effects.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use reel_sdk::event::{ClientEvent, ServerEvent};

use crate::connection::SocketSession;
use crate::fanout;
use crate::presence::SessionRegistry;
use crate::server::SharedState;

/// Tracks which connections have a bound event loop.
#[derive(Default)]
pub struct EventDispatcher {
    bound: Mutex<HashSet<String>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the connection. Returns false if it is already bound, in which
    /// case the caller must not start another event loop.
    pub fn bind(&self, connection_id: &str) -> bool {
        self.bound.lock().insert(connection_id.to_string())
    }

    pub fn release(&self, connection_id: &str) {
        self.bound.lock().remove(connection_id);
    }

    pub fn is_bound(&self, connection_id: &str) -> bool {
        self.bound.lock().contains(connection_id)
    }
}

/// Handle one inbound event on the connection's own turn.
pub async fn dispatch(state: &Arc<SharedState>, session: &SocketSession, event: ClientEvent) {
    match event {
        ClientEvent::Register { user_id } => {
            reconcile_registration(
                &state.registry,
                &session.user_id,
                &user_id,
                &session.connection_id,
            )
            .await;
        }

        ClientEvent::GetOnlineUsers {} => {
            let users = state.registry.list_online_users().await;
            fanout::send_to_connection(
                state,
                &session.connection_id,
                ServerEvent::OnlineUsersList { users },
            );
        }

        ClientEvent::GetOnlineFriends {} => {
            let online: HashSet<String> =
                state.registry.list_online_users().await.into_iter().collect();
            let mut users: Vec<String> = state
                .friends
                .accepted_friend_ids(&session.user_id)
                .await
                .into_iter()
                .filter(|friend| online.contains(friend))
                .collect();
            users.sort();
            fanout::send_to_connection(
                state,
                &session.connection_id,
                ServerEvent::OnlineFriendsList { users },
            );
        }

        ClientEvent::SendFriendRequest { target_user_id } => {
            // Push-only: the durable record comes from the REST mutation.
            let event = ServerEvent::FriendRequestReceived {
                from_user_id: session.user_id.clone(),
                message: format!("{} sent you a friend request", session.username),
            };
            let delivered = fanout::push_to_user(state, &target_user_id, &event).await;
            tracing::debug!(
                from = %session.user_id,
                target = %target_user_id,
                delivered,
                "friend request pushed"
            );
        }

        ClientEvent::AcceptFriendRequest { target_user_id } => {
            let event = ServerEvent::FriendRequestAccepted {
                from_user_id: session.user_id.clone(),
                message: format!("{} accepted your friend request", session.username),
            };
            let delivered = fanout::push_to_user(state, &target_user_id, &event).await;
            tracing::debug!(
                from = %session.user_id,
                target = %target_user_id,
                delivered,
                "friend accept pushed"
            );
        }
    }
}

/// Reconcile a previously declared identity against the authenticated one.
///
/// Corrective bookkeeping only: when they differ, this connection is
/// scrubbed from the legacy user's session set so a stale client cannot
/// keep a ghost identity online. No status broadcast fires — the
/// authenticated identity's presence is untouched.
pub async fn reconcile_registration(
    registry: &SessionRegistry,
    authenticated_user: &str,
    declared_user: &str,
    connection_id: &str,
) {
    if declared_user == authenticated_user {
        tracing::debug!(user_id = %authenticated_user, "register: identity already consistent");
        return;
    }
    if !registry.has_session(declared_user, connection_id).await {
        tracing::debug!(
            declared = %declared_user,
            authenticated = %authenticated_user,
            "register: identity mismatch with no stale bookkeeping"
        );
        return;
    }
    tracing::warn!(
        declared = %declared_user,
        authenticated = %authenticated_user,
        %connection_id,
        "register: declared identity differs from authenticated identity, scrubbing"
    );
    registry.remove_session(declared_user, connection_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{MemoryPresenceStore, PresenceStore};

    #[test]
    fn bind_is_exactly_once() {
        let dispatcher = EventDispatcher::new();
        assert!(dispatcher.bind("c1"));
        assert!(!dispatcher.bind("c1"), "second bind must be refused");
        assert!(dispatcher.is_bound("c1"));

        dispatcher.release("c1");
        assert!(!dispatcher.is_bound("c1"));
        assert!(dispatcher.bind("c1"), "rebind after release is a fresh bind");
    }

    #[test]
    fn distinct_connections_bind_independently() {
        let dispatcher = EventDispatcher::new();
        assert!(dispatcher.bind("c1"));
        assert!(dispatcher.bind("c2"));
    }

    #[tokio::test]
    async fn reconcile_scrubs_legacy_session() {
        let store = Arc::new(MemoryPresenceStore::new());
        let registry = SessionRegistry::new(Arc::clone(&store) as Arc<dyn PresenceStore>);

        // A stale client declared "legacy" earlier; the set still holds the
        // connection under that id.
        registry.add_session("legacy", "c1").await;
        assert!(registry.is_online("legacy").await);

        reconcile_registration(&registry, "alice", "legacy", "c1").await;
        assert!(!registry.is_online("legacy").await);
    }

    #[tokio::test]
    async fn reconcile_is_a_noop_when_consistent() {
        let store = Arc::new(MemoryPresenceStore::new());
        let registry = SessionRegistry::new(Arc::clone(&store) as Arc<dyn PresenceStore>);
        registry.add_session("alice", "c1").await;

        reconcile_registration(&registry, "alice", "alice", "c1").await;
        assert!(registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn reconcile_leaves_unrelated_sessions_alone() {
        let store = Arc::new(MemoryPresenceStore::new());
        let registry = SessionRegistry::new(Arc::clone(&store) as Arc<dyn PresenceStore>);

        // "legacy" is online through a different connection; this one was
        // never recorded under it.
        registry.add_session("legacy", "c-other").await;

        reconcile_registration(&registry, "alice", "legacy", "c1").await;
        assert!(registry.is_online("legacy").await);
    }
}
