//! Wire events exchanged with the gateway.
//!
//! Every frame on the socket is a JSON text message of the shape
//! `{"event": "<name>", "data": {...}}`. The server crate consumes these
//! types too, so this module is the single definition of the protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events the gateway pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement, sent once right after the connection is
    /// admitted.
    Connected { user_id: String, status: String },

    /// A friend came online or went fully offline.
    UserStatusChanged {
        user_id: String,
        is_online: bool,
        timestamp: DateTime<Utc>,
    },

    /// Reply to `get_online_users`: the full online snapshot.
    OnlineUsersList { users: Vec<String> },

    /// Reply to `get_online_friends`: accepted friends that are online now.
    OnlineFriendsList { users: Vec<String> },

    FriendRequestReceived {
        from_user_id: String,
        message: String,
    },

    FriendRequestAccepted {
        from_user_id: String,
        message: String,
    },

    /// Generic notification push. `metadata` is an opaque JSON object owned
    /// by the producing feature (review likes, watch parties, ...).
    Notification {
        kind: String,
        message: String,
        from_user_id: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },
}

/// Events clients send to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Reconcile a previously declared identity against the authenticated
    /// one. Corrective bookkeeping only — this is not re-authentication.
    Register { user_id: String },

    GetOnlineUsers {},

    GetOnlineFriends {},

    /// Live push of a friend request. The durable record is written by the
    /// REST mutation, not by this event.
    SendFriendRequest { target_user_id: String },

    AcceptFriendRequest { target_user_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_envelope_shape() {
        let event = ServerEvent::FriendRequestReceived {
            from_user_id: "u-42".into(),
            message: "hana sent you a friend request".into(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["event"], "friend_request_received");
        assert_eq!(json["data"]["from_user_id"], "u-42");
    }

    #[test]
    fn client_event_parses_empty_data() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"get_online_users","data":{}}"#).unwrap();
        assert_eq!(event, ClientEvent::GetOnlineUsers {});
    }

    #[test]
    fn notification_metadata_defaults_to_null() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"event":"notification","data":{"kind":"review_liked","message":"m","from_user_id":"u-1"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Notification { metadata, .. } => assert!(metadata.is_null()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
