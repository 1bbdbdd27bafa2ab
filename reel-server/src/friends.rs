//! Read contract onto the external friendship service.
//!
//! Friendship *data* (requests, accepts, blocks) is owned elsewhere. The
//! gateway only ever asks one question — "who are this user's accepted
//! friends" — to scope presence broadcasts and online-friends queries.
//! Lookup failures degrade to an empty answer.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

#[async_trait]
pub trait FriendshipService: Send + Sync {
    /// Accepted friend ids of `user_id`; empty on error.
    async fn accepted_friend_ids(&self, user_id: &str) -> Vec<String>;
}

// ── HTTP implementation ────────────────────────────────────────────────

#[derive(Deserialize)]
struct FriendIdsResponse {
    friend_ids: Vec<String>,
}

/// Production client: `GET {base}/users/{id}/friends/ids`.
pub struct HttpFriendshipService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFriendshipService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FriendshipService for HttpFriendshipService {
    async fn accepted_friend_ids(&self, user_id: &str) -> Vec<String> {
        let url = format!("{}/users/{user_id}/friends/ids", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%user_id, "friendship lookup failed: {e}");
                return Vec::new();
            }
        };
        if !response.status().is_success() {
            tracing::warn!(%user_id, status = %response.status(), "friendship lookup rejected");
            return Vec::new();
        }
        match response.json::<FriendIdsResponse>().await {
            Ok(body) => body.friend_ids,
            Err(e) => {
                tracing::warn!(%user_id, "friendship response undecodable: {e}");
                Vec::new()
            }
        }
    }
}

// ── Fixed implementations ──────────────────────────────────────────────

/// No friendship service configured: every broadcast has an empty audience.
pub struct NoFriends;

#[async_trait]
impl FriendshipService for NoFriends {
    async fn accepted_friend_ids(&self, _user_id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// In-memory edge set for tests. Edges are bidirectional, like accepted
/// friendships.
#[derive(Default)]
pub struct StaticFriends {
    edges: Mutex<HashMap<String, HashSet<String>>>,
}

impl StaticFriends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn befriend(&self, a: &str, b: &str) {
        let mut edges = self.edges.lock();
        edges.entry(a.to_string()).or_default().insert(b.to_string());
        edges.entry(b.to_string()).or_default().insert(a.to_string());
    }
}

#[async_trait]
impl FriendshipService for StaticFriends {
    async fn accepted_friend_ids(&self, user_id: &str) -> Vec<String> {
        self.edges
            .lock()
            .get(user_id)
            .map(|set| {
                let mut ids: Vec<String> = set.iter().cloned().collect();
                ids.sort();
                ids
            })
            .unwrap_or_default()
    }
}
