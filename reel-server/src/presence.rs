//! Session registry over an external key/set store.
//!
//! One user may hold several live sessions at once (tabs, devices, multiple
//! gateway instances), so "online" is a property of a *set*: a user is
//! online exactly when their session set is non-empty. The set lives in an
//! external store so the view stays consistent across gateway processes and
//! survives a process restart.
//!
//! Store failures degrade: every operation answers `false`/empty and logs a
//! warning. A healthy connection is never torn down because the store
//! blinked.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

use crate::error::StoreError;

/// Global set of user ids with at least one session.
pub const ONLINE_SET_KEY: &str = "presence:online";

/// Set of connection ids for one user.
pub fn sessions_key(user_id: &str) -> String {
    format!("presence:sessions:{user_id}")
}

/// Hash of presence metadata for one user (`last_seen`).
pub fn meta_key(user_id: &str) -> String {
    format!("presence:meta:{user_id}")
}

/// Hash field holding the RFC 3339 timestamp of the last presence change.
pub const LAST_SEEN_FIELD: &str = "last_seen";

/// Atomic set/hash primitives the registry is built on.
///
/// Atomicity of each operation is the store's job — no process-local lock
/// can coordinate sessions held by different gateway instances.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Add a member; returns whether it was newly added.
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Remove a member; returns whether it was present.
    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn set_size(&self, key: &str) -> Result<u64, StoreError>;
    async fn members_of(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn get_hash_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
}

// ── Redis implementation ───────────────────────────────────────────────

/// Production store backed by Redis sets and hashes.
pub struct RedisPresenceStore {
    manager: ConnectionManager,
}

impl RedisPresenceStore {
    /// Connect with a short timeout and a single retry — a slow store must
    /// not stall connection handling.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(500));

        let client = redis::Client::open(redis_url).map_err(|e| StoreError(e.to_string()))?;
        let manager = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(added > 0)
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn set_size(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.manager.clone();
        let size: i64 = conn
            .scard(key)
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(size.max(0) as u64)
    }

    async fn members_of(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.manager.clone();
        conn.smembers(key)
            .await
            .map_err(|e| StoreError(e.to_string()))
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        conn.sismember(key, member)
            .await
            .map_err(|e| StoreError(e.to_string()))
    }

    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .hset(key, field, value)
            .await
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }

    async fn get_hash_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| StoreError(e.to_string()))
    }
}

// ── In-memory implementation ───────────────────────────────────────────

/// In-memory store for tests and single-instance development.
///
/// `set_unavailable(true)` makes every operation fail, for exercising the
/// degradation paths.
#[derive(Default)]
pub struct MemoryPresenceStore {
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    unavailable: AtomicBool,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn add_to_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self
            .sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        let mut sets = self.sets.lock();
        let removed = sets.get_mut(key).is_some_and(|set| set.remove(member));
        if sets.get(key).is_some_and(|set| set.is_empty()) {
            sets.remove(key);
        }
        Ok(removed)
    }

    async fn set_size(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self.sets.lock().get(key).map_or(0, |set| set.len() as u64))
    }

    async fn members_of(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self
            .sets
            .lock()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.sets.lock().get(key).is_some_and(|set| set.contains(member)))
    }

    async fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.hashes
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn get_hash_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self
            .hashes
            .lock()
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }
}

// ── Session registry ───────────────────────────────────────────────────

/// Authoritative `user → {connection}` bookkeeping.
pub struct SessionRegistry {
    store: Arc<dyn PresenceStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self { store }
    }

    async fn touch_last_seen(&self, user_id: &str) {
        let now = Utc::now().to_rfc3339();
        if let Err(e) = self
            .store
            .set_hash_field(&meta_key(user_id), LAST_SEEN_FIELD, &now)
            .await
        {
            tracing::warn!("last_seen update failed: {e}");
        }
    }

    /// Record a session. Idempotent. Returns true only on the 0→1
    /// transition — the caller broadcasts "online" exactly then.
    pub async fn add_session(&self, user_id: &str, connection_id: &str) -> bool {
        let key = sessions_key(user_id);
        let added = match self.store.add_to_set(&key, connection_id).await {
            Ok(added) => added,
            Err(e) => {
                tracing::warn!(%user_id, "add_session degraded: {e}");
                return false;
            }
        };
        if let Err(e) = self.store.add_to_set(ONLINE_SET_KEY, user_id).await {
            tracing::warn!(%user_id, "online-set update failed: {e}");
        }
        self.touch_last_seen(user_id).await;

        let size = self.store.set_size(&key).await.unwrap_or(0);
        added && size == 1
    }

    /// Drop a session. Returns true only when the user went fully offline
    /// (the set is now empty) — the caller broadcasts "offline" exactly then.
    pub async fn remove_session(&self, user_id: &str, connection_id: &str) -> bool {
        let key = sessions_key(user_id);
        let removed = match self.store.remove_from_set(&key, connection_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(%user_id, "remove_session degraded: {e}");
                return false;
            }
        };
        let size = match self.store.set_size(&key).await {
            Ok(size) => size,
            Err(e) => {
                // Can't prove the set is empty — don't claim offline.
                tracing::warn!(%user_id, "set_size degraded: {e}");
                return false;
            }
        };
        if size == 0 {
            if let Err(e) = self.store.remove_from_set(ONLINE_SET_KEY, user_id).await {
                tracing::warn!(%user_id, "online-set removal failed: {e}");
            }
            self.touch_last_seen(user_id).await;
        }
        removed && size == 0
    }

    /// Whether a specific connection is recorded for the user.
    pub async fn has_session(&self, user_id: &str, connection_id: &str) -> bool {
        match self
            .store
            .is_member(&sessions_key(user_id), connection_id)
            .await
        {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(%user_id, "has_session degraded: {e}");
                false
            }
        }
    }

    /// Online exactly when the session set is non-empty.
    pub async fn is_online(&self, user_id: &str) -> bool {
        match self.store.set_size(&sessions_key(user_id)).await {
            Ok(size) => size > 0,
            Err(e) => {
                tracing::warn!(%user_id, "is_online degraded to offline: {e}");
                false
            }
        }
    }

    pub async fn list_sessions(&self, user_id: &str) -> Vec<String> {
        match self.store.members_of(&sessions_key(user_id)).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(%user_id, "list_sessions degraded to empty: {e}");
                Vec::new()
            }
        }
    }

    pub async fn list_online_users(&self) -> Vec<String> {
        match self.store.members_of(ONLINE_SET_KEY).await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!("list_online_users degraded to empty: {e}");
                Vec::new()
            }
        }
    }

    pub async fn last_seen(&self, user_id: &str) -> Option<String> {
        match self
            .store
            .get_hash_field(&meta_key(user_id), LAST_SEEN_FIELD)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%user_id, "last_seen lookup degraded: {e}");
                None
            }
        }
    }
}
