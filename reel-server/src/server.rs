//! Shared server state and startup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use reel_sdk::event::ServerEvent;

use crate::auth::{Gate, OpenDirectory, SqliteDirectory, UserDirectory};
use crate::config::ServerConfig;
use crate::db::{Db, NewNotification, NotificationRow};
use crate::dispatch::EventDispatcher;
use crate::error::PersistError;
use crate::friends::{FriendshipService, HttpFriendshipService, NoFriends};
use crate::presence::{MemoryPresenceStore, PresenceStore, RedisPresenceStore, SessionRegistry};

/// Shared state accessible by all connection handlers.
pub struct SharedState {
    pub config: ServerConfig,
    pub gate: Gate,
    pub registry: SessionRegistry,
    pub dispatcher: EventDispatcher,
    /// connection_id -> sender for pushing events to that socket.
    pub connections: Mutex<HashMap<String, mpsc::Sender<ServerEvent>>>,
    pub friends: Arc<dyn FriendshipService>,
    /// Database handle (None = push-only, no durable notifications).
    pub db: Option<Arc<Mutex<Db>>>,
    pub started_at: Instant,
}

impl SharedState {
    /// Run a closure with the database, if persistence is enabled.
    /// Logs errors but does not propagate them — persistence failures on
    /// side paths must not break live connections.
    pub fn with_db<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&Db) -> rusqlite::Result<R>,
    {
        self.db.as_ref().and_then(|db| {
            let db = db.lock();
            match f(&db) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::error!("database error: {e}");
                    None
                }
            }
        })
    }

    /// Write a durable notification. Unlike [`with_db`](Self::with_db) this
    /// propagates the failure, because the triggering mutation's caller is
    /// entitled to hear about it. `Ok(None)` means no database is configured.
    pub fn create_notification(
        &self,
        new: &NewNotification<'_>,
    ) -> Result<Option<NotificationRow>, PersistError> {
        match &self.db {
            Some(db) => Ok(Some(db.lock().create_notification(new)?)),
            None => {
                tracing::debug!("no database configured, durable notification skipped");
                Ok(None)
            }
        }
    }
}

pub struct Server {
    config: ServerConfig,
    store: Option<Arc<dyn PresenceStore>>,
    friends: Option<Arc<dyn FriendshipService>>,
    directory: Option<Arc<dyn UserDirectory>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            store: None,
            friends: None,
            directory: None,
        }
    }

    /// Replace the presence store (for testing).
    pub fn with_store(mut self, store: Arc<dyn PresenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the friendship service (for testing).
    pub fn with_friends(mut self, friends: Arc<dyn FriendshipService>) -> Self {
        self.friends = Some(friends);
        self
    }

    /// Replace the user directory (for testing).
    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    async fn build_state(self) -> Result<Arc<SharedState>> {
        let db = match &self.config.db_path {
            Some(path) => {
                tracing::info!("Opening database: {path}");
                let db = Db::open(path)
                    .map_err(|e| anyhow::anyhow!("Failed to open database: {e}"))?;
                Some(Arc::new(Mutex::new(db)))
            }
            None => None,
        };

        let store: Arc<dyn PresenceStore> = match self.store {
            Some(store) => store,
            None => match &self.config.redis_url {
                Some(url) => {
                    let store = RedisPresenceStore::connect(url)
                        .await
                        .with_context(|| format!("Failed to reach presence store at {url}"))?;
                    tracing::info!("Presence store: redis at {url}");
                    Arc::new(store)
                }
                None => {
                    tracing::info!("Presence store: in-memory (single instance only)");
                    Arc::new(MemoryPresenceStore::new())
                }
            },
        };

        let friends: Arc<dyn FriendshipService> = match self.friends {
            Some(friends) => friends,
            None => match &self.config.friends_url {
                Some(url) => Arc::new(HttpFriendshipService::new(url)),
                None => Arc::new(NoFriends),
            },
        };

        let directory: Arc<dyn UserDirectory> = match self.directory {
            Some(directory) => directory,
            None => match &db {
                Some(db) => Arc::new(SqliteDirectory::new(Arc::clone(db))),
                None => Arc::new(OpenDirectory),
            },
        };

        let gate = Gate::new(&self.config.token_secret, directory);
        Ok(Arc::new(SharedState {
            gate,
            registry: SessionRegistry::new(store),
            dispatcher: EventDispatcher::new(),
            connections: Mutex::new(HashMap::new()),
            friends,
            db,
            started_at: Instant::now(),
            config: self.config,
        }))
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let listen_addr = self.config.listen_addr.clone();
        let state = self.build_state().await?;
        let router = crate::web::router(state);
        let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
        tracing::info!("Listening on {listen_addr}");
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Start the server and return the bound address + task handle (for
    /// testing with an OS-assigned port).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listen_addr = self.config.listen_addr.clone();
        let state = self.build_state().await?;
        let router = crate::web::router(state);
        let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await?;
            Ok(())
        });

        Ok((addr, handle))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::auth::MemoryDirectory;
    use crate::friends::StaticFriends;

    /// Build a fully in-memory state for unit tests.
    pub(crate) fn state(friends: Arc<StaticFriends>, with_db: bool) -> Arc<SharedState> {
        let store = Arc::new(MemoryPresenceStore::new());
        let directory = MemoryDirectory::new();
        directory.insert("alice", "Alice");
        directory.insert("bob", "Bob");
        let db = with_db.then(|| Arc::new(Mutex::new(Db::open_memory().unwrap())));
        Arc::new(SharedState {
            config: ServerConfig::default(),
            gate: Gate::new("test-secret", Arc::new(directory)),
            registry: SessionRegistry::new(store),
            dispatcher: EventDispatcher::new(),
            connections: Mutex::new(HashMap::new()),
            friends,
            db,
            started_at: Instant::now(),
        })
    }
}
