//! Socket connection manager.
//!
//! One [`SocketManager`] owns at most one logical connection per process.
//! `init` is idempotent — calling it while a connection exists hands back the
//! existing [`SocketHandle`] instead of opening a parallel socket.
//!
//! ## Reconnection
//!
//! The manager reconnects on its own after a server-side disconnect or a
//! transport failure: fixed delay between attempts, capped attempt count,
//! counter reset on every successful connect. Once the cap is hit the
//! manager settles in `Disconnected` and the application falls back to the
//! gateway's REST snapshot endpoints. A client-initiated [`close`] never
//! reconnects.
//!
//! ## Handlers
//!
//! Event callbacks are registered under a key with [`SocketManager::on`].
//! Registering a second callback under the same key replaces the first —
//! nothing stacks, so a re-render or reconnect can re-register without
//! causing duplicate delivery. Remove handlers with [`off`] on teardown so
//! events stop flowing into stale application state.
//!
//! [`close`]: SocketManager::close
//! [`off`]: SocketManager::off

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SdkError;
use crate::event::{ClientEvent, ServerEvent};

/// Configuration for connecting to the gateway.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Websocket URL of the gateway's `/socket` endpoint.
    pub server_url: String,
    /// Bearer token presented in the connection handshake.
    pub token: String,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before settling in `Disconnected`.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:4600/socket".to_string(),
            token: String::new(),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 5,
        }
    }
}

/// Connection lifecycle: `Disconnected → Connecting → Connected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Why a connection attempt or session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the socket.
    ServerDisconnect,
    /// The transport dropped (connect failure, read/write error, EOF).
    TransportClose,
    /// The application called `close()`.
    ClientClose,
}

impl DisconnectReason {
    pub fn qualifies_for_reconnect(self) -> bool {
        !matches!(self, DisconnectReason::ClientClose)
    }
}

/// Pure reconnect decision, kept separate from the IO loop so it can be
/// tested without a network.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the next attempt, or `None` when the loop should settle
    /// in `Disconnected`. `attempts_used` counts reconnects since the last
    /// successful connection.
    pub fn next_delay(&self, reason: DisconnectReason, attempts_used: u32) -> Option<Duration> {
        if !reason.qualifies_for_reconnect() {
            return None;
        }
        if attempts_used >= self.max_attempts {
            return None;
        }
        Some(self.delay)
    }
}

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Debug)]
enum Command {
    Emit(ClientEvent),
    Close,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ConnectionState>,
    handlers: Mutex<HashMap<String, Handler>>,
    closed: AtomicBool,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn dispatch(&self, event: &ServerEvent) {
        // Snapshot under the lock, invoke outside it — a handler may call
        // back into on()/off().
        let handlers: Vec<Handler> = self.handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Cloneable handle for emitting events on the managed connection.
#[derive(Clone)]
pub struct SocketHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl SocketHandle {
    pub async fn emit(&self, event: ClientEvent) -> Result<(), SdkError> {
        self.cmd_tx
            .send(Command::Emit(event))
            .await
            .map_err(|_| SdkError::Closed)
    }

    pub async fn register(&self, user_id: &str) -> Result<(), SdkError> {
        self.emit(ClientEvent::Register {
            user_id: user_id.to_string(),
        })
        .await
    }

    pub async fn get_online_users(&self) -> Result<(), SdkError> {
        self.emit(ClientEvent::GetOnlineUsers {}).await
    }

    pub async fn get_online_friends(&self) -> Result<(), SdkError> {
        self.emit(ClientEvent::GetOnlineFriends {}).await
    }

    pub async fn send_friend_request(&self, target_user_id: &str) -> Result<(), SdkError> {
        self.emit(ClientEvent::SendFriendRequest {
            target_user_id: target_user_id.to_string(),
        })
        .await
    }

    pub async fn accept_friend_request(&self, target_user_id: &str) -> Result<(), SdkError> {
        self.emit(ClientEvent::AcceptFriendRequest {
            target_user_id: target_user_id.to_string(),
        })
        .await
    }
}

/// Owns the process's single logical gateway connection.
#[derive(Default)]
pub struct SocketManager {
    inner: Arc<Inner>,
    handle: Mutex<Option<SocketHandle>>,
}

impl SocketManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the connection, or return the existing handle if one is live.
    pub fn init(&self, config: ConnectConfig) -> SocketHandle {
        let mut slot = self.handle.lock();
        if let Some(handle) = slot.as_ref() {
            tracing::debug!("socket already initialized, reusing connection");
            return handle.clone();
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let handle = SocketHandle { cmd_tx };
        *slot = Some(handle.clone());

        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);
        tokio::spawn(run_connection(Arc::clone(&self.inner), config, cmd_rx));
        handle
    }

    pub fn get(&self) -> Option<SocketHandle> {
        self.handle.lock().clone()
    }

    /// Like [`get`](Self::get), but an error when no connection exists.
    pub fn try_get(&self) -> Result<SocketHandle, SdkError> {
        self.get().ok_or(SdkError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        // A released handle means the manager is down for good (or was
        // never initialized), whatever the task last reported.
        if self.handle.lock().is_none() {
            return ConnectionState::Disconnected;
        }
        self.inner.state()
    }

    /// Client-initiated close: drops straight to `Disconnected`, no
    /// reconnect. A later `init` starts fresh.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.cmd_tx.try_send(Command::Close);
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Register an event callback under `key`, replacing any previous
    /// callback for that key.
    pub fn on<F>(&self, key: &str, handler: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .lock()
            .insert(key.to_string(), Arc::new(handler));
    }

    /// Remove the callback registered under `key`.
    pub fn off(&self, key: &str) {
        self.inner.handlers.lock().remove(key);
    }
}

async fn run_connection(inner: Arc<Inner>, config: ConnectConfig, mut cmd_rx: mpsc::Receiver<Command>) {
    let policy = ReconnectPolicy {
        delay: config.reconnect_delay,
        max_attempts: config.max_reconnect_attempts,
    };
    let mut attempts_used: u32 = 0;

    loop {
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        inner.set_state(ConnectionState::Connecting);
        let reason = connect_once(&inner, &config, &mut cmd_rx, &mut attempts_used).await;

        match policy.next_delay(reason, attempts_used) {
            Some(delay) if !inner.closed.load(Ordering::SeqCst) => {
                attempts_used += 1;
                inner.set_state(ConnectionState::Connecting);
                tracing::info!(
                    attempt = attempts_used,
                    reason = ?reason,
                    "socket lost, reconnecting in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
            _ => {
                if reason.qualifies_for_reconnect() && !inner.closed.load(Ordering::SeqCst) {
                    tracing::warn!(
                        "reconnect attempts exhausted, live presence unavailable"
                    );
                }
                break;
            }
        }
    }

    inner.set_state(ConnectionState::Disconnected);
}

async fn connect_once(
    inner: &Inner,
    config: &ConnectConfig,
    cmd_rx: &mut mpsc::Receiver<Command>,
    attempts_used: &mut u32,
) -> DisconnectReason {
    let url = format!("{}?token={}", config.server_url, config.token);
    let (socket, _response) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!("socket connect failed: {e}");
            return DisconnectReason::TransportClose;
        }
    };

    *attempts_used = 0;
    inner.set_state(ConnectionState::Connected);
    tracing::debug!("socket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => inner.dispatch(&event),
                        Err(e) => tracing::debug!("ignoring undecodable frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) => return DisconnectReason::ServerDisconnect,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("socket transport error: {e}");
                    return DisconnectReason::TransportClose;
                }
                None => return DisconnectReason::TransportClose,
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Emit(event)) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        return DisconnectReason::TransportClose;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return DisconnectReason::ClientClose;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts: 3,
        }
    }

    #[test]
    fn client_close_never_reconnects() {
        assert_eq!(policy().next_delay(DisconnectReason::ClientClose, 0), None);
    }

    #[test]
    fn transport_close_reconnects_until_cap() {
        let p = policy();
        assert!(p.next_delay(DisconnectReason::TransportClose, 0).is_some());
        assert!(p.next_delay(DisconnectReason::TransportClose, 2).is_some());
        assert_eq!(p.next_delay(DisconnectReason::TransportClose, 3), None);
    }

    #[test]
    fn server_disconnect_qualifies() {
        assert!(policy().next_delay(DisconnectReason::ServerDisconnect, 1).is_some());
    }

    #[test]
    fn on_replaces_handler_for_same_key() {
        let manager = SocketManager::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let hits = Arc::clone(&first);
        manager.on("toast", move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = Arc::clone(&second);
        manager.on("toast", move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        manager.inner.dispatch(&ServerEvent::OnlineUsersList { users: vec![] });
        assert_eq!(first.load(Ordering::SeqCst), 0, "replaced handler must not fire");
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_handler() {
        let manager = SocketManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        manager.on("toast", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.off("toast");

        manager.inner.dispatch(&ServerEvent::OnlineUsersList { users: vec![] });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let manager = SocketManager::new();
        let config = ConnectConfig {
            // Nothing listens here; the task fails fast and gives up.
            server_url: "ws://127.0.0.1:1/socket".into(),
            token: "t".into(),
            reconnect_delay: Duration::from_millis(5),
            max_reconnect_attempts: 0,
        };
        let _first = manager.init(config.clone());
        let _second = manager.init(config);
        assert!(manager.get().is_some());
    }

    #[tokio::test]
    async fn exhausted_reconnect_settles_disconnected() {
        let manager = SocketManager::new();
        manager.init(ConnectConfig {
            server_url: "ws://127.0.0.1:1/socket".into(),
            token: "t".into(),
            reconnect_delay: Duration::from_millis(5),
            max_reconnect_attempts: 1,
        });
        // Two failed dials plus one 5 ms backoff.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn close_settles_disconnected() {
        let manager = SocketManager::new();
        manager.init(ConnectConfig {
            server_url: "ws://127.0.0.1:1/socket".into(),
            token: "t".into(),
            reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        });
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.get().is_none(), "close releases the handle");
    }
}
