//! Client SDK for the Reel presence and notification gateway.
//!
//! The SDK owns exactly one logical connection per process and hides the
//! reconnect dance from applications:
//!
//! - [`client`] — the [`SocketManager`](client::SocketManager): connect,
//!   bounded reconnect, handler registration, event emission
//! - [`event`] — the wire events exchanged with the gateway
//! - [`feed`] — receiver-side notification list with duplicate collapsing
//!
//! ```no_run
//! use reel_sdk::client::{ConnectConfig, SocketManager};
//!
//! # async fn demo() {
//! let manager = SocketManager::new();
//! manager.on("toast", |event| println!("{event:?}"));
//! let socket = manager.init(ConnectConfig {
//!     server_url: "ws://127.0.0.1:4600/socket".into(),
//!     token: "…".into(),
//!     ..Default::default()
//! });
//! socket.get_online_friends().await.ok();
//! # }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod feed;

pub use client::{ConnectConfig, ConnectionState, SocketHandle, SocketManager};
pub use error::SdkError;
pub use event::{ClientEvent, ServerEvent};
pub use feed::NotificationFeed;
