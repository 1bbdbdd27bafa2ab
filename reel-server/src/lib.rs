//! Presence and notification gateway for the Reel movie community.
//!
//! The CRUD side of the product (movies, reviews, ratings, library,
//! wishlist) lives in a separate service. This crate owns the real-time
//! half: who is online right now, and pushing events to exactly the right
//! live connections.
//!
//! - [`auth`] — connection gate: bearer-token validation + directory lookup
//! - [`presence`] — session registry over an external key/set store
//! - [`dispatch`] — inbound event dispatch, bound once per connection
//! - [`fanout`] — push fan-out with optional durable persistence
//! - [`connection`] — per-socket reader/writer loop and teardown
//! - [`web`] — axum router: the `/socket` upgrade and the REST surface
//! - [`db`] — SQLite user directory and durable notifications
//! - [`friends`] — read contract onto the external friendship service

pub mod auth;
pub mod config;
pub mod connection;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod friends;
pub mod presence;
pub mod server;
pub mod web;
