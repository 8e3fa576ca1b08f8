//! # sider - An In-Memory Key-Value Server with Pub/Sub
//!
//! sider speaks the RESP request format over TCP. It stores binary-safe
//! values under binary-safe keys, expires keys in the background, and
//! fans published messages out to subscribed clients.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              sider                               │
//! │                                                                  │
//! │  ┌────────────┐    ┌─────────────┐    ┌──────────────┐           │
//! │  │ TCP Server │───>│ Connection  │───>│   Scanner +  │           │
//! │  │ (Listener) │    │  Handler    │    │   Grammar    │           │
//! │  └────────────┘    └──────┬──────┘    └──────────────┘           │
//! │                           │                                      │
//! │             store command │ pub/sub command                      │
//! │                ┌──────────┴───────────┐                          │
//! │                ▼                      ▼                          │
//! │  ┌──────────────────────┐   ┌───────────────────┐                │
//! │  │   CommandHandler     │   │      Broker       │                │
//! │  │          │           │   │  topic -> clients │                │
//! │  │          ▼           │   │  client -> queue  │──> delivery    │
//! │  │   StorageEngine <────┼── ExpiryScheduler     │    task per    │
//! │  └──────────────────────┘   └───────────────────┘    client      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sider::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sider::server::ServerError> {
//!     sider::server::start(&Config::default()).await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value [EX s | PX ms | EXAT ts | PXAT ts-ms] [NX | XX] [KEEPTTL] [GET]`
//! - `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `PING [message]`, `ECHO message`
//! - `SUBSCRIBE topic [topic ...]`, `UNSUBSCRIBE topic [topic ...]`
//! - `PUBLISH topic message`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request scanner and reply encoder
//! - [`commands`]: grammar table, parser, typed commands and the store handler
//! - [`storage`]: the key-value store and its expiry tasks
//! - [`pubsub`]: topic subscriptions and per-client delivery
//! - [`connection`]: per-client connection tasks
//! - [`server`]: listener and accept loop
//! - [`config`]: command-line configuration
//!
//! ## Expiry
//!
//! Keys with a deadline disappear in two ways:
//! 1. **Lazy**: a read that finds a passed deadline treats the key as absent
//! 2. **Active**: the background task armed by `SET` removes the key
//!
//! A TTL timer is never cancelled. When it fires it deletes whatever value
//! the key holds at that moment, including one written by a later `SET`.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

pub use commands::{parse_command, Command, CommandError, CommandHandler};
pub use config::{Config, ConfigError};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{RespValue, ScanError};
pub use pubsub::Broker;
pub use server::{Server, ServerError};
pub use storage::{ExpiryConfig, ExpiryScheduler, StorageEngine};

/// The default port sider listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host sider binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of sider
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
