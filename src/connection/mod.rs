//! Client Connections
//!
//! One task per accepted client reads requests and answers them. The
//! client's write half is shared with its pub/sub delivery task through a
//! [`ReplyWriter`].
//!
//! ```text
//!  TcpListener ──accept──> ConnectionHandler (one task per client)
//!                              │        │
//!                  store cmds  │        │  pub/sub cmds
//!                              ▼        ▼
//!                     CommandHandler   Broker ──> delivery task
//!                              │        │                │
//!                              └──> ReplyWriter <────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use sider::connection::{handle_connection, ConnectionStats};
//! use sider::commands::CommandHandler;
//! use sider::pubsub::Broker;
//! use sider::storage::{ExpiryConfig, ExpiryScheduler, StorageEngine};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let expiry = ExpiryScheduler::new(Arc::clone(&storage), ExpiryConfig::default());
//! let handler = CommandHandler::new(storage, expiry);
//! let broker = Arc::new(Broker::new());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler, broker, stats));
//! ```

pub mod handler;
pub mod writer;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use writer::ReplyWriter;
