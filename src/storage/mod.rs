//! Storage Engine Module
//!
//! The in-memory key/value map and the background tasks that expire keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               StorageEngine                 │
//! │        Mutex<HashMap<Bytes, Entry>>         │
//! └─────────────────────▲───────────────────────┘
//!                       │ expire()        
//!          ┌────────────┴────────────┐
//!          │   ExpiryScheduler       │
//!          │  (one task per TTL)     │
//!          └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use sider::storage::{Deadline, SetParams, StorageEngine};
//! use bytes::Bytes;
//! use std::time::{Duration, Instant};
//!
//! let engine = StorageEngine::new();
//! let outcome = engine
//!     .set_with(
//!         Bytes::from("session"),
//!         Bytes::from("token123"),
//!         SetParams {
//!             deadline: Some(Deadline::After(Instant::now() + Duration::from_secs(3600))),
//!             ..Default::default()
//!         },
//!     )
//!     .unwrap();
//! assert!(outcome.written);
//! ```

pub mod engine;
pub mod expiry;

pub use engine::{
    Deadline, Entry, SetCondition, SetOutcome, SetParams, StorageEngine, StorageError,
    StorageResult, StorageStats,
};
pub use expiry::{ExpiryConfig, ExpiryScheduler};
