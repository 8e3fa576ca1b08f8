//! Background Expiry
//!
//! Every `SET` that carries an expiration arms its own background task.
//! The task is independent of the connection that issued the `SET`; it
//! keeps running after that client disconnects.
//!
//! ## Design
//!
//! - **Relative TTL** (`EX` / `PX`): the task sleeps until the deadline on
//!   the monotonic clock, once.
//! - **Absolute deadline** (`EXAT` / `PXAT`): wall-clock time can jump, so
//!   the task polls at a fixed interval until the deadline has passed.
//!
//! Either way the task then removes the key if it is still present,
//! whatever value it holds by then. A key is therefore never removed by its
//! own TTL before that TTL's deadline.

use crate::storage::{Deadline, StorageEngine};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, trace, warn};

/// Configuration for expiry tasks.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Poll interval for absolute deadlines (default: 100ms)
    pub poll_interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Arms expiry tasks against a shared storage engine.
#[derive(Debug, Clone)]
pub struct ExpiryScheduler {
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
}

impl ExpiryScheduler {
    pub fn new(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        Self { engine, config }
    }

    /// Spawns a task that deletes `key` once `deadline` has passed.
    ///
    /// Outside a Tokio runtime nothing is spawned; the key still disappears
    /// on its next access through lazy expiry.
    pub fn arm(&self, key: Bytes, deadline: Deadline) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(key = ?key, "No runtime for expiry task, relying on lazy expiry");
                return;
            }
        };

        let engine = Arc::clone(&self.engine);
        let poll_interval = self.config.poll_interval;

        trace!(key = ?key, deadline = ?deadline, "Arming expiry");
        handle.spawn(async move {
            match deadline {
                Deadline::After(at) => tokio::time::sleep_until(at.into()).await,
                Deadline::At(_) => wait_for_wall_clock(deadline, poll_interval).await,
            }
            expire(&engine, &key);
        });
    }
}

/// Polls until `deadline` passes.
async fn wait_for_wall_clock(deadline: Deadline, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        if deadline.has_passed() {
            return;
        }
    }
}

fn expire(engine: &StorageEngine, key: &Bytes) {
    match engine.expire(key) {
        Ok(true) => debug!(key = ?key, "Deleted record after ttl expired"),
        Ok(false) => trace!(key = ?key, "Record already gone"),
        Err(e) => error!(key = ?key, error = %e, "Could not delete record after ttl expired"),
    }
}
