//! Command Handler
//!
//! Executes store commands against the [`StorageEngine`] and turns each
//! result into the reply the client receives. Pub/sub commands never reach
//! this handler; the connection routes them to the broker.
//!
//! ## Replies
//!
//! | Command  | Reply                                                    |
//! |----------|----------------------------------------------------------|
//! | `SET`    | `+OK`, nil when `NX`/`XX` suppressed the write, or the previous value with `GET` |
//! | `GET`    | bulk string or nil                                       |
//! | `DEL`    | integer, keys removed                                    |
//! | `EXISTS` | integer, keys present                                    |
//! | `PING`   | `+PONG`, or the message as a bulk string                 |
//! | `ECHO`   | the message as a bulk string                             |

use crate::commands::command::{SetCommand, StoreCommand};
use crate::protocol::RespValue;
use crate::storage::{ExpiryScheduler, SetParams, StorageEngine, StorageError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Executes store commands. Cheap to clone; clones share the same store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    expiry: ExpiryScheduler,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, expiry: ExpiryScheduler) -> Self {
        Self { storage, expiry }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Executes a command and returns the reply.
    pub fn execute(&self, command: StoreCommand) -> RespValue {
        let result = match command {
            StoreCommand::Set(set) => self.cmd_set(set),
            StoreCommand::Get { key } => self.storage.get(&key).map(RespValue::from),
            StoreCommand::Del { keys } => self.storage.delete_many(&keys).map(count),
            StoreCommand::Exists { keys } => self.storage.exists_many(&keys).map(count),
            StoreCommand::Ping { message: None } => Ok(RespValue::pong()),
            StoreCommand::Ping { message: Some(message) } => Ok(RespValue::BulkString(message)),
            StoreCommand::Echo { message } => Ok(RespValue::BulkString(message)),
        };

        result.unwrap_or_else(|e| {
            error!(error = %e, "Storage failure");
            storage_error(&e)
        })
    }

    fn cmd_set(&self, set: SetCommand) -> Result<RespValue, StorageError> {
        let SetCommand {
            key,
            value,
            expiration,
            get,
        } = set;

        let deadline = expiration
            .expiration
            .and_then(|exp| exp.deadline(Instant::now()));
        // KEEPTTL is accepted by the grammar but does not change expiry.
        let params = SetParams {
            condition: expiration.condition(),
            deadline,
        };

        let outcome = self.storage.set_with(key.clone(), value, params)?;

        if let (true, Some(deadline)) = (outcome.written, deadline) {
            self.expiry.arm(key, deadline);
        } else if !outcome.written {
            debug!(key = ?key, condition = ?params.condition, "SET suppressed by condition");
        }

        Ok(match (get, outcome.written) {
            (true, _) => RespValue::from(outcome.previous),
            (false, true) => RespValue::ok(),
            (false, false) => RespValue::null(),
        })
    }
}

fn count(n: u64) -> RespValue {
    RespValue::integer(i64::try_from(n).unwrap_or(i64::MAX))
}

fn storage_error(e: &StorageError) -> RespValue {
    RespValue::error(format!("ERR {}", e))
}
