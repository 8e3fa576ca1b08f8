//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the key/value map behind every data command.
//!
//! ## Design Decisions
//!
//! 1. **One Lock**: The whole map sits behind a single `Mutex`. Every read and
//!    write is one critical section, which keeps SET/GET/DEL/EXISTS
//!    linearizable without any per-key coordination.
//! 2. **Expiry Deletes**: An expiry task removes whatever the key holds
//!    once its deadline has passed, including a value written after the
//!    TTL was armed.
//! 3. **Lazy Expiry**: A record past its deadline is treated as absent on
//!    access, so a key is never visible after its deadline even if its
//!    expiry task has not run yet.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               StorageEngine                 │
//! │  ┌───────────────────────────────────────┐  │
//! │  │ Mutex<HashMap<Bytes, Entry>>          │  │
//! │  └───────────────────────────────────────┘  │
//! └─────────────▲───────────────────▲───────────┘
//!               │                   │
//!      connection tasks      expiry tasks
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Instant, SystemTime};
use thiserror::Error;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A thread panicked while holding the store lock
    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The point at which a record stops being visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Relative TTL (`EX` / `PX`), measured on the monotonic clock
    After(Instant),
    /// Absolute wall-clock time (`EXAT` / `PXAT`)
    At(SystemTime),
}

impl Deadline {
    /// True once the deadline has been reached.
    #[inline]
    pub fn has_passed(&self) -> bool {
        match self {
            Deadline::After(at) => Instant::now() >= *at,
            Deadline::At(at) => SystemTime::now() >= *at,
        }
    }
}

/// A stored value with its optional deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    pub deadline: Option<Deadline>,
}

impl Entry {
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| d.has_passed()).unwrap_or(false)
    }
}

/// Write policy for [`StorageEngine::set_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SetCondition {
    #[default]
    Always,
    /// Only overwrite an existing key (`XX`)
    IfExists,
    /// Only create a missing key (`NX`)
    IfNotExists,
}

/// Parameters of a conditional write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetParams {
    pub condition: SetCondition,
    pub deadline: Option<Deadline>,
}

/// What a conditional write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// Value the key held before the write, read in the same critical section
    pub previous: Option<Bytes>,
    /// False when the condition suppressed the write
    pub written: bool,
}

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: usize,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
}

/// The storage engine shared by all connections and expiry tasks.
///
/// # Example
///
/// ```
/// use sider::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Bytes::from("alice")).unwrap();
/// assert_eq!(engine.get(b"name").unwrap(), Some(Bytes::from("alice")));
/// assert_eq!(engine.delete_many(&[Bytes::from("name")]).unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct StorageEngine {
    data: Mutex<HashMap<Bytes, Entry>>,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
}

impl StorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, HashMap<Bytes, Entry>>> {
        self.data.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Removes `key` if its deadline has passed; returns the live entry.
    fn live<'m>(&self, data: &'m mut HashMap<Bytes, Entry>, key: &[u8]) -> Option<&'m Entry> {
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        data.get(key)
    }

    /// Unconditional write without expiry. Returns the previous value.
    pub fn set(&self, key: Bytes, value: Bytes) -> StorageResult<Option<Bytes>> {
        self.set_with(key, value, SetParams::default())
            .map(|outcome| outcome.previous)
    }

    /// Writes `value` under `key` subject to `params.condition`.
    ///
    /// The previous value is read before the write inside the same critical
    /// section, so it is exactly the value this write replaced.
    pub fn set_with(&self, key: Bytes, value: Bytes, params: SetParams) -> StorageResult<SetOutcome> {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        let mut data = self.lock()?;

        let previous = self.live(&mut data, &key).cloned();
        let exists = previous.is_some();

        let allowed = match params.condition {
            SetCondition::Always => true,
            SetCondition::IfExists => exists,
            SetCondition::IfNotExists => !exists,
        };

        let previous = previous.map(|e| e.value);
        if !allowed {
            return Ok(SetOutcome {
                previous,
                written: false,
            });
        }

        data.insert(
            key,
            Entry {
                value,
                deadline: params.deadline,
            },
        );

        Ok(SetOutcome {
            previous,
            written: true,
        })
    }

    /// Gets the value for a key, `None` if absent or expired.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        let mut data = self.lock()?;
        Ok(self.live(&mut data, key).map(|e| e.value.clone()))
    }

    /// Gets the full entry for a key.
    pub fn get_entry(&self, key: &[u8]) -> StorageResult<Option<Entry>> {
        let mut data = self.lock()?;
        Ok(self.live(&mut data, key).cloned())
    }

    /// Deletes keys, counting each one that existed right before its removal.
    pub fn delete_many(&self, keys: &[Bytes]) -> StorageResult<u64> {
        let mut data = self.lock()?;
        let mut count = 0;

        for key in keys {
            self.del_count.fetch_add(1, Ordering::Relaxed);
            if self.live(&mut data, key).is_some() {
                count += 1;
            }
            data.remove(key);
        }

        Ok(count)
    }

    /// Counts how many of the given keys are present. Repeats count twice.
    pub fn exists_many(&self, keys: &[Bytes]) -> StorageResult<u64> {
        let mut data = self.lock()?;
        Ok(keys
            .iter()
            .filter(|key| self.live(&mut data, key).is_some())
            .count() as u64)
    }

    pub fn exists(&self, key: &[u8]) -> StorageResult<bool> {
        let mut data = self.lock()?;
        Ok(self.live(&mut data, key).is_some())
    }

    /// Removes `key` if present. Returns whether anything was removed.
    ///
    /// Called by expiry tasks once the deadline they were armed with has
    /// passed.
    pub fn expire(&self, key: &[u8]) -> StorageResult<bool> {
        let mut data = self.lock()?;
        if data.remove(key).is_some() {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return Ok(true);
        }
        Ok(false)
    }

    /// Number of records held, including expired ones not yet reclaimed.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len().unwrap_or(0),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();

        assert_eq!(engine.set(b("name"), b("alice")).unwrap(), None);
        assert_eq!(engine.get(b"name").unwrap(), Some(b("alice")));
        assert_eq!(engine.get(b"missing").unwrap(), None);
    }

    #[test]
    fn test_set_overwrite_returns_previous() {
        let engine = StorageEngine::new();

        engine.set(b("k"), b("old")).unwrap();
        assert_eq!(engine.set(b("k"), b("new")).unwrap(), Some(b("old")));
        assert_eq!(engine.get(b"k").unwrap(), Some(b("new")));
    }

    #[test]
    fn test_set_if_not_exists() {
        let engine = StorageEngine::new();
        let nx = SetParams {
            condition: SetCondition::IfNotExists,
            ..Default::default()
        };

        let first = engine.set_with(b("k"), b("v1"), nx).unwrap();
        assert!(first.written);

        let second = engine.set_with(b("k"), b("v2"), nx).unwrap();
        assert!(!second.written);
        assert_eq!(second.previous, Some(b("v1")));
        assert_eq!(engine.get(b"k").unwrap(), Some(b("v1")));
    }

    #[test]
    fn test_set_if_exists() {
        let engine = StorageEngine::new();
        let xx = SetParams {
            condition: SetCondition::IfExists,
            ..Default::default()
        };

        let outcome = engine.set_with(b("k"), b("v"), xx).unwrap();
        assert!(!outcome.written);
        assert_eq!(engine.get(b"k").unwrap(), None);

        engine.set(b("k"), b("v1")).unwrap();
        assert!(engine.set_with(b("k"), b("v2"), xx).unwrap().written);
        assert_eq!(engine.get(b"k").unwrap(), Some(b("v2")));
    }

    #[test]
    fn test_overwrite_replaces_deadline() {
        let engine = StorageEngine::new();
        let deadline = Deadline::After(Instant::now() + Duration::from_secs(60));
        let params = SetParams {
            deadline: Some(deadline),
            ..Default::default()
        };
        engine.set_with(b("k"), b("a"), params).unwrap();
        assert_eq!(engine.get_entry(b"k").unwrap().unwrap().deadline, Some(deadline));

        engine.set(b("k"), b("b")).unwrap();
        let entry = engine.get_entry(b"k").unwrap().unwrap();
        assert_eq!(entry.value, b("b"));
        assert_eq!(entry.deadline, None);
    }

    #[test]
    fn test_lazy_expiry_hides_key_after_deadline() {
        let engine = StorageEngine::new();
        let params = SetParams {
            deadline: Some(Deadline::After(Instant::now() + Duration::from_millis(20))),
            ..Default::default()
        };
        engine.set_with(b("k"), b("v"), params).unwrap();
        assert!(engine.exists(b"k").unwrap());

        thread::sleep(Duration::from_millis(40));

        assert!(!engine.exists(b"k").unwrap());
        assert_eq!(engine.get(b"k").unwrap(), None);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_absolute_deadline_in_past_is_absent() {
        let engine = StorageEngine::new();
        let params = SetParams {
            deadline: Some(Deadline::At(SystemTime::now() - Duration::from_secs(1))),
            ..Default::default()
        };
        engine.set_with(b("k"), b("v"), params).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_expire_removes_whatever_is_present() {
        let engine = StorageEngine::new();
        engine.set(b("k"), b("a")).unwrap();
        engine.set(b("k"), b("b")).unwrap();

        assert!(engine.expire(b"k").unwrap());
        assert_eq!(engine.get(b"k").unwrap(), None);
        assert!(!engine.expire(b"k").unwrap());
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_delete_many_counts_existing() {
        let engine = StorageEngine::new();
        engine.set(b("key1"), b("value1")).unwrap();
        engine.set(b("key2"), b("value2")).unwrap();

        let keys = vec![b("key1"), b("key2"), b("key3"), b("key1")];
        assert_eq!(engine.delete_many(&keys).unwrap(), 2);
        assert!(engine.is_empty().unwrap());
    }

    #[test]
    fn test_exists_many() {
        let engine = StorageEngine::new();
        engine.set(b("a"), b("1")).unwrap();

        let keys = vec![b("a"), b("b"), b("a")];
        assert_eq!(engine.exists_many(&keys).unwrap(), 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let engine = Arc::new(StorageEngine::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = Bytes::from(format!("key:{}:{}", t, i));
                        engine.set(key.clone(), Bytes::from("v")).unwrap();
                        assert!(engine.exists(&key).unwrap());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len().unwrap(), 4000);
        assert_eq!(engine.stats().set_ops, 4000);
    }
}
