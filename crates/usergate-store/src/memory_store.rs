//! In-process key-value store
//!
//! Single-node only: counters kept here are not shared between instances.
//! Used by tests and by `STORE_BACKEND=memory` development setups. Expiry is
//! evaluated lazily against the injected clock, so tests can move time forward.

use super::{KeyValueStore, Result, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use usergate_core::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Int(i64),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| at > now_ms)
    }
}

/// In-memory store
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remaining TTL of a key, if it exists and has one
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock().await;
        let entry = entries.get(key).filter(|e| e.is_live(now))?;
        entry
            .expires_at_ms
            .map(|at| Duration::from_millis((at - now).max(0) as u64))
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_ms().saturating_add(ttl.as_millis() as i64)
    }
}

/// Drop the key if it has expired, returning the live entry otherwise
fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now_ms: i64,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now_ms)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::Int(n)) => Ok(Some(n.to_string())),
            Some(Value::Hash(_)) => Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "expected string, found hash".to_string(),
            }),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let entry = Entry {
            value: Value::Str(value.to_string()),
            expires_at_ms: Some(self.expiry(ttl)),
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let expires_at_ms = Some(self.expiry(ttl));
        let mut entries = self.entries.lock().await;
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at_ms,
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().await;
        Ok(live_entry(&mut entries, key, now).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let expires_at_ms = Some(self.expiry(ttl));
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at_ms = expires_at_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64, window: Option<Duration>) -> Result<i64> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let expiry = window.map(|w| self.expiry(w));
        let mut entries = self.entries.lock().await;

        let Some(entry) = live_entry(&mut entries, key, now) else {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Int(delta),
                    expires_at_ms: expiry,
                },
            );
            return Ok(delta);
        };

        let current = match &entry.value {
            Value::Int(n) => *n,
            Value::Str(s) => s.parse::<i64>().map_err(|_| StoreError::Corrupt {
                key: key.to_string(),
                reason: "value is not an integer".to_string(),
            })?,
            Value::Hash(_) => {
                return Err(StoreError::Corrupt {
                    key: key.to_string(),
                    reason: "expected integer, found hash".to_string(),
                })
            }
        };

        let next = current.saturating_add(delta);
        entry.value = Value::Int(next);
        if entry.expires_at_ms.is_none() {
            entry.expires_at_ms = expiry;
        }
        Ok(next)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let expires_at_ms = Some(self.expiry(ttl));
        let mut entries = self.entries.lock().await;

        match live_entry(&mut entries, key, now) {
            Some(entry) => {
                let Value::Hash(map) = &mut entry.value else {
                    return Err(StoreError::Corrupt {
                        key: key.to_string(),
                        reason: "expected hash".to_string(),
                    });
                };
                map.insert(field.to_string(), value.to_string());
                entry.expires_at_ms = expires_at_ms;
            }
            None => {
                let mut map = HashMap::new();
                map.insert(field.to_string(), value.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(map),
                        expires_at_ms,
                    },
                );
            }
        }
        Ok(())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64> {
        self.check_available()?;
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.is_live(now));
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).count() as u64)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
