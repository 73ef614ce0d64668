//! Session registry: one live session entry per user in a shared TTL store.
//!
//! The key is derived from the user id (`session-<userId>`), so a second login
//! for the same user collides with the first. Every store call carries a bounded
//! timeout; callers treat a timeout as "unknown" and fail closed.

pub mod memory;
pub mod redis_store;
pub mod store;

pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use store::{SessionStore, StoreFuture};

use std::{collections::BTreeMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

pub const SESSION_KEY_PREFIX: &str = "session-";
const SCAN_BATCH: usize = 100;

#[must_use]
pub fn session_key(user_id: &Uuid) -> String {
    format!("{SESSION_KEY_PREFIX}{user_id}")
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0:#}")]
    Store(anyhow::Error),
    #[error("session store timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    op_timeout: Duration,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, op_timeout: Duration) -> Self {
        Self { store, op_timeout }
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        future: StoreFuture<'_, T>,
    ) -> Result<T, SessionError> {
        let span = info_span!("session.store", db.system = "redis", db.operation = operation);
        match timeout(self.op_timeout, future).instrument(span).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(SessionError::Store(err)),
            Err(_) => Err(SessionError::Timeout(self.op_timeout)),
        }
    }

    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn exists(&self, key: &str) -> Result<bool, SessionError> {
        self.call("EXISTS", self.store.exists(key)).await
    }

    /// Drop any entry under `key` and install a fresh one, so the TTL restarts
    /// now instead of extending a decaying one. Used for sliding renewal.
    ///
    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn refresh(
        &self,
        key: &str,
        user_id: &Uuid,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let value = user_id.to_string();
        self.call("DEL+SET", self.store.replace(key, &value, ttl_seconds(ttl)))
            .await
    }

    /// Install a session only if none is live for `key`, in one round trip.
    /// Returns `false` when another session already holds the key.
    ///
    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn install_exclusive(
        &self,
        key: &str,
        user_id: &Uuid,
        ttl: Duration,
    ) -> Result<bool, SessionError> {
        let value = user_id.to_string();
        self.call(
            "SET NX",
            self.store.set_if_absent(key, &value, ttl_seconds(ttl)),
        )
        .await
    }

    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.call("DEL", self.store.delete(key)).await
    }

    /// Every live session as `session key -> user id`. Keys that expire between
    /// the scan and the value fetch are skipped.
    ///
    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn list_all(&self) -> Result<BTreeMap<String, String>, SessionError> {
        let pattern = format!("{SESSION_KEY_PREFIX}*");
        let mut sessions = BTreeMap::new();
        let mut cursor = 0;

        loop {
            let (next, keys) = self
                .call("SCAN", self.store.scan(cursor, &pattern, SCAN_BATCH))
                .await?;

            if !keys.is_empty() {
                let values = self.call("MGET", self.store.get_many(&keys)).await?;
                for (key, value) in keys.into_iter().zip(values) {
                    match value {
                        Some(user_id) => {
                            sessions.insert(key, user_id);
                        }
                        None => debug!(%key, "session vanished during scan"),
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(sessions)
    }

    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, SessionError> {
        let seconds = self.call("TTL", self.store.ttl(key)).await?;
        Ok(seconds.map(Duration::from_secs))
    }

    /// # Errors
    /// Returns an error if the store fails or does not answer in time.
    pub async fn ping(&self) -> Result<(), SessionError> {
        self.call("PING", self.store.ping()).await
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tokio::sync::Barrier;

    const TTL: Duration = Duration::from_secs(300);

    fn registry(store: Arc<dyn SessionStore>) -> SessionRegistry {
        SessionRegistry::new(store, Duration::from_secs(2))
    }

    /// Every call hangs forever.
    struct StallingStore;

    impl SessionStore for StallingStore {
        fn exists<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, bool> {
            Box::pin(std::future::pending())
        }
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
            Box::pin(std::future::pending())
        }
        fn replace<'a>(&'a self, _: &'a str, _: &'a str, _: u64) -> StoreFuture<'a, ()> {
            Box::pin(std::future::pending())
        }
        fn set_if_absent<'a>(
            &'a self,
            _: &'a str,
            _: &'a str,
            _: u64,
        ) -> StoreFuture<'a, bool> {
            Box::pin(std::future::pending())
        }
        fn delete<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
            Box::pin(std::future::pending())
        }
        fn scan<'a>(
            &'a self,
            _: u64,
            _: &'a str,
            _: usize,
        ) -> StoreFuture<'a, (u64, Vec<String>)> {
            Box::pin(std::future::pending())
        }
        fn get_many<'a>(&'a self, _: &'a [String]) -> StoreFuture<'a, Vec<Option<String>>> {
            Box::pin(std::future::pending())
        }
        fn ttl<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<u64>> {
            Box::pin(std::future::pending())
        }
        fn ping(&self) -> StoreFuture<'_, ()> {
            Box::pin(std::future::pending())
        }
    }

    /// Delegates to a memory store; `exists` waits on a barrier after reading so
    /// concurrent callers all observe the same answer before anyone writes.
    /// `scan` deletes the first key it returns, like an expiry racing the fetch.
    struct InterleavingStore {
        inner: MemorySessionStore,
        barrier: Barrier,
    }

    impl SessionStore for InterleavingStore {
        fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
            Box::pin(async move {
                let exists = self.inner.exists(key).await?;
                self.barrier.wait().await;
                Ok(exists)
            })
        }
        fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
            self.inner.get(key)
        }
        fn replace<'a>(&'a self, key: &'a str, value: &'a str, ttl: u64) -> StoreFuture<'a, ()> {
            self.inner.replace(key, value, ttl)
        }
        fn set_if_absent<'a>(
            &'a self,
            key: &'a str,
            value: &'a str,
            ttl: u64,
        ) -> StoreFuture<'a, bool> {
            self.inner.set_if_absent(key, value, ttl)
        }
        fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
            self.inner.delete(key)
        }
        fn scan<'a>(
            &'a self,
            cursor: u64,
            pattern: &'a str,
            count: usize,
        ) -> StoreFuture<'a, (u64, Vec<String>)> {
            Box::pin(async move {
                let (next, keys) = self.inner.scan(cursor, pattern, count).await?;
                if let Some(first) = keys.first() {
                    self.inner.delete(first).await?;
                }
                Ok((next, keys))
            })
        }
        fn get_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Vec<Option<String>>> {
            self.inner.get_many(keys)
        }
        fn ttl<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<u64>> {
            self.inner.ttl(key)
        }
        fn ping(&self) -> StoreFuture<'_, ()> {
            self.inner.ping()
        }
    }

    #[test]
    fn session_key_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(session_key(&id), format!("session-{id}"));
        assert_eq!(session_key(&id), session_key(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_renewal_restarts_the_ttl() -> Result<()> {
        let registry = registry(Arc::new(MemorySessionStore::new()));
        let user = Uuid::new_v4();
        let key = session_key(&user);

        registry.refresh(&key, &user, TTL).await?;
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(200)).await;
            assert!(registry.exists(&key).await?);
            registry.refresh(&key, &user, TTL).await?;
            assert_eq!(registry.remaining_ttl(&key).await?, Some(TTL));
        }

        tokio::time::advance(TTL).await;
        assert!(!registry.exists(&key).await?);
        Ok(())
    }

    #[tokio::test]
    async fn check_then_refresh_lets_both_logins_through() -> Result<()> {
        let store = Arc::new(InterleavingStore {
            inner: MemorySessionStore::new(),
            barrier: Barrier::new(2),
        });
        let registry = registry(store.clone());
        let user = Uuid::new_v4();
        let key = session_key(&user);
        let (device_one, device_two) = (Uuid::new_v4(), Uuid::new_v4());

        let attempt = |device: Uuid| {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move {
                if registry.exists(&key).await? {
                    return Ok::<_, SessionError>(false);
                }
                registry.refresh(&key, &device, TTL).await?;
                Ok(true)
            })
        };

        let first = attempt(device_one);
        let second = attempt(device_two);
        let (first, second) = (first.await??, second.await??);

        // Both callers believe they are logged in; the later write silently
        // replaced the earlier one.
        assert!(first && second);
        let survivor = store.inner.get(&key).await?;
        assert!(
            survivor == Some(device_one.to_string()) || survivor == Some(device_two.to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn install_exclusive_admits_exactly_one_login() -> Result<()> {
        let registry = registry(Arc::new(MemorySessionStore::new()));
        let user = Uuid::new_v4();
        let key = session_key(&user);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                registry.install_exclusive(&key, &user, TTL).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await?? {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn remove_is_idempotent() -> Result<()> {
        let registry = registry(Arc::new(MemorySessionStore::new()));
        let user = Uuid::new_v4();
        let key = session_key(&user);

        registry.refresh(&key, &user, TTL).await?;
        registry.remove(&key).await?;
        registry.remove(&key).await?;
        assert!(!registry.exists(&key).await?);
        assert!(registry.install_exclusive(&key, &user, TTL).await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_all_skips_keys_that_vanish_mid_scan() -> Result<()> {
        let store = Arc::new(InterleavingStore {
            inner: MemorySessionStore::new(),
            barrier: Barrier::new(1),
        });
        let registry = registry(store);
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for user in &users {
            registry.refresh(&session_key(user), user, TTL).await?;
        }

        let sessions = registry.list_all().await?;
        assert_eq!(sessions.len(), 2);
        for (key, user_id) in &sessions {
            assert_eq!(key, &format!("{SESSION_KEY_PREFIX}{user_id}"));
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out() {
        let registry = SessionRegistry::new(Arc::new(StallingStore), Duration::from_millis(50));
        let key = session_key(&Uuid::new_v4());

        assert!(matches!(
            registry.exists(&key).await,
            Err(SessionError::Timeout(_))
        ));
        assert!(matches!(
            registry
                .install_exclusive(&key, &Uuid::new_v4(), TTL)
                .await,
            Err(SessionError::Timeout(_))
        ));
    }
}
