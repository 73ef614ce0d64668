use std::{future::Future, pin::Pin};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// String key-value store with per-key TTL in seconds (Redis semantics).
///
/// Every method is a single round trip; implementations must not hold an
/// in-process lock across the network call.
pub trait SessionStore: Send + Sync {
    /// `EXISTS key`
    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// `GET key`
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// `MULTI; DEL key; SET key value EX ttl; EXEC`
    fn replace<'a>(&'a self, key: &'a str, value: &'a str, ttl_seconds: u64)
        -> StoreFuture<'a, ()>;

    /// `SET key value NX EX ttl`, returns whether the key was written.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: u64,
    ) -> StoreFuture<'a, bool>;

    /// `DEL key`, idempotent.
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// `SCAN cursor MATCH pattern COUNT count`, returns the next cursor (0 when
    /// the iteration is complete) and a batch of keys.
    fn scan<'a>(
        &'a self,
        cursor: u64,
        pattern: &'a str,
        count: usize,
    ) -> StoreFuture<'a, (u64, Vec<String>)>;

    /// `MGET keys...`, one slot per key, `None` for keys that no longer exist.
    fn get_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Vec<Option<String>>>;

    /// `TTL key` in seconds, `None` when the key does not exist or never expires.
    fn ttl<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<u64>>;

    /// `PING`
    fn ping(&self) -> StoreFuture<'_, ()>;
}
