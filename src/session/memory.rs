use super::store::{SessionStore, StoreFuture};
use std::collections::HashMap;
use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store with Redis TTL semantics.
///
/// Used when no Redis URL is configured and in tests. Expiry is lazy and
/// follows the tokio clock, so paused-time tests can advance it.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn live(&self, key: &str) -> Option<Entry> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }
}

fn entry(value: &str, ttl_seconds: u64) -> Entry {
    Entry {
        value: value.to_string(),
        expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
    }
}

impl SessionStore for MemorySessionStore {
    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.live(key).await.is_some()) })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.live(key).await.map(|entry| entry.value)) })
    }

    fn replace<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: u64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            entries.remove(key);
            entries.insert(key.to_string(), entry(value, ttl_seconds));
            Ok(())
        })
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_seconds: u64,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            if entries.get(key).is_some_and(|entry| entry.expires_at > now) {
                return Ok(false);
            }
            entries.insert(key.to_string(), entry(value, ttl_seconds));
            Ok(true)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }

    fn scan<'a>(
        &'a self,
        cursor: u64,
        pattern: &'a str,
        count: usize,
    ) -> StoreFuture<'a, (u64, Vec<String>)> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            let now = Instant::now();
            let mut keys: Vec<&String> = entries
                .iter()
                .filter(|(key, entry)| entry.expires_at > now && glob_match(pattern, key))
                .map(|(key, _)| key)
                .collect();
            keys.sort();

            let start = usize::try_from(cursor).unwrap_or(usize::MAX);
            let page: Vec<String> = keys
                .iter()
                .skip(start)
                .take(count.max(1))
                .map(|key| (*key).clone())
                .collect();
            let next = start.saturating_add(page.len());
            let next_cursor = if next >= keys.len() {
                0
            } else {
                u64::try_from(next).unwrap_or(0)
            };
            Ok((next_cursor, page))
        })
    }

    fn get_many<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, Vec<Option<String>>> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            let now = Instant::now();
            Ok(keys
                .iter()
                .map(|key| {
                    entries
                        .get(key)
                        .filter(|entry| entry.expires_at > now)
                        .map(|entry| entry.value.clone())
                })
                .collect())
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<u64>> {
        Box::pin(async move {
            Ok(self.live(key).await.map(|entry| {
                let remaining = entry.expires_at.saturating_duration_since(Instant::now());
                // Redis rounds to the nearest second
                u64::try_from((remaining.as_millis() + 500) / 1000).unwrap_or(u64::MAX)
            }))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Redis-style glob with `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn glob_matches_prefix_patterns() {
        assert!(glob_match("session-*", "session-abc"));
        assert!(glob_match("session-*", "session-"));
        assert!(!glob_match("session-*", "other-abc"));
        assert!(glob_match("s?ss*n-*", "session-1"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("a*b", "acd"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_with_the_clock() -> Result<()> {
        let store = MemorySessionStore::new();
        store.replace("k", "v", 10).await?;
        assert_eq!(store.ttl("k").await?, Some(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.ttl("k").await?, Some(6));
        assert_eq!(store.get("k").await?.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.exists("k").await?);
        assert_eq!(store.ttl("k").await?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_live_and_expired_keys() -> Result<()> {
        let store = MemorySessionStore::new();
        assert!(store.set_if_absent("k", "first", 5).await?);
        assert!(!store.set_if_absent("k", "second", 5).await?);
        assert_eq!(store.get("k").await?.as_deref(), Some("first"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.set_if_absent("k", "third", 5).await?);
        assert_eq!(store.get("k").await?.as_deref(), Some("third"));
        Ok(())
    }

    #[tokio::test]
    async fn scan_pages_through_matching_keys() -> Result<()> {
        let store = MemorySessionStore::new();
        for i in 0..5 {
            store.replace(&format!("session-{i}"), "u", 60).await?;
        }
        store.replace("other", "u", 60).await?;

        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, "session-*", 2).await?;
            assert!(keys.len() <= 2);
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        seen.sort();
        assert_eq!(
            seen,
            (0..5).map(|i| format!("session-{i}")).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[tokio::test]
    async fn get_many_keeps_slots_for_missing_keys() -> Result<()> {
        let store = MemorySessionStore::new();
        store.replace("a", "1", 60).await?;
        let values = store
            .get_many(&["a".to_string(), "missing".to_string()])
            .await?;
        assert_eq!(values, vec![Some("1".to_string()), None]);
        Ok(())
    }
}
