//! # Session Stores
//!
//! Persistence for session records keyed by `"<origin>_<sessionId>"`.
//!
//! Two backends ship with the crate: a volatile in-memory store for
//! process-lifetime sessions and a `sled`-backed store that survives
//! restarts. Both accept an optional session lifetime; by default no entry
//! ever expires, so `validate_and_refresh` degenerates to a lookup and
//! `clean_expired` returns 0 — but an expiring backend can be substituted
//! without changing any caller.
//!
//! A store instance is constructed once by the application and injected into
//! the router; there is no process-wide default.

use crate::types::Session;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;

/// A trait defining the required functionality for a session storage backend.
///
/// Only serializable session records cross this boundary, never live
/// transport or provider handles.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or replaces the session stored under `key`.
    async fn set(&self, key: &str, session: Session) -> Result<()>;

    /// Looks up a session without touching its expiry state.
    async fn get(&self, key: &str) -> Result<Option<Session>>;

    /// Returns every stored `(key, session)` pair.
    async fn get_all(&self) -> Result<Vec<(String, Session)>>;

    /// Removes the session stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every stored session.
    async fn clear(&self) -> Result<()>;

    /// The single read path for request handling: returns the session if it
    /// is still valid, refreshing its lifetime when the backend enforces one.
    /// An expired entry is removed and reported as absent.
    async fn validate_and_refresh(&self, key: &str) -> Result<Option<Session>>;

    /// Removes every expired session and returns how many were dropped.
    async fn clean_expired(&self) -> Result<u64>;
}

fn is_expired(session: &Session, lifetime: Option<Duration>) -> bool {
    let Some(lifetime) = lifetime else {
        return false;
    };
    match (Utc::now() - session.created_at).to_std() {
        Ok(age) => age > lifetime,
        // A creation timestamp in the future; treat as fresh.
        Err(_) => false,
    }
}

/// A volatile, process-lifetime session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: DashMap<String, Session>,
    lifetime: Option<Duration>,
}

impl MemorySessionStore {
    /// Creates a store whose entries never expire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that expires entries `lifetime` after creation,
    /// refreshed on every validated read.
    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            lifetime: Some(lifetime),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set(&self, key: &str, session: Session) -> Result<()> {
        self.entries.insert(key.to_string(), session);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Session>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn get_all(&self) -> Result<Vec<(String, Session)>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn validate_and_refresh(&self, key: &str) -> Result<Option<Session>> {
        let Some(mut session) = self.get(key).await? else {
            return Ok(None);
        };
        if is_expired(&session, self.lifetime) {
            self.entries.remove(key);
            return Ok(None);
        }
        if self.lifetime.is_some() {
            session.created_at = Utc::now();
            self.entries.insert(key.to_string(), session.clone());
        }
        Ok(Some(session))
    }

    async fn clean_expired(&self) -> Result<u64> {
        let before = self.entries.len() as u64;
        self.entries
            .retain(|_, session| !is_expired(session, self.lifetime));
        Ok(before - self.entries.len() as u64)
    }
}

const SESSION_PREFIX: &str = "session::";

/// A `sled`-backed session store that survives process restarts.
///
/// Values are bincode-encoded [`Session`] records under `session::`-prefixed
/// keys; writes are flushed before returning.
#[derive(Clone)]
pub struct SledSessionStore {
    db: sled::Db,
    lifetime: Option<Duration>,
}

impl SledSessionStore {
    /// Creates a new store on top of a `sled` database. The database can be
    /// shared with other trees the application maintains.
    pub fn new(db: sled::Db) -> Self {
        Self { db, lifetime: None }
    }

    /// Same as [`SledSessionStore::new`], with entries expiring `lifetime`
    /// after creation.
    pub fn with_lifetime(db: sled::Db, lifetime: Duration) -> Self {
        Self {
            db,
            lifetime: Some(lifetime),
        }
    }

    fn storage_key(key: &str) -> String {
        format!("{SESSION_PREFIX}{key}")
    }

    fn encode(session: &Session) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(session, bincode::config::standard())
            .map_err(|e| anyhow!("Failed to encode session record: {e}"))
    }

    fn decode(bytes: &[u8]) -> Result<Session> {
        let (session, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| anyhow!("Failed to decode session record: {e}"))?;
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn set(&self, key: &str, session: Session) -> Result<()> {
        self.db
            .insert(Self::storage_key(key), Self::encode(&session)?)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Session>> {
        match self.db.get(Self::storage_key(key))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<(String, Session)>> {
        let mut sessions = Vec::new();
        for entry in self.db.scan_prefix(SESSION_PREFIX) {
            let (raw_key, bytes) = entry?;
            let full_key = String::from_utf8(raw_key.to_vec())
                .map_err(|_| anyhow!("Non-UTF-8 session key in store"))?;
            let key = full_key
                .strip_prefix(SESSION_PREFIX)
                .unwrap_or(&full_key)
                .to_string();
            sessions.push((key, Self::decode(&bytes)?));
        }
        Ok(sessions)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(Self::storage_key(key))?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let keys: Vec<_> = self
            .db
            .scan_prefix(SESSION_PREFIX)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.db.remove(key)?;
        }
        self.db.flush_async().await?;
        Ok(())
    }

    async fn validate_and_refresh(&self, key: &str) -> Result<Option<Session>> {
        let Some(mut session) = self.get(key).await? else {
            return Ok(None);
        };
        if is_expired(&session, self.lifetime) {
            self.delete(key).await?;
            return Ok(None);
        }
        if self.lifetime.is_some() {
            session.created_at = Utc::now();
            self.set(key, session.clone()).await?;
        }
        Ok(Some(session))
    }

    async fn clean_expired(&self) -> Result<u64> {
        let mut dropped = 0;
        for (key, session) in self.get_all().await? {
            if is_expired(&session, self.lifetime) {
                self.db.remove(Self::storage_key(&key))?;
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.db.flush_async().await?;
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::session_key;

    fn session(origin: &str, id: &str) -> Session {
        Session {
            id: id.to_string(),
            origin: origin.to_string(),
            created_at: Utc::now(),
            permissions: None,
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemorySessionStore::new();
        let key = session_key("https://app.test", "s1");
        store.set(&key, session("https://app.test", "s1")).await.unwrap();

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded.id, "s1");

        assert_eq!(store.get_all().await.unwrap().len(), 1);
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_without_lifetime_never_expires() {
        let store = MemorySessionStore::new();
        let key = session_key("o", "s1");
        let mut old = session("o", "s1");
        old.created_at = Utc::now() - chrono::Duration::days(365);
        store.set(&key, old).await.unwrap();

        assert!(store.validate_and_refresh(&key).await.unwrap().is_some());
        assert_eq!(store.clean_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_store_with_lifetime_expires_and_refreshes() {
        let store = MemorySessionStore::with_lifetime(Duration::from_secs(60));
        let key = session_key("o", "s1");
        let mut stale = session("o", "s1");
        stale.created_at = Utc::now() - chrono::Duration::seconds(120);
        store.set(&key, stale.clone()).await.unwrap();

        assert!(store.validate_and_refresh(&key).await.unwrap().is_none());
        assert!(store.get(&key).await.unwrap().is_none());

        let mut aging = session("o", "s2");
        aging.created_at = Utc::now() - chrono::Duration::seconds(30);
        let key2 = session_key("o", "s2");
        store.set(&key2, aging).await.unwrap();
        let refreshed = store.validate_and_refresh(&key2).await.unwrap().unwrap();
        assert!((Utc::now() - refreshed.created_at).num_seconds() < 5);
    }

    #[tokio::test]
    async fn memory_store_clean_expired_counts() {
        let store = MemorySessionStore::with_lifetime(Duration::from_secs(60));
        let mut stale = session("o", "old");
        stale.created_at = Utc::now() - chrono::Duration::seconds(600);
        store.set(&session_key("o", "old"), stale).await.unwrap();
        store
            .set(&session_key("o", "fresh"), session("o", "fresh"))
            .await
            .unwrap();

        assert_eq!(store.clean_expired().await.unwrap(), 1);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sled_store_round_trips_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = session_key("https://app.test", "s1");

        {
            let db = sled::open(dir.path()).unwrap();
            let store = SledSessionStore::new(db);
            let mut stored = session("https://app.test", "s1");
            stored.permissions = Some(
                [(crate::types::ChainId::new("x:1"), vec!["echo".to_string()])]
                    .into_iter()
                    .collect(),
            );
            store.set(&key, stored).await.unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let store = SledSessionStore::new(db);
        let loaded = store.validate_and_refresh(&key).await.unwrap().unwrap();
        assert_eq!(loaded.origin, "https://app.test");
        assert_eq!(
            loaded.permissions.unwrap()[&crate::types::ChainId::new("x:1")],
            vec!["echo".to_string()]
        );

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, key);

        store.clear().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }
}
