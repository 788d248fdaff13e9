// src/ingest/credentials.rs
use crate::ingest::types::Credentials;
use std::collections::HashMap;
use std::sync::RwLock;

/// User the env-seeded credentials belong to, and the user of requests that name none.
pub const DEFAULT_USER: &str = "default";

/// Outbound seam to wherever per-user source sessions live.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, user: &str, source: &str) -> Credentials;
}

/// Used when no store is wired; every lookup is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn lookup(&self, _user: &str, _source: &str) -> Credentials {
        Credentials::new()
    }
}

/// In-memory store keyed by (user, source). Also seeds from env at startup.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<HashMap<(String, String), Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: &str, source: &str, key: &str, value: &str) {
        if let Ok(mut map) = self.inner.write() {
            map.entry((user.to_string(), source.to_string()))
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
    }

    /// `LINKEDIN_LI_AT` and `REDDIT_ACCESS_TOKEN` become credentials of `user`.
    pub fn from_env(user: &str) -> Self {
        let store = Self::new();
        if let Ok(v) = std::env::var("LINKEDIN_LI_AT") {
            store.insert(user, "linkedin", "li_at", v.trim());
        }
        if let Ok(v) = std::env::var("REDDIT_ACCESS_TOKEN") {
            store.insert(user, "reddit", "access_token", v.trim());
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup(&self, user: &str, source: &str) -> Credentials {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(&(user.to_string(), source.to_string())).cloned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_per_user_and_source() {
        let s = MemoryCredentialStore::new();
        s.insert("ana", "reddit", "access_token", "tok");
        assert_eq!(s.lookup("ana", "reddit").get("access_token").map(String::as_str), Some("tok"));
        assert!(s.lookup("ana", "linkedin").is_empty());
        assert!(s.lookup("bob", "reddit").is_empty());
    }
}
