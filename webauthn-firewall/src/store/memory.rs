//! In-memory user store
//!
//! Thread-safe user records keyed by user ID. Used for development and
//! tests, optionally seeded from a JSON file of [`UserRecord`]s.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Identity, UserQuery, UserRecord, UserStore};
use crate::error::StoreError;

/// Thread-safe in-memory user store
#[derive(Default)]
pub struct MemoryUserStore {
    /// Users (user_id -> record)
    users: DashMap<String, UserRecord>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `records`
    pub fn with_users(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Load records from a JSON array file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Connection(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let records: Vec<UserRecord> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))?;

        tracing::info!(users = records.len(), path = %path.display(), "Loaded user seed file");
        Ok(Self::with_users(records))
    }

    /// Insert or replace a user record
    pub fn upsert(&self, record: UserRecord) {
        self.users.insert(record.user_id.clone(), record);
    }

    /// Enable or disable step-up for a user; returns false when the user is unknown
    pub fn set_step_up_enabled(&self, user_id: &str, enabled: bool) -> bool {
        match self.users.get_mut(user_id) {
            Some(mut entry) => {
                entry.step_up_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn find(&self, query: &UserQuery) -> Option<UserRecord> {
        match query {
            UserQuery::ByUserId(id) => self.users.get(id).map(|entry| entry.value().clone()),
            UserQuery::ByUserName(_) => self
                .users
                .iter()
                .find(|entry| entry.value().matches(query))
                .map(|entry| entry.value().clone()),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn lookup(&self, query: &UserQuery) -> Result<Option<Identity>, StoreError> {
        Ok(self.find(query).map(|record| record.identity()))
    }

    async fn is_step_up_enabled(&self, query: &UserQuery) -> Result<bool, StoreError> {
        Ok(self
            .find(query)
            .map(|record| record.step_up_enabled)
            .unwrap_or(false))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUserStore")
            .field("users", &self.users.len())
            .finish()
    }
}
