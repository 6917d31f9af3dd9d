//! Persistence collaborator
//!
//! Profiles, whitelists and the per-user detection log live behind the
//! [`ProfileStore`] trait so a different backend can be substituted without
//! touching decision logic. Only per-user isolation is required; no
//! cross-entity transactions.

pub mod init;
mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use vigil_common::types::{Detection, UserProfile, WhitelistEntry};

use crate::Result;

pub use init::init_db;
pub use sqlite::SqliteStore;

/// One persisted detection with its storage timestamp
#[derive(Debug, Clone, Serialize)]
pub struct LoggedDetection {
    pub detection: Detection,
    pub recorded_at: DateTime<Utc>,
}

/// Per-user persistence interface
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// The user's active filter profile, if one is stored
    async fn active_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;

    /// Store (or replace) the user's active profile
    async fn save_profile(&self, profile: &UserProfile) -> Result<()>;

    /// All whitelist entries for a user
    async fn whitelist(&self, user_id: &str) -> Result<Vec<WhitelistEntry>>;

    /// Add a whitelist entry
    async fn add_whitelist_entry(&self, entry: &WhitelistEntry) -> Result<()>;

    /// Remove a whitelist entry; returns whether one was removed
    async fn remove_whitelist_entry(&self, user_id: &str, entry_id: Uuid) -> Result<bool>;

    /// Append detections to the user's detection log
    async fn append_detections(&self, user_id: &str, detections: &[Detection]) -> Result<()>;

    /// Most recent logged detections for a user, newest first
    async fn detection_log(&self, user_id: &str, limit: u32) -> Result<Vec<LoggedDetection>>;
}

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<String, UserProfile>,
    whitelist: HashMap<String, Vec<WhitelistEntry>>,
    detections: HashMap<String, Vec<LoggedDetection>>,
}

/// In-memory store for tests and analyzer-less development
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn active_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.state.read().await.profiles.get(user_id).cloned())
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.state
            .write()
            .await
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn whitelist(&self, user_id: &str) -> Result<Vec<WhitelistEntry>> {
        Ok(self
            .state
            .read()
            .await
            .whitelist
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_whitelist_entry(&self, entry: &WhitelistEntry) -> Result<()> {
        self.state
            .write()
            .await
            .whitelist
            .entry(entry.user_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn remove_whitelist_entry(&self, user_id: &str, entry_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(entries) = state.whitelist.get_mut(user_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.id != entry_id);
        Ok(entries.len() < before)
    }

    async fn append_detections(&self, user_id: &str, detections: &[Detection]) -> Result<()> {
        let mut state = self.state.write().await;
        let log = state.detections.entry(user_id.to_string()).or_default();
        let recorded_at = vigil_common::time::now();
        for detection in detections {
            log.push(LoggedDetection {
                detection: detection.clone(),
                recorded_at,
            });
        }
        Ok(())
    }

    async fn detection_log(&self, user_id: &str, limit: u32) -> Result<Vec<LoggedDetection>> {
        let state = self.state.read().await;
        let Some(log) = state.detections.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(log.iter().rev().take(limit as usize).cloned().collect())
    }
}
