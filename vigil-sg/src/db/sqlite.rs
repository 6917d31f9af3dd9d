//! SQLite-backed profile store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use vigil_common::types::{Detection, UserProfile, WhitelistEntry};

use crate::db::{LoggedDetection, ProfileStore};
use crate::{Error, Result};

/// Profile store backed by the Vigil SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp in database: {}", e)))
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn active_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, (String, String, i64, String, String, String)>(
            r#"
            SELECT profile_id, profile_name, is_default, filters, created_at, updated_at
            FROM user_profiles
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((profile_id, profile_name, is_default, filters, created_at, updated_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(UserProfile {
            id: Uuid::parse_str(&profile_id)
                .map_err(|e| Error::Internal(format!("bad profile id in database: {}", e)))?,
            user_id: user_id.to_string(),
            profile_name,
            is_default: is_default != 0,
            filters: serde_json::from_str(&filters)
                .map_err(|e| Error::Internal(format!("bad filters in database: {}", e)))?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let filters = serde_json::to_string(&profile.filters)
            .map_err(|e| Error::Internal(format!("cannot serialize filters: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, profile_id, profile_name, is_default, filters, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                profile_id = excluded.profile_id,
                profile_name = excluded.profile_name,
                is_default = excluded.is_default,
                filters = excluded.filters,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id)
        .bind(profile.id.to_string())
        .bind(&profile.profile_name)
        .bind(profile.is_default as i64)
        .bind(&filters)
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(user = %profile.user_id, "profile saved");
        Ok(())
    }

    async fn whitelist(&self, user_id: &str) -> Result<Vec<WhitelistEntry>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String)>(
            r#"
            SELECT id, label, value_hash, description, created_at
            FROM whitelist_entries
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, label, value_hash, description, created_at) in rows {
            entries.push(WhitelistEntry {
                id: Uuid::parse_str(&id)
                    .map_err(|e| Error::Internal(format!("bad whitelist id in database: {}", e)))?,
                user_id: user_id.to_string(),
                label,
                value_hash,
                description,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(entries)
    }

    async fn add_whitelist_entry(&self, entry: &WhitelistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whitelist_entries (id, user_id, label, value_hash, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.user_id)
        .bind(&entry.label)
        .bind(&entry.value_hash)
        .bind(&entry.description)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_whitelist_entry(&self, user_id: &str, entry_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM whitelist_entries WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(entry_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_detections(&self, user_id: &str, detections: &[Detection]) -> Result<()> {
        let recorded_at = vigil_common::time::now().to_rfc3339();
        for detection in detections {
            let payload = serde_json::to_string(detection)
                .map_err(|e| Error::Internal(format!("cannot serialize detection: {}", e)))?;
            sqlx::query(
                "INSERT INTO detection_log (user_id, detection, recorded_at) VALUES (?, ?, ?)",
            )
            .bind(user_id)
            .bind(&payload)
            .bind(&recorded_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn detection_log(&self, user_id: &str, limit: u32) -> Result<Vec<LoggedDetection>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT detection, recorded_at
            FROM detection_log
            WHERE user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut log = Vec::with_capacity(rows.len());
        for (detection, recorded_at) in rows {
            log.push(LoggedDetection {
                detection: serde_json::from_str(&detection)
                    .map_err(|e| Error::Internal(format!("bad detection in database: {}", e)))?,
                recorded_at: parse_timestamp(&recorded_at)?,
            });
        }
        Ok(log)
    }
}
