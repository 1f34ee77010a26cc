use crate::domain::models::SyncWindow;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Last listing window per user. Reconciliation prunes against it.
pub trait SyncWindowRepository: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<SyncWindow>, InfraError>;
    fn save(&self, user_id: &str, window: &SyncWindow) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSyncWindowRepository {
    db_path: PathBuf,
}

impl SqliteSyncWindowRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            InfraError::InvalidConfig(format!("invalid sync_windows.{column} '{raw}': {error}"))
        })
}

impl SyncWindowRepository for SqliteSyncWindowRepository {
    fn load(&self, user_id: &str) -> Result<Option<SyncWindow>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let row: Option<(String, String)> = connection
            .query_row(
                "SELECT start_at, end_at FROM sync_windows WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((start_raw, end_raw)) = row else {
            return Ok(None);
        };

        Ok(Some(SyncWindow {
            start: parse_timestamp("start_at", &start_raw)?,
            end: parse_timestamp("end_at", &end_raw)?,
        }))
    }

    fn save(&self, user_id: &str, window: &SyncWindow) -> Result<(), InfraError> {
        window.validate().map_err(InfraError::InvalidConfig)?;
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "INSERT INTO sync_windows (user_id, start_at, end_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
               start_at = excluded.start_at,
               end_at = excluded.end_at,
               recorded_at = excluded.recorded_at",
            params![
                user_id,
                window.start.to_rfc3339(),
                window.end.to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySyncWindowRepository {
    windows: Mutex<HashMap<String, SyncWindow>>,
}

impl SyncWindowRepository for InMemorySyncWindowRepository {
    fn load(&self, user_id: &str) -> Result<Option<SyncWindow>, InfraError> {
        let windows = self
            .windows
            .lock()
            .map_err(|error| InfraError::lock_poisoned("sync window", error))?;
        Ok(windows.get(user_id).copied())
    }

    fn save(&self, user_id: &str, window: &SyncWindow) -> Result<(), InfraError> {
        window.validate().map_err(InfraError::InvalidConfig)?;
        let mut windows = self
            .windows
            .lock()
            .map_err(|error| InfraError::lock_poisoned("sync window", error))?;
        windows.insert(user_id.to_string(), *window);
        Ok(())
    }
}
