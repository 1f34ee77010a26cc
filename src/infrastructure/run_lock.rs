use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One claim per user on the right to run a reconciliation.
pub trait RunLockStore: Send + Sync {
    /// `Ok(false)` while a different holder owns a claim younger than `stale_after`.
    fn try_claim(
        &self,
        user_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<bool, InfraError>;
    /// Drops the claim only if `holder` still owns it.
    fn release(&self, user_id: &str, holder: &str) -> Result<(), InfraError>;
}

/// Claims live in the workspace database, so every process sharing it sees them.
#[derive(Debug, Clone)]
pub struct SqliteRunLockStore {
    db_path: PathBuf,
}

impl SqliteRunLockStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn claim_is_live(
    current_holder: &str,
    claimed_at: DateTime<Utc>,
    holder: &str,
    now: DateTime<Utc>,
    stale_after: TimeDelta,
) -> bool {
    current_holder != holder && now - claimed_at < stale_after
}

impl RunLockStore for SqliteRunLockStore {
    fn try_claim(
        &self,
        user_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<bool, InfraError> {
        let mut connection = open_connection(&self.db_path)?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(String, String)> = transaction
            .query_row(
                "SELECT holder, claimed_at FROM run_locks WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((current_holder, claimed_raw)) = current {
            let claimed_at = DateTime::parse_from_rfc3339(&claimed_raw)
                .map(|value| value.with_timezone(&Utc))
                .map_err(|error| {
                    InfraError::InvalidConfig(format!(
                        "invalid run_locks.claimed_at '{claimed_raw}': {error}"
                    ))
                })?;
            if claim_is_live(&current_holder, claimed_at, holder, now, stale_after) {
                return Ok(false);
            }
        }

        transaction.execute(
            "INSERT INTO run_locks (user_id, holder, claimed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
               holder = excluded.holder,
               claimed_at = excluded.claimed_at",
            params![user_id, holder, now.to_rfc3339()],
        )?;
        transaction.commit()?;
        Ok(true)
    }

    fn release(&self, user_id: &str, holder: &str) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "DELETE FROM run_locks WHERE user_id = ?1 AND holder = ?2",
            params![user_id, holder],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunLockStore {
    claims: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl RunLockStore for InMemoryRunLockStore {
    fn try_claim(
        &self,
        user_id: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<bool, InfraError> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|error| InfraError::lock_poisoned("run lock store", error))?;
        if let Some((current_holder, claimed_at)) = claims.get(user_id) {
            if claim_is_live(current_holder, *claimed_at, holder, now, stale_after) {
                return Ok(false);
            }
        }
        claims.insert(user_id.to_string(), (holder.to_string(), now));
        Ok(true)
    }

    fn release(&self, user_id: &str, holder: &str) -> Result<(), InfraError> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|error| InfraError::lock_poisoned("run lock store", error))?;
        if claims
            .get(user_id)
            .is_some_and(|(current_holder, _)| current_holder == holder)
        {
            claims.remove(user_id);
        }
        Ok(())
    }
}
