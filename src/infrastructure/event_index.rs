use crate::domain::models::{CalendarEvent, DateBucket, WorklogLink};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_connection;
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable mapping of users to the events seen in their past windows, plus the
/// `worklog_id -> event_id` side index.
///
/// `upsert` and `remove` are atomic over the record and its index entry.
pub trait EventIndex: Send + Sync {
    /// Writes the full record and files it under the bucket of its start date.
    /// An already stamped `worklog_id` survives an upsert that carries none.
    fn upsert(&self, event: &CalendarEvent) -> Result<(), InfraError>;
    fn get(&self, event_id: &str) -> Result<Option<CalendarEvent>, InfraError>;
    /// Event ids of `user_id` with a bucket in `[from, to]`, ordered by bucket then id.
    fn range(
        &self,
        user_id: &str,
        from: DateBucket,
        to: DateBucket,
    ) -> Result<Vec<String>, InfraError>;
    /// Drops the record, its index entry and every side-index entry pointing at it.
    fn remove(&self, event_id: &str) -> Result<(), InfraError>;
    fn set_worklog_id(&self, event_id: &str, worklog_id: Option<&str>) -> Result<(), InfraError>;
    fn record_worklog(&self, link: &WorklogLink) -> Result<(), InfraError>;
    fn worklog_link(&self, worklog_id: &str) -> Result<Option<WorklogLink>, InfraError>;
    fn remove_worklog(&self, worklog_id: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteEventIndex {
    db_path: PathBuf,
}

impl SqliteEventIndex {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

struct StoredEventRow {
    event_id: String,
    owner_id: String,
    summary: String,
    description: String,
    start_at: String,
    end_at: String,
    duration_seconds: i64,
    issue_key: String,
    worklog_id: Option<String>,
}

impl StoredEventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            owner_id: row.get(1)?,
            summary: row.get(2)?,
            description: row.get(3)?,
            start_at: row.get(4)?,
            end_at: row.get(5)?,
            duration_seconds: row.get(6)?,
            issue_key: row.get(7)?,
            worklog_id: row.get(8)?,
        })
    }

    fn into_event(self) -> Result<CalendarEvent, InfraError> {
        Ok(CalendarEvent {
            start: parse_stored_time("calendar_events.start_at", &self.start_at)?,
            end: parse_stored_time("calendar_events.end_at", &self.end_at)?,
            event_id: self.event_id,
            owner_id: self.owner_id,
            summary: self.summary,
            description: self.description,
            duration_seconds: self.duration_seconds,
            issue_key: self.issue_key,
            worklog_id: self.worklog_id,
        })
    }
}

fn parse_stored_time(column: &str, raw: &str) -> Result<DateTime<FixedOffset>, InfraError> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {column} '{raw}': {error}")))
}

impl EventIndex for SqliteEventIndex {
    fn upsert(&self, event: &CalendarEvent) -> Result<(), InfraError> {
        event.validate().map_err(InfraError::InvalidConfig)?;
        let mut connection = open_connection(&self.db_path)?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "INSERT INTO calendar_events (
                event_id, owner_id, summary, description, start_at, end_at,
                duration_seconds, issue_key, worklog_id, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(event_id) DO UPDATE SET
               owner_id = excluded.owner_id,
               summary = excluded.summary,
               description = excluded.description,
               start_at = excluded.start_at,
               end_at = excluded.end_at,
               duration_seconds = excluded.duration_seconds,
               issue_key = excluded.issue_key,
               worklog_id = COALESCE(excluded.worklog_id, calendar_events.worklog_id),
               updated_at = excluded.updated_at",
            params![
                event.event_id,
                event.owner_id,
                event.summary,
                event.description,
                event.start.to_rfc3339(),
                event.end.to_rfc3339(),
                event.duration_seconds,
                event.issue_key,
                event.worklog_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        transaction.execute(
            "DELETE FROM event_index WHERE event_id = ?1",
            params![event.event_id],
        )?;
        transaction.execute(
            "INSERT INTO event_index (user_id, event_id, bucket) VALUES (?1, ?2, ?3)",
            params![event.owner_id, event.event_id, event.bucket().as_u32()],
        )?;
        transaction.commit()?;
        Ok(())
    }

    fn get(&self, event_id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let row = connection
            .query_row(
                "SELECT event_id, owner_id, summary, description, start_at, end_at,
                        duration_seconds, issue_key, worklog_id
                 FROM calendar_events
                 WHERE event_id = ?1",
                params![event_id],
                StoredEventRow::from_row,
            )
            .optional()?;
        row.map(StoredEventRow::into_event).transpose()
    }

    fn range(
        &self,
        user_id: &str,
        from: DateBucket,
        to: DateBucket,
    ) -> Result<Vec<String>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection.prepare(
            "SELECT event_id FROM event_index
             WHERE user_id = ?1 AND bucket BETWEEN ?2 AND ?3
             ORDER BY bucket ASC, event_id ASC",
        )?;
        let rows = statement.query_map(params![user_id, from.as_u32(), to.as_u32()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut event_ids = Vec::new();
        for row in rows {
            event_ids.push(row?);
        }
        Ok(event_ids)
    }

    fn remove(&self, event_id: &str) -> Result<(), InfraError> {
        let mut connection = open_connection(&self.db_path)?;
        let transaction = connection.transaction()?;
        transaction.execute(
            "DELETE FROM calendar_events WHERE event_id = ?1",
            params![event_id],
        )?;
        transaction.execute(
            "DELETE FROM event_index WHERE event_id = ?1",
            params![event_id],
        )?;
        transaction.execute(
            "DELETE FROM worklog_links WHERE event_id = ?1",
            params![event_id],
        )?;
        transaction.commit()?;
        Ok(())
    }

    fn set_worklog_id(&self, event_id: &str, worklog_id: Option<&str>) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "UPDATE calendar_events SET worklog_id = ?2, updated_at = ?3 WHERE event_id = ?1",
            params![event_id, worklog_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_worklog(&self, link: &WorklogLink) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "INSERT INTO worklog_links (
                worklog_id, event_id, issue_key, started, time_spent_seconds, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(worklog_id) DO UPDATE SET
               event_id = excluded.event_id,
               issue_key = excluded.issue_key,
               started = excluded.started,
               time_spent_seconds = excluded.time_spent_seconds",
            params![
                link.worklog_id,
                link.event_id,
                link.issue_key,
                link.started.to_rfc3339(),
                link.time_spent_seconds,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn worklog_link(&self, worklog_id: &str) -> Result<Option<WorklogLink>, InfraError> {
        let connection = open_connection(&self.db_path)?;
        let row: Option<(String, String, String, String, i64)> = connection
            .query_row(
                "SELECT worklog_id, event_id, issue_key, started, time_spent_seconds
                 FROM worklog_links
                 WHERE worklog_id = ?1",
                params![worklog_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((worklog_id, event_id, issue_key, started_raw, time_spent_seconds)) = row else {
            return Ok(None);
        };
        let started = parse_stored_time("worklog_links.started", &started_raw)?;
        Ok(Some(WorklogLink {
            worklog_id,
            event_id,
            issue_key,
            started: started.with_timezone(&Utc),
            time_spent_seconds,
        }))
    }

    fn remove_worklog(&self, worklog_id: &str) -> Result<(), InfraError> {
        let connection = open_connection(&self.db_path)?;
        connection.execute(
            "DELETE FROM worklog_links WHERE worklog_id = ?1",
            params![worklog_id],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryIndexState {
    records: HashMap<String, CalendarEvent>,
    // (user_id, bucket, event_id) keeps range scans in index order.
    index: BTreeSet<(String, DateBucket, String)>,
    worklog_links: HashMap<String, WorklogLink>,
}

#[derive(Debug, Default)]
pub struct InMemoryEventIndex {
    state: Mutex<MemoryIndexState>,
}

impl InMemoryEventIndex {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryIndexState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::lock_poisoned("event index", error))
    }
}

impl EventIndex for InMemoryEventIndex {
    fn upsert(&self, event: &CalendarEvent) -> Result<(), InfraError> {
        event.validate().map_err(InfraError::InvalidConfig)?;
        let mut state = self.lock()?;
        let mut stored = event.clone();
        if stored.worklog_id.is_none() {
            stored.worklog_id = state
                .records
                .get(&event.event_id)
                .and_then(|existing| existing.worklog_id.clone());
        }
        state
            .index
            .retain(|(_, _, event_id)| event_id != &event.event_id);
        state.index.insert((
            event.owner_id.clone(),
            event.bucket(),
            event.event_id.clone(),
        ));
        state.records.insert(event.event_id.clone(), stored);
        Ok(())
    }

    fn get(&self, event_id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        Ok(self.lock()?.records.get(event_id).cloned())
    }

    fn range(
        &self,
        user_id: &str,
        from: DateBucket,
        to: DateBucket,
    ) -> Result<Vec<String>, InfraError> {
        let state = self.lock()?;
        Ok(state
            .index
            .iter()
            .filter(|(owner, bucket, _)| owner == user_id && *bucket >= from && *bucket <= to)
            .map(|(_, _, event_id)| event_id.clone())
            .collect())
    }

    fn remove(&self, event_id: &str) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        state.records.remove(event_id);
        state.index.retain(|(_, _, indexed)| indexed != event_id);
        state
            .worklog_links
            .retain(|_, link| link.event_id != event_id);
        Ok(())
    }

    fn set_worklog_id(&self, event_id: &str, worklog_id: Option<&str>) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        if let Some(record) = state.records.get_mut(event_id) {
            record.worklog_id = worklog_id.map(ToOwned::to_owned);
        }
        Ok(())
    }

    fn record_worklog(&self, link: &WorklogLink) -> Result<(), InfraError> {
        let mut state = self.lock()?;
        state
            .worklog_links
            .insert(link.worklog_id.clone(), link.clone());
        Ok(())
    }

    fn worklog_link(&self, worklog_id: &str) -> Result<Option<WorklogLink>, InfraError> {
        Ok(self.lock()?.worklog_links.get(worklog_id).cloned())
    }

    fn remove_worklog(&self, worklog_id: &str) -> Result<(), InfraError> {
        self.lock()?.worklog_links.remove(worklog_id);
        Ok(())
    }
}
