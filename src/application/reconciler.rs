use crate::application::assignment_guard::AssignmentGuard;
use crate::domain::models::{CalendarEvent, SyncWindow, UserCredentials, WorklogLink};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_index::EventIndex;
use crate::infrastructure::jira_client::{IssueClient, WorklogClient, WorklogDraft};
use crate::infrastructure::run_lock::{InMemoryRunLockStore, RunLockStore};
use crate::infrastructure::sync_window_repository::SyncWindowRepository;
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const RUN_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);
const RUN_LOCK_WAIT_SECONDS: i64 = 120;
const RUN_LOCK_STALE_MINUTES: i64 = 15;

static NEXT_RUN_HOLDER: AtomicU64 = AtomicU64::new(0);

/// Serializes reconciliation runs per user through claims in a [`RunLockStore`].
/// Backed by the workspace database, this holds across processes.
#[derive(Clone)]
pub struct UserRunLocks {
    store: Arc<dyn RunLockStore>,
    wait_timeout: TimeDelta,
    stale_after: TimeDelta,
}

impl Default for UserRunLocks {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryRunLockStore::default()))
    }
}

impl UserRunLocks {
    pub fn new(store: Arc<dyn RunLockStore>) -> Self {
        Self {
            store,
            wait_timeout: TimeDelta::seconds(RUN_LOCK_WAIT_SECONDS),
            stale_after: TimeDelta::minutes(RUN_LOCK_STALE_MINUTES),
        }
    }

    /// Waits for the user's claim; fails with [`InfraError::RunInProgress`] after the wait timeout.
    pub async fn acquire(&self, user_id: &str) -> Result<RunGuard, InfraError> {
        let started = Utc::now();
        let holder = format!(
            "{}-{}-{}",
            std::process::id(),
            started.timestamp_micros(),
            NEXT_RUN_HOLDER.fetch_add(1, Ordering::Relaxed)
        );

        loop {
            let now = Utc::now();
            if self
                .store
                .try_claim(user_id, &holder, now, self.stale_after)?
            {
                debug!(user_id, holder = holder.as_str(), "claimed run lock");
                return Ok(RunGuard {
                    store: Arc::clone(&self.store),
                    user_id: user_id.to_string(),
                    holder,
                });
            }
            if now - started >= self.wait_timeout {
                return Err(InfraError::RunInProgress(user_id.to_string()));
            }
            debug!(user_id, "another run holds the user lock; waiting");
            sleep(RUN_LOCK_POLL_INTERVAL).await;
        }
    }
}

/// Releases the claim when dropped.
pub struct RunGuard {
    store: Arc<dyn RunLockStore>,
    user_id: String,
    holder: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Err(error) = self.store.release(&self.user_id, &self.holder) {
            warn!(user_id = self.user_id.as_str(), %error, "failed to release run lock");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    NotAssigned,
    AssignmentCheckFailed { message: String },
    TrackerRejected { status: u16, body: String },
    TrackerUnavailable { message: String },
    UpdateRejected,
    MissingRecord,
    Store { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAssigned => write!(f, "not assigned"),
            Self::AssignmentCheckFailed { message } => {
                write!(f, "could not verify assignment: {message}")
            }
            Self::TrackerRejected { status, body } => {
                write!(f, "issue tracker rejected the worklog: http {status}; body={body}")
            }
            Self::TrackerUnavailable { message } => write!(f, "issue tracker unavailable: {message}"),
            Self::UpdateRejected => write!(f, "issue tracker rejected the worklog update"),
            Self::MissingRecord => write!(f, "event record not found"),
            Self::Store { message } => write!(f, "local store error: {message}"),
        }
    }
}

impl SkipReason {
    fn from_tracker_error(error: InfraError) -> Self {
        match error {
            InfraError::TrackerRejected { status, body } => Self::TrackerRejected { status, body },
            InfraError::TrackerUnavailable(message) => Self::TrackerUnavailable { message },
            other => Self::TrackerUnavailable {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CleanupStatus {
    Removed,
    RemoteDeleted { worklog_id: String },
    /// The remote worklog survived; the local record was still removed.
    RemoteDeleteFailed { worklog_id: String, message: String },
    LocalRemoveFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedItem {
    pub event_id: String,
    pub issue_key: String,
    pub worklog_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub event_id: String,
    pub issue_key: Option<String>,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrunedItem {
    pub event_id: String,
    pub issue_key: Option<String>,
    pub status: CleanupStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub created: Vec<ProcessedItem>,
    pub updated: Vec<ProcessedItem>,
    pub skipped: Vec<SkippedItem>,
    pub pruned: Vec<PrunedItem>,
}

impl ReconcileOutcome {
    pub fn created_issue_keys(&self) -> Vec<&str> {
        self.created.iter().map(|item| item.issue_key.as_str()).collect()
    }

    pub fn updated_issue_keys(&self) -> Vec<&str> {
        self.updated.iter().map(|item| item.issue_key.as_str()).collect()
    }

    fn skip(&mut self, event_id: &str, issue_key: Option<&str>, reason: SkipReason) {
        self.skipped.push(SkippedItem {
            event_id: event_id.to_string(),
            issue_key: issue_key.map(ToOwned::to_owned),
            detail: reason.to_string(),
            reason,
        });
    }
}

enum BatchEntry {
    Loaded(CalendarEvent),
    Unavailable { event_id: String, reason: SkipReason },
}

pub struct WorklogReconciler<I, W, T>
where
    I: EventIndex,
    W: WorklogClient,
    T: IssueClient,
{
    event_index: Arc<I>,
    worklog_client: Arc<W>,
    assignment_guard: AssignmentGuard<T>,
    run_locks: UserRunLocks,
}

impl<I, W, T> WorklogReconciler<I, W, T>
where
    I: EventIndex,
    W: WorklogClient,
    T: IssueClient,
{
    pub fn new(
        event_index: Arc<I>,
        worklog_client: Arc<W>,
        issue_client: Arc<T>,
        run_locks: UserRunLocks,
    ) -> Self {
        Self {
            event_index,
            worklog_client,
            assignment_guard: AssignmentGuard::new(issue_client),
            run_locks,
        }
    }

    /// Takes the user's run lock, then reads the recorded window under it and reconciles.
    pub async fn reconcile_recorded(
        &self,
        sync_windows: &dyn SyncWindowRepository,
        user_id: &str,
        credentials: &UserCredentials,
        batch_ids: &[String],
    ) -> Result<ReconcileOutcome, InfraError> {
        let _run_guard = self.run_locks.acquire(user_id).await?;
        let window = sync_windows.load(user_id)?;
        self.run(user_id, credentials, window, batch_ids).await
    }

    /// Prunes events that dropped out of `window`, then creates or updates one worklog
    /// per event in `batch_ids`, in order. Per-item failures land in the outcome.
    ///
    /// Errors only when the run lock cannot be taken or the index cannot be scanned for pruning.
    pub async fn reconcile(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
        window: Option<SyncWindow>,
        batch_ids: &[String],
    ) -> Result<ReconcileOutcome, InfraError> {
        let _run_guard = self.run_locks.acquire(user_id).await?;
        self.run(user_id, credentials, window, batch_ids).await
    }

    async fn run(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
        window: Option<SyncWindow>,
        batch_ids: &[String],
    ) -> Result<ReconcileOutcome, InfraError> {
        let mut outcome = ReconcileOutcome::default();

        let batch = self.load_batch(user_id, batch_ids);
        self.prune_stale(user_id, credentials, window, batch_ids, &mut outcome)
            .await?;

        for entry in batch {
            match entry {
                BatchEntry::Loaded(event) => {
                    self.reconcile_event(credentials, event, &mut outcome).await;
                }
                BatchEntry::Unavailable { event_id, reason } => {
                    warn!(user_id, event_id = event_id.as_str(), %reason, "skipping event");
                    outcome.skip(&event_id, None, reason);
                }
            }
        }

        info!(
            user_id,
            created = ?outcome.created_issue_keys(),
            updated = ?outcome.updated_issue_keys(),
            skipped = outcome.skipped.len(),
            pruned = outcome.pruned.len(),
            "reconciliation finished"
        );
        Ok(outcome)
    }

    fn load_batch(&self, user_id: &str, batch_ids: &[String]) -> Vec<BatchEntry> {
        let mut seen = HashSet::new();
        batch_ids
            .iter()
            .filter(|event_id| seen.insert(event_id.as_str()))
            .map(|event_id| match self.event_index.get(event_id) {
                Ok(Some(event)) if event.owner_id == user_id => BatchEntry::Loaded(event),
                Ok(_) => BatchEntry::Unavailable {
                    event_id: event_id.clone(),
                    reason: SkipReason::MissingRecord,
                },
                Err(error) => BatchEntry::Unavailable {
                    event_id: event_id.clone(),
                    reason: SkipReason::Store {
                        message: error.to_string(),
                    },
                },
            })
            .collect()
    }

    async fn prune_stale(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
        window: Option<SyncWindow>,
        batch_ids: &[String],
        outcome: &mut ReconcileOutcome,
    ) -> Result<(), InfraError> {
        let Some(window) = window else {
            debug!(user_id, "no recorded window; skipping pruning");
            return Ok(());
        };

        let batch: HashSet<&str> = batch_ids.iter().map(String::as_str).collect();
        let stale = self
            .event_index
            .range(user_id, window.start_bucket(), window.end_bucket())?
            .into_iter()
            .filter(|event_id| !batch.contains(event_id.as_str()))
            .collect::<Vec<_>>();

        for event_id in stale {
            let pruned = self.prune_event(credentials, &event_id).await;
            outcome.pruned.push(pruned);
        }
        Ok(())
    }

    async fn prune_event(&self, credentials: &UserCredentials, event_id: &str) -> PrunedItem {
        let record = match self.event_index.get(event_id) {
            Ok(record) => record,
            Err(error) => {
                warn!(event_id, %error, "could not read stale event before pruning");
                None
            }
        };
        let issue_key = record.as_ref().map(|event| event.issue_key.clone());

        let mut status = CleanupStatus::Removed;
        if let Some((worklog_id, issue_key)) = record
            .as_ref()
            .and_then(|event| Some((event.worklog_id.clone()?, event.issue_key.as_str())))
        {
            status = match self
                .worklog_client
                .delete_worklog(credentials, issue_key, &worklog_id)
                .await
            {
                Ok(true) => CleanupStatus::RemoteDeleted { worklog_id },
                Ok(false) => CleanupStatus::RemoteDeleteFailed {
                    worklog_id,
                    message: "issue tracker refused the delete".to_string(),
                },
                Err(error) => CleanupStatus::RemoteDeleteFailed {
                    worklog_id,
                    message: error.to_string(),
                },
            };
            if let CleanupStatus::RemoteDeleteFailed { worklog_id, message } = &status {
                warn!(
                    event_id,
                    issue_key,
                    worklog_id = worklog_id.as_str(),
                    message = message.as_str(),
                    "remote worklog cleanup failed; removing local record anyway"
                );
            }
        }

        if let Err(error) = self.event_index.remove(event_id) {
            warn!(event_id, %error, "failed to remove stale event");
            status = CleanupStatus::LocalRemoveFailed {
                message: error.to_string(),
            };
        } else {
            info!(event_id, "pruned stale event");
        }

        PrunedItem {
            event_id: event_id.to_string(),
            issue_key,
            status,
        }
    }

    async fn reconcile_event(
        &self,
        credentials: &UserCredentials,
        event: CalendarEvent,
        outcome: &mut ReconcileOutcome,
    ) {
        let event_id = event.event_id.as_str();
        let issue_key = event.issue_key.as_str();

        match self.assignment_guard.is_assigned(issue_key, credentials).await {
            Ok(true) => {}
            Ok(false) => {
                info!(event_id, issue_key, "issue not assigned to user; skipping");
                outcome.skip(event_id, Some(issue_key), SkipReason::NotAssigned);
                return;
            }
            Err(error) => {
                warn!(event_id, issue_key, %error, "assignment check unavailable; skipping");
                outcome.skip(
                    event_id,
                    Some(issue_key),
                    SkipReason::AssignmentCheckFailed {
                        message: error.to_string(),
                    },
                );
                return;
            }
        }

        let draft = WorklogDraft::from_event(&event);
        match event.worklog_id.as_deref() {
            Some(worklog_id) => {
                self.update_existing(credentials, &event, worklog_id, &draft, outcome)
                    .await
            }
            None => self.create_new(credentials, &event, &draft, outcome).await,
        }
    }

    async fn update_existing(
        &self,
        credentials: &UserCredentials,
        event: &CalendarEvent,
        worklog_id: &str,
        draft: &WorklogDraft,
        outcome: &mut ReconcileOutcome,
    ) {
        let event_id = event.event_id.as_str();
        let issue_key = event.issue_key.as_str();

        match self
            .worklog_client
            .update_worklog(credentials, issue_key, worklog_id, draft)
            .await
        {
            Ok(true) => {
                if let Err(error) = self.event_index.record_worklog(&link_for(event, worklog_id)) {
                    warn!(event_id, worklog_id, %error, "failed to refresh worklog link");
                }
                info!(event_id, issue_key, worklog_id, "updated worklog");
                outcome.updated.push(ProcessedItem {
                    event_id: event_id.to_string(),
                    issue_key: issue_key.to_string(),
                    worklog_id: worklog_id.to_string(),
                });
            }
            Ok(false) => {
                outcome.skip(event_id, Some(issue_key), SkipReason::UpdateRejected);
            }
            Err(error) => {
                warn!(event_id, issue_key, worklog_id, %error, "worklog update failed");
                outcome.skip(event_id, Some(issue_key), SkipReason::from_tracker_error(error));
            }
        }
    }

    async fn create_new(
        &self,
        credentials: &UserCredentials,
        event: &CalendarEvent,
        draft: &WorklogDraft,
        outcome: &mut ReconcileOutcome,
    ) {
        let event_id = event.event_id.as_str();
        let issue_key = event.issue_key.as_str();

        let worklog_id = match self
            .worklog_client
            .create_worklog(credentials, issue_key, draft)
            .await
        {
            Ok(worklog_id) => worklog_id,
            Err(error) => {
                warn!(event_id, issue_key, %error, "worklog create failed");
                outcome.skip(event_id, Some(issue_key), SkipReason::from_tracker_error(error));
                return;
            }
        };

        if let Err(error) = self.event_index.set_worklog_id(event_id, Some(worklog_id.as_str())) {
            warn!(
                event_id,
                worklog_id = worklog_id.as_str(),
                %error,
                "created worklog but could not stamp it on the event"
            );
            outcome.skip(
                event_id,
                Some(issue_key),
                SkipReason::Store {
                    message: format!("worklog {worklog_id} was created but not recorded: {error}"),
                },
            );
            return;
        }
        if let Err(error) = self.event_index.record_worklog(&link_for(event, &worklog_id)) {
            warn!(event_id, worklog_id = worklog_id.as_str(), %error, "failed to record worklog link");
        }

        info!(event_id, issue_key, worklog_id = worklog_id.as_str(), "created worklog");
        outcome.created.push(ProcessedItem {
            event_id: event_id.to_string(),
            issue_key: issue_key.to_string(),
            worklog_id,
        });
    }
}

fn link_for(event: &CalendarEvent, worklog_id: &str) -> WorklogLink {
    WorklogLink {
        worklog_id: worklog_id.to_string(),
        event_id: event.event_id.clone(),
        issue_key: event.issue_key.clone(),
        started: event.start.with_timezone(&Utc),
        time_spent_seconds: event.duration_seconds,
    }
}
