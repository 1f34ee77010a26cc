use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_sync::{CalendarSyncService, EventListing, ListingSettings};
use crate::application::reconciler::{ReconcileOutcome, UserRunLocks, WorklogReconciler};
use crate::application::worklogs::{DeleteWorklogOutcome, WorklogService};
use crate::domain::models::{UserCredentials, WorklogListing};
use crate::infrastructure::config::{load_config, AppConfig};
use crate::infrastructure::credential_store::{
    require_credentials, CredentialStore, KeyringCredentialStore,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_index::SqliteEventIndex;
use crate::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use crate::infrastructure::jira_client::ReqwestJiraClient;
use crate::infrastructure::run_lock::SqliteRunLockStore;
use crate::infrastructure::sync_window_repository::SqliteSyncWindowRepository;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub struct AppState {
    config: AppConfig,
    database_path: PathBuf,
    credential_store: Arc<dyn CredentialStore>,
    run_locks: UserRunLocks,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = load_config(&bootstrap.config_dir)?;
        let run_locks =
            UserRunLocks::new(Arc::new(SqliteRunLockStore::new(&bootstrap.database_path)));
        Ok(Self {
            config,
            database_path: bootstrap.database_path,
            credential_store: Arc::new(KeyringCredentialStore::default()),
            run_locks,
        })
    }

    pub fn with_config(mut self, config: AppConfig) -> Result<Self, InfraError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_credential_store(mut self, credential_store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = credential_store;
        self
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        error!(command, "{message}");
    }

    fn credentials(&self, user_id: &str) -> Result<UserCredentials, InfraError> {
        require_credentials(self.credential_store.as_ref(), normalized_user_id(user_id)?)
    }

    fn jira_client(&self) -> Result<Arc<ReqwestJiraClient>, InfraError> {
        let base_url = self.config.require_jira_base_url()?;
        Ok(Arc::new(ReqwestJiraClient::new(
            base_url,
            self.config.http_timeout(),
        )?))
    }
}

fn normalized_user_id(user_id: &str) -> Result<&str, InfraError> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(InfraError::InvalidConfig("user id must not be empty".to_string()));
    }
    Ok(user_id)
}

pub async fn list_events_impl(
    state: &AppState,
    user_id: String,
    range_words: Vec<String>,
) -> Result<EventListing, InfraError> {
    let credentials = state.credentials(&user_id)?;
    let user_id = normalized_user_id(&user_id)?;
    let calendar_client = Arc::new(ReqwestGoogleCalendarClient::new(
        state.config.calendar_api_base.clone(),
        state.config.http_timeout(),
    )?);
    let service = CalendarSyncService::new(
        calendar_client,
        Arc::new(SqliteEventIndex::new(state.database_path())),
        Arc::new(SqliteSyncWindowRepository::new(state.database_path())),
        ListingSettings {
            calendar_id: state.config.calendar_id.clone(),
            search_term: state.config.search_term.clone(),
        },
    );

    let words = range_words.iter().map(String::as_str).collect::<Vec<_>>();
    let listing = service.list_events(user_id, &credentials, &words).await?;

    state.log_info(
        "list_events",
        &format!(
            "listed user_id={user_id} days={} events={}",
            listing.events_by_day.len(),
            listing.event_ids.len()
        ),
    );
    Ok(listing)
}

pub async fn log_worklogs_impl(
    state: &AppState,
    user_id: String,
    event_ids: Vec<String>,
) -> Result<ReconcileOutcome, InfraError> {
    let credentials = state.credentials(&user_id)?;
    let user_id = normalized_user_id(&user_id)?;
    let jira_client = state.jira_client()?;
    let reconciler = WorklogReconciler::new(
        Arc::new(SqliteEventIndex::new(state.database_path())),
        Arc::clone(&jira_client),
        jira_client,
        state.run_locks.clone(),
    );

    let batch = event_ids
        .into_iter()
        .map(|event_id| event_id.trim().to_string())
        .filter(|event_id| !event_id.is_empty())
        .collect::<Vec<_>>();
    let sync_windows = SqliteSyncWindowRepository::new(state.database_path());
    let outcome = reconciler
        .reconcile_recorded(&sync_windows, user_id, &credentials, &batch)
        .await?;

    state.log_info(
        "log_worklogs",
        &format!(
            "reconciled user_id={user_id} created={} updated={} skipped={} pruned={}",
            outcome.created.len(),
            outcome.updated.len(),
            outcome.skipped.len(),
            outcome.pruned.len()
        ),
    );
    Ok(outcome)
}

pub async fn list_worklogs_impl(
    state: &AppState,
    user_id: String,
    issue_key: String,
) -> Result<WorklogListing, InfraError> {
    let credentials = state.credentials(&user_id)?;
    let service = WorklogService::new(
        Arc::new(SqliteEventIndex::new(state.database_path())),
        state.jira_client()?,
    );
    let listing = service.list_worklogs(&credentials, &issue_key).await?;
    state.log_info(
        "list_worklogs",
        &format!(
            "listed issue_key={} worklogs={}",
            issue_key.trim(),
            listing.entries().len()
        ),
    );
    Ok(listing)
}

pub async fn delete_worklog_impl(
    state: &AppState,
    user_id: String,
    issue_key: String,
    worklog_id: String,
) -> Result<DeleteWorklogOutcome, InfraError> {
    let credentials = state.credentials(&user_id)?;
    let service = WorklogService::new(
        Arc::new(SqliteEventIndex::new(state.database_path())),
        state.jira_client()?,
    );
    let outcome = service
        .delete_worklog(&credentials, &issue_key, &worklog_id)
        .await?;
    state.log_info(
        "delete_worklog",
        &format!(
            "issue_key={} worklog_id={} deleted={}",
            outcome.issue_key, outcome.worklog_id, outcome.deleted
        ),
    );
    Ok(outcome)
}

/// Stores a credential bundle read from a JSON file for `user_id`.
pub fn set_credentials_impl(
    state: &AppState,
    user_id: String,
    bundle_path: PathBuf,
) -> Result<(), InfraError> {
    let user_id = normalized_user_id(&user_id)?;
    let raw = fs::read_to_string(&bundle_path)?;
    let credentials: UserCredentials = serde_json::from_str(&raw)?;
    state
        .credential_store
        .save_credentials(user_id, &credentials)?;
    state.log_info(
        "set_credentials",
        &format!("stored credentials for user_id={user_id}"),
    );
    Ok(())
}
