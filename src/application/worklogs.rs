use crate::domain::models::{UserCredentials, WorklogListing};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_index::EventIndex;
use crate::infrastructure::jira_client::WorklogClient;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeleteWorklogOutcome {
    pub issue_key: String,
    pub worklog_id: String,
    pub deleted: bool,
    /// Event whose `worklog_id` was cleared, when the worklog was created from one.
    pub unlinked_event_id: Option<String>,
}

/// Read-only listing and explicit deletion of worklogs outside a reconciliation run.
pub struct WorklogService<I, W>
where
    I: EventIndex,
    W: WorklogClient,
{
    event_index: Arc<I>,
    worklog_client: Arc<W>,
}

impl<I, W> WorklogService<I, W>
where
    I: EventIndex,
    W: WorklogClient,
{
    pub fn new(event_index: Arc<I>, worklog_client: Arc<W>) -> Self {
        Self {
            event_index,
            worklog_client,
        }
    }

    pub async fn list_worklogs(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
    ) -> Result<WorklogListing, InfraError> {
        let issue_key = normalized(issue_key, "issue key")?;
        let listing = self.worklog_client.list_worklogs(credentials, issue_key).await?;
        info!(issue_key, count = listing.entries().len(), "listed worklogs");
        Ok(listing)
    }

    /// Deletes the remote worklog; only on success are the side index and event stamp cleared.
    pub async fn delete_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        worklog_id: &str,
    ) -> Result<DeleteWorklogOutcome, InfraError> {
        let issue_key = normalized(issue_key, "issue key")?;
        let worklog_id = normalized(worklog_id, "worklog id")?;

        let deleted = self
            .worklog_client
            .delete_worklog(credentials, issue_key, worklog_id)
            .await?;
        if !deleted {
            warn!(issue_key, worklog_id, "issue tracker refused the worklog delete");
            return Ok(DeleteWorklogOutcome {
                issue_key: issue_key.to_string(),
                worklog_id: worklog_id.to_string(),
                deleted: false,
                unlinked_event_id: None,
            });
        }

        let link = self.event_index.worklog_link(worklog_id)?;
        self.event_index.remove_worklog(worklog_id)?;

        let mut unlinked_event_id = None;
        if let Some(link) = link {
            let still_stamped = self
                .event_index
                .get(&link.event_id)?
                .is_some_and(|event| event.worklog_id.as_deref() == Some(worklog_id));
            if still_stamped {
                self.event_index.set_worklog_id(&link.event_id, None)?;
                unlinked_event_id = Some(link.event_id);
            }
        }

        info!(
            issue_key,
            worklog_id,
            event_id = unlinked_event_id.as_deref().unwrap_or(""),
            "deleted worklog"
        );
        Ok(DeleteWorklogOutcome {
            issue_key: issue_key.to_string(),
            worklog_id: worklog_id.to_string(),
            deleted: true,
            unlinked_event_id,
        })
    }
}

fn normalized<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InfraError::InvalidConfig(format!("{field_name} must not be empty")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CalendarEvent, WorklogEntry, WorklogLink};
    use crate::infrastructure::event_index::InMemoryEventIndex;
    use crate::infrastructure::jira_client::WorklogDraft;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeWorklogClient {
        delete_succeeds: bool,
        listing: WorklogListing,
        delete_calls: AtomicUsize,
    }

    impl FakeWorklogClient {
        fn new(delete_succeeds: bool, listing: WorklogListing) -> Self {
            Self {
                delete_succeeds,
                listing,
                delete_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WorklogClient for FakeWorklogClient {
        async fn create_worklog(
            &self,
            _credentials: &UserCredentials,
            _issue_key: &str,
            _draft: &WorklogDraft,
        ) -> Result<String, InfraError> {
            Err(InfraError::TrackerUnavailable("not used".to_string()))
        }

        async fn update_worklog(
            &self,
            _credentials: &UserCredentials,
            _issue_key: &str,
            _worklog_id: &str,
            _draft: &WorklogDraft,
        ) -> Result<bool, InfraError> {
            Ok(false)
        }

        async fn delete_worklog(
            &self,
            _credentials: &UserCredentials,
            _issue_key: &str,
            _worklog_id: &str,
        ) -> Result<bool, InfraError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.delete_succeeds)
        }

        async fn list_worklogs(
            &self,
            _credentials: &UserCredentials,
            _issue_key: &str,
        ) -> Result<WorklogListing, InfraError> {
            Ok(self.listing.clone())
        }
    }

    fn credentials() -> UserCredentials {
        UserCredentials {
            tracker_email: "dev@example.com".to_string(),
            tracker_api_token: "api-token".to_string(),
            calendar_access_token: "access".to_string(),
            calendar_refresh_token: None,
            timezone: "UTC".to_string(),
        }
    }

    fn seeded_index() -> Arc<InMemoryEventIndex> {
        let index = Arc::new(InMemoryEventIndex::default());
        let start = DateTime::parse_from_rfc3339("2024-01-10T09:00:00Z").expect("start");
        index
            .upsert(&CalendarEvent {
                event_id: "a".to_string(),
                owner_id: "U1".to_string(),
                summary: "FES-1 standup".to_string(),
                description: String::new(),
                start,
                end: start + chrono::Duration::minutes(15),
                duration_seconds: 900,
                issue_key: "FES-1".to_string(),
                worklog_id: Some("10001".to_string()),
            })
            .expect("seed event");
        index
            .record_worklog(&WorklogLink {
                worklog_id: "10001".to_string(),
                event_id: "a".to_string(),
                issue_key: "FES-1".to_string(),
                started: start.with_timezone(&Utc),
                time_spent_seconds: 900,
            })
            .expect("seed link");
        index
    }

    #[tokio::test]
    async fn successful_delete_unlinks_the_event() {
        let index = seeded_index();
        let service = WorklogService::new(
            Arc::clone(&index),
            Arc::new(FakeWorklogClient::new(true, WorklogListing::NoneFound)),
        );

        let outcome = service
            .delete_worklog(&credentials(), "FES-1", " 10001 ")
            .await
            .expect("delete");

        assert!(outcome.deleted);
        assert_eq!(outcome.unlinked_event_id.as_deref(), Some("a"));
        assert_eq!(index.worklog_link("10001").expect("link"), None);
        assert_eq!(index.get("a").expect("get").expect("a").worklog_id, None);
    }

    #[tokio::test]
    async fn refused_delete_changes_nothing_locally() {
        let index = seeded_index();
        let service = WorklogService::new(
            Arc::clone(&index),
            Arc::new(FakeWorklogClient::new(false, WorklogListing::NoneFound)),
        );

        let outcome = service
            .delete_worklog(&credentials(), "FES-1", "10001")
            .await
            .expect("delete");

        assert!(!outcome.deleted);
        assert!(index.worklog_link("10001").expect("link").is_some());
        assert_eq!(
            index.get("a").expect("get").expect("a").worklog_id.as_deref(),
            Some("10001")
        );
    }

    #[tokio::test]
    async fn deleting_an_unlinked_worklog_only_calls_the_tracker() {
        let index = seeded_index();
        let client = Arc::new(FakeWorklogClient::new(true, WorklogListing::NoneFound));
        let service = WorklogService::new(Arc::clone(&index), Arc::clone(&client));

        let outcome = service
            .delete_worklog(&credentials(), "FES-1", "555")
            .await
            .expect("delete");

        assert!(outcome.deleted);
        assert_eq!(outcome.unlinked_event_id, None);
        assert_eq!(client.delete_calls.load(Ordering::SeqCst), 1);
        assert!(index.worklog_link("10001").expect("link").is_some());
    }

    #[tokio::test]
    async fn listing_passes_through_tracker_state() {
        let entry = WorklogEntry {
            worklog_id: "10001".to_string(),
            issue_key: "FES-1".to_string(),
            author_display_name: "Dev One".to_string(),
            started: "2024-01-10T09:00:00.000+0000".to_string(),
            time_spent: "15m".to_string(),
            time_spent_seconds: 900,
        };
        let service = WorklogService::new(
            seeded_index(),
            Arc::new(FakeWorklogClient::new(
                true,
                WorklogListing::Found(vec![entry.clone()]),
            )),
        );

        let listing = service.list_worklogs(&credentials(), "FES-1").await.expect("list");
        assert_eq!(listing, WorklogListing::Found(vec![entry]));
    }

    #[tokio::test]
    async fn blank_arguments_are_rejected() {
        let service = WorklogService::new(
            seeded_index(),
            Arc::new(FakeWorklogClient::new(true, WorklogListing::NoneFound)),
        );
        assert!(matches!(
            service.list_worklogs(&credentials(), "  ").await,
            Err(InfraError::InvalidConfig(_))
        ));
        assert!(matches!(
            service.delete_worklog(&credentials(), "FES-1", "").await,
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
