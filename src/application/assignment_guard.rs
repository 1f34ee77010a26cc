use crate::domain::models::UserCredentials;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::jira_client::IssueClient;
use std::sync::Arc;
use tracing::debug;

/// Allows time to be logged only against issues assigned to the acting user.
pub struct AssignmentGuard<T>
where
    T: IssueClient,
{
    issue_client: Arc<T>,
}

impl<T> AssignmentGuard<T>
where
    T: IssueClient,
{
    pub fn new(issue_client: Arc<T>) -> Self {
        Self { issue_client }
    }

    /// Exact, case-sensitive comparison of the assignee email with the user's tracker email.
    /// Lookup failures come back as [`InfraError::TrackerUnavailable`].
    pub async fn is_assigned(
        &self,
        issue_key: &str,
        credentials: &UserCredentials,
    ) -> Result<bool, InfraError> {
        let assignee = self
            .issue_client
            .fetch_assignee_email(credentials, issue_key)
            .await
            .map_err(|error| match error {
                InfraError::TrackerUnavailable(message) => InfraError::TrackerUnavailable(message),
                other => InfraError::TrackerUnavailable(other.to_string()),
            })?;

        let assigned = assignee.as_deref() == Some(credentials.tracker_email.as_str());
        debug!(issue_key, assigned, "checked issue assignment");
        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeIssueClient {
        assignees: HashMap<String, Option<String>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IssueClient for FakeIssueClient {
        async fn fetch_assignee_email(
            &self,
            _credentials: &UserCredentials,
            issue_key: &str,
        ) -> Result<Option<String>, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.assignees.get(issue_key) {
                Some(assignee) => Ok(assignee.clone()),
                None => Err(InfraError::TrackerRejected {
                    status: 404,
                    body: "issue does not exist".to_string(),
                }),
            }
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

    fn guard() -> AssignmentGuard<FakeIssueClient> {
        AssignmentGuard::new(Arc::new(FakeIssueClient {
            assignees: HashMap::from([
                ("FES-1".to_string(), Some("dev@example.com".to_string())),
                ("FES-2".to_string(), Some("Dev@Example.com".to_string())),
                ("FES-3".to_string(), Some("other@example.com".to_string())),
                ("FES-4".to_string(), None),
            ]),
            calls: AtomicUsize::new(0),
        }))
    }

    #[tokio::test]
    async fn assignment_requires_exact_email_match() {
        let guard = guard();
        let creds = credentials();
        assert!(guard.is_assigned("FES-1", &creds).await.expect("FES-1"));
        assert!(!guard.is_assigned("FES-2", &creds).await.expect("FES-2"));
        assert!(!guard.is_assigned("FES-3", &creds).await.expect("FES-3"));
    }

    #[tokio::test]
    async fn unassigned_issue_is_not_assigned() {
        assert!(!guard().is_assigned("FES-4", &credentials()).await.expect("FES-4"));
    }

    #[tokio::test]
    async fn lookup_failures_surface_as_tracker_unavailable() {
        let result = guard().is_assigned("NOPE-1", &credentials()).await;
        match result {
            Err(InfraError::TrackerUnavailable(message)) => {
                assert!(message.contains("404"));
            }
            other => panic!("expected tracker unavailable, got {other:?}"),
        }
    }
}
