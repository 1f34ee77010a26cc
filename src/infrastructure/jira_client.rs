use crate::domain::models::{CalendarEvent, UserCredentials, WorklogEntry, WorklogListing};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;
use url::Url;

const JIRA_STARTED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Fields sent to the tracker for one worklog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorklogDraft {
    pub started: DateTime<FixedOffset>,
    pub time_spent_seconds: i64,
    pub comment: String,
}

impl WorklogDraft {
    pub fn from_event(event: &CalendarEvent) -> Self {
        Self {
            started: event.start,
            time_spent_seconds: event.duration_seconds,
            comment: event.comment_text().to_string(),
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "comment": {
                "type": "doc",
                "version": 1,
                "content": [{
                    "type": "paragraph",
                    "content": [{ "type": "text", "text": self.comment }]
                }]
            },
            "started": self.started.format(JIRA_STARTED_FORMAT).to_string(),
            "timeSpentSeconds": self.time_spent_seconds,
        })
    }
}

/// Worklog sub-resource of an issue.
#[async_trait]
pub trait WorklogClient: Send + Sync {
    /// Returns the new worklog id. Any non-2xx answer is [`InfraError::TrackerRejected`].
    async fn create_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        draft: &WorklogDraft,
    ) -> Result<String, InfraError>;

    /// `Ok(false)` when the tracker answers non-2xx. A request that never got an
    /// answer (connect failure, timeout) is `Err(TrackerUnavailable)` so callers can
    /// tell a refusal from an outage.
    async fn update_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        worklog_id: &str,
        draft: &WorklogDraft,
    ) -> Result<bool, InfraError>;

    /// Same split as [`WorklogClient::update_worklog`]: non-2xx is `Ok(false)`,
    /// no answer is `Err(TrackerUnavailable)`.
    async fn delete_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        worklog_id: &str,
    ) -> Result<bool, InfraError>;

    async fn list_worklogs(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
    ) -> Result<WorklogListing, InfraError>;
}

#[async_trait]
pub trait IssueClient: Send + Sync {
    /// Email of the issue's assignee; `None` when the issue is unassigned.
    async fn fetch_assignee_email(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
    ) -> Result<Option<String>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestJiraClient {
    client: Client,
    base_url: String,
}

impl ReqwestJiraClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            InfraError::TrackerUnavailable(format!("failed to build http client: {error}"))
        })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn issue_endpoint(&self, issue_key: &str, tail: &[&str]) -> Result<Url, InfraError> {
        if issue_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig("issue key must not be empty".to_string()));
        }
        let mut url = Url::parse(&self.base_url).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid jira base url '{}': {error}", self.base_url))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("jira base URL cannot be a base".to_string())
            })?;
            segments
                .pop_if_empty()
                .extend(["rest", "api", "3", "issue", issue_key.trim()]);
            segments.extend(tail);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder, credentials: &UserCredentials) -> RequestBuilder {
        request
            .basic_auth(
                &credentials.tracker_email,
                Some(&credentials.tracker_api_token),
            )
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(request: RequestBuilder, action: &str) -> Result<(StatusCode, String), InfraError> {
        let response: Response = request.send().await.map_err(|error| {
            let kind = if error.is_timeout() { "timeout" } else { "network error" };
            InfraError::TrackerUnavailable(format!("{kind} while {action}: {error}"))
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::TrackerUnavailable(format!("failed reading response while {action}: {error}"))
        })?;
        Ok((status, body))
    }
}

#[derive(Debug, serde::Deserialize)]
struct CreatedWorklog {
    id: serde_json::Value,
}

#[derive(Debug, serde::Deserialize)]
struct WorklogPage {
    total: Option<u64>,
    #[serde(default)]
    worklogs: Vec<RemoteWorklog>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteWorklog {
    id: String,
    author: Option<RemoteUser>,
    #[serde(default)]
    started: String,
    #[serde(default)]
    time_spent: String,
    #[serde(default)]
    time_spent_seconds: i64,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteUser {
    display_name: Option<String>,
    email_address: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct IssueAssigneeResponse {
    fields: Option<IssueAssigneeFields>,
}

#[derive(Debug, serde::Deserialize)]
struct IssueAssigneeFields {
    assignee: Option<RemoteUser>,
}

fn id_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[async_trait]
impl WorklogClient for ReqwestJiraClient {
    async fn create_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        draft: &WorklogDraft,
    ) -> Result<String, InfraError> {
        let endpoint = self.issue_endpoint(issue_key, &["worklog"])?;
        let request = self
            .authorized(self.client.post(endpoint), credentials)
            .json(&draft.to_payload());
        let (status, body) = Self::send(request, "creating worklog").await?;

        if !status.is_success() {
            return Err(InfraError::TrackerRejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<CreatedWorklog>(&body)
            .ok()
            .and_then(|created| id_as_string(&created.id))
            .ok_or(InfraError::TrackerRejected {
                status: status.as_u16(),
                body,
            })
    }

    async fn update_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        worklog_id: &str,
        draft: &WorklogDraft,
    ) -> Result<bool, InfraError> {
        let endpoint = self.issue_endpoint(issue_key, &["worklog", worklog_id])?;
        let request = self
            .authorized(self.client.put(endpoint), credentials)
            .json(&draft.to_payload());
        let (status, body) = Self::send(request, "updating worklog").await?;

        if !status.is_success() {
            warn!(
                issue_key,
                worklog_id,
                status = status.as_u16(),
                body = body.as_str(),
                "tracker rejected worklog update"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn delete_worklog(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
        worklog_id: &str,
    ) -> Result<bool, InfraError> {
        let endpoint = self.issue_endpoint(issue_key, &["worklog", worklog_id])?;
        let request = self.authorized(self.client.delete(endpoint), credentials);
        let (status, body) = Self::send(request, "deleting worklog").await?;

        if !status.is_success() {
            warn!(
                issue_key,
                worklog_id,
                status = status.as_u16(),
                body = body.as_str(),
                "tracker rejected worklog delete"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn list_worklogs(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
    ) -> Result<WorklogListing, InfraError> {
        let endpoint = self.issue_endpoint(issue_key, &["worklog"])?;
        let request = self.authorized(self.client.get(endpoint), credentials);
        let (status, body) = Self::send(request, "listing worklogs").await?;

        if !status.is_success() {
            return Err(InfraError::TrackerRejected {
                status: status.as_u16(),
                body,
            });
        }

        let page: WorklogPage = serde_json::from_str(&body).map_err(|error| {
            InfraError::TrackerUnavailable(format!("invalid worklog list payload: {error}; body={body}"))
        })?;
        let total = page.total.unwrap_or(page.worklogs.len() as u64);
        if total == 0 || page.worklogs.is_empty() {
            return Ok(WorklogListing::NoneFound);
        }

        let normalized_key = issue_key.trim().to_uppercase();
        Ok(WorklogListing::Found(
            page.worklogs
                .into_iter()
                .map(|worklog| WorklogEntry {
                    worklog_id: worklog.id,
                    issue_key: normalized_key.clone(),
                    author_display_name: worklog
                        .author
                        .and_then(|author| author.display_name)
                        .unwrap_or_default(),
                    started: worklog.started,
                    time_spent: worklog.time_spent,
                    time_spent_seconds: worklog.time_spent_seconds,
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl IssueClient for ReqwestJiraClient {
    async fn fetch_assignee_email(
        &self,
        credentials: &UserCredentials,
        issue_key: &str,
    ) -> Result<Option<String>, InfraError> {
        let endpoint = self.issue_endpoint(issue_key, &[])?;
        let request = self
            .authorized(self.client.get(endpoint), credentials)
            .query(&[("fields", "assignee")]);
        let (status, body) = Self::send(request, "fetching issue assignee").await?;

        if !status.is_success() {
            return Err(InfraError::TrackerUnavailable(format!(
                "issue lookup failed: http {}; body={body}",
                status.as_u16()
            )));
        }

        let parsed: IssueAssigneeResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::TrackerUnavailable(format!("invalid issue payload: {error}; body={body}"))
        })?;
        Ok(parsed
            .fields
            .and_then(|fields| fields.assignee)
            .and_then(|assignee| assignee.email_address))
    }
}
