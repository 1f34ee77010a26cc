use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

#[derive(Debug, Clone)]
pub struct ListEventsRequest {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
    /// Free-text pre-filter passed as `q`.
    pub query: String,
}

#[async_trait]
pub trait GoogleCalendarClient: Send + Sync {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        request: &ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    api_base: String,
}

impl ReqwestGoogleCalendarClient {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Calendar(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Calendar(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("google calendar api error: http {}", status.as_u16())
        } else {
            format!("google calendar api error: http {}; body={body}", status.as_u16())
        };
        InfraError::Calendar(message)
    }

    fn events_endpoint(&self, calendar_id: &str) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid calendar api base url: {error}"))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                InfraError::InvalidConfig("calendar api base URL cannot be a base".to_string())
            })?
            .pop_if_empty()
            .push("calendars")
            .push(calendar_id)
            .push("events");
        Ok(url)
    }
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[async_trait]
impl GoogleCalendarClient for ReqwestGoogleCalendarClient {
    async fn list_events(
        &self,
        access_token: &str,
        calendar_id: &str,
        request: &ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.events_endpoint(calendar_id)?;
        let time_min = request.time_min.to_rfc3339();
        let time_max = request.time_max.to_rfc3339();
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut req = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("singleEvents", "true"),
                    ("maxResults", "2500"),
                    ("timeMin", time_min.as_str()),
                    ("timeMax", time_max.as_str()),
                ]);
            if !request.query.trim().is_empty() {
                req = req.query(&[("q", request.query.trim())]);
            }
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let response = req.send().await.map_err(|error| {
                let kind = if error.is_timeout() { "timeout" } else { "network error" };
                InfraError::Calendar(format!("{kind} while listing calendar events: {error}"))
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|error| {
                InfraError::Calendar(format!("network error reading events list response: {error}"))
            })?;

            if !status.is_success() {
                return Err(Self::http_error(status, &body));
            }

            let mut parsed: EventsPageResponse = serde_json::from_str(&body).map_err(|error| {
                InfraError::Calendar(format!("invalid events list payload: {error}; body={body}"))
            })?;

            events.extend(parsed.items.take().unwrap_or_default());

            match parsed.next_page_token.take() {
                Some(next_page_token) if !next_page_token.is_empty() => {
                    page_token = Some(next_page_token);
                }
                _ => break,
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ReqwestGoogleCalendarClient {
        ReqwestGoogleCalendarClient::new(
            format!("{}/calendar/v3/", server.uri()),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    fn request() -> ListEventsRequest {
        ListEventsRequest {
            time_min: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).single().expect("min"),
            time_max: Utc.with_ymd_and_hms(2024, 1, 17, 23, 59, 59).single().expect("max"),
            query: "FES".to_string(),
        }
    }

    #[tokio::test]
    async fn list_events_follows_page_tokens_with_single_events_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer access"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("q", "FES"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{ "id": "evt-2", "summary": "FES-2 review" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("timeMin", "2024-01-10T00:00:00+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": "evt-1",
                    "summary": "FES-1 standup",
                    "start": { "dateTime": "2024-01-10T09:00:00Z" },
                    "end": { "dateTime": "2024-01-10T09:15:00Z" }
                }],
                "nextPageToken": "page-2"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let events = client_for(&server)
            .list_events("access", "primary", &request())
            .await
            .expect("list events");

        let ids = events
            .iter()
            .filter_map(|event| event.id.clone())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["evt-1".to_string(), "evt-2".to_string()]);
        assert_eq!(
            events[0].start.date_time.as_deref(),
            Some("2024-01-10T09:00:00Z")
        );
    }

    #[tokio::test]
    async fn list_events_reports_http_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .list_events("access", "primary", &request())
            .await;

        match result {
            Err(InfraError::Calendar(message)) => {
                assert!(message.contains("http 401"));
                assert!(message.contains("expired"));
            }
            other => panic!("expected calendar error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_events_rejects_blank_access_token() {
        let server = MockServer::start().await;
        let result = client_for(&server).list_events(" ", "primary", &request()).await;
        assert!(matches!(result, Err(InfraError::Calendar(_))));
    }
}
