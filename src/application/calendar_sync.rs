use crate::application::date_window::{DateWindowResolver, NowProvider};
use crate::domain::models::{CalendarEvent, SyncWindow, UserCredentials};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_index::EventIndex;
use crate::infrastructure::event_mapper::{extract_issue_events, GoogleCalendarEvent};
use crate::infrastructure::google_calendar_client::{GoogleCalendarClient, ListEventsRequest};
use crate::infrastructure::sync_window_repository::SyncWindowRepository;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListingSettings {
    pub calendar_id: String,
    pub search_term: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DayEvents {
    pub day: NaiveDate,
    pub events: Vec<CalendarEvent>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventListing {
    pub window: SyncWindow,
    pub events_by_day: Vec<DayEvents>,
    /// The batch a follow-up reconciliation confirms.
    pub event_ids: Vec<String>,
}

pub struct CalendarSyncService<C, I, W>
where
    C: GoogleCalendarClient,
    I: EventIndex,
    W: SyncWindowRepository,
{
    calendar_client: Arc<C>,
    event_index: Arc<I>,
    window_resolver: DateWindowResolver<W>,
    settings: ListingSettings,
    retry_policy: RetryPolicy,
}

impl<C, I, W> CalendarSyncService<C, I, W>
where
    C: GoogleCalendarClient,
    I: EventIndex,
    W: SyncWindowRepository,
{
    pub fn new(
        calendar_client: Arc<C>,
        event_index: Arc<I>,
        sync_window_repository: Arc<W>,
        settings: ListingSettings,
    ) -> Self {
        Self {
            calendar_client,
            event_index,
            window_resolver: DateWindowResolver::new(sync_window_repository),
            settings,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.window_resolver = self.window_resolver.with_now_provider(now_provider);
        self
    }

    /// Resolves the window, pulls issue-tagged events for it and files them in the index.
    pub async fn list_events(
        &self,
        user_id: &str,
        credentials: &UserCredentials,
        range_words: &[&str],
    ) -> Result<EventListing, InfraError> {
        let window = self.window_resolver.resolve_and_record(user_id, range_words)?;

        let request = ListEventsRequest {
            time_min: window.start,
            time_max: window.end,
            query: self.settings.search_term.clone(),
        };
        let raw_events = self
            .list_events_with_retry(&credentials.calendar_access_token, &request)
            .await?;
        let fetched = raw_events.len();

        let events = extract_issue_events(&raw_events, user_id, credentials.tz());
        for event in &events {
            self.event_index.upsert(event)?;
        }

        info!(
            user_id,
            fetched,
            matched = events.len(),
            "indexed calendar events for window"
        );
        Ok(group_by_day(window, events))
    }

    async fn list_events_with_retry(
        &self,
        access_token: &str,
        request: &ListEventsRequest,
    ) -> Result<Vec<GoogleCalendarEvent>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self
                .calendar_client
                .list_events(access_token, &self.settings.calendar_id, request)
                .await
            {
                Ok(events) => return Ok(events),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    warn!(attempt = attempt + 1, delay_ms = delay, %error, "retrying calendar fetch");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Calendar(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("network error")
                || message.contains("timeout")
                || message.contains("timed out")
                || message.contains("temporarily unavailable")
                || message.contains("connection reset")
        }
        _ => false,
    }
}

fn group_by_day(window: SyncWindow, events: Vec<CalendarEvent>) -> EventListing {
    let event_ids = events.iter().map(|event| event.event_id.clone()).collect();
    let mut days: BTreeMap<NaiveDate, Vec<CalendarEvent>> = BTreeMap::new();
    for event in events {
        days.entry(event.start.date_naive()).or_default().push(event);
    }
    EventListing {
        window,
        events_by_day: days
            .into_iter()
            .map(|(day, events)| DayEvents { day, events })
            .collect(),
        event_ids,
    }
}
