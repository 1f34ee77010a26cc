use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar date in `YYYYMMDD` form, used as the sort key of the event index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateBucket(u32);

impl DateBucket {
    pub fn from_date(date: NaiveDate) -> Self {
        // Dates before year 0 never reach the index; clamp rather than wrap.
        let year = date.year().max(0) as u32;
        Self(year * 10_000 + date.month() * 100 + date.day())
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub event_id: String,
    pub owner_id: String,
    pub summary: String,
    pub description: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_seconds: i64,
    pub issue_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worklog_id: Option<String>,
}

impl CalendarEvent {
    /// Bucket of the event's start date in UTC, the same calendar `SyncWindow` buckets use.
    pub fn bucket(&self) -> DateBucket {
        DateBucket::from_date(self.start.with_timezone(&Utc).date_naive())
    }

    /// Text sent as the worklog comment: the description when present, else the summary.
    pub fn comment_text(&self) -> &str {
        if self.description.is_empty() {
            &self.summary
        } else {
            &self.description
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.event_id, "event.event_id")?;
        validate_non_empty(&self.owner_id, "event.owner_id")?;
        validate_non_empty(&self.issue_key, "event.issue_key")?;
        if let Some(worklog_id) = self.worklog_id.as_deref() {
            validate_non_empty(worklog_id, "event.worklog_id")?;
        }
        Ok(())
    }
}

/// The `[start, end]` pair a listing was resolved for; anchors pruning on the next reconciliation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn start_bucket(&self) -> DateBucket {
        DateBucket::from_date(self.start.date_naive())
    }

    pub fn end_bucket(&self) -> DateBucket {
        DateBucket::from_date(self.end.date_naive())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.end < self.start {
            return Err("window.end must be >= window.start".to_string());
        }
        Ok(())
    }
}

/// Per-user bundle supplied by the credential store. Treated as already valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserCredentials {
    pub tracker_email: String,
    pub tracker_api_token: String,
    pub calendar_access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_refresh_token: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl UserCredentials {
    pub fn tz(&self) -> Tz {
        self.timezone.trim().parse::<Tz>().unwrap_or(Tz::UTC)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.tracker_email, "credentials.tracker_email")?;
        validate_non_empty(&self.tracker_api_token, "credentials.tracker_api_token")?;
        validate_non_empty(
            &self.calendar_access_token,
            "credentials.calendar_access_token",
        )?;
        Ok(())
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Side-index record tying a remote worklog back to the calendar event that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorklogLink {
    pub worklog_id: String,
    pub event_id: String,
    pub issue_key: String,
    pub started: DateTime<Utc>,
    pub time_spent_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorklogEntry {
    pub worklog_id: String,
    pub issue_key: String,
    pub author_display_name: String,
    pub started: String,
    pub time_spent: String,
    pub time_spent_seconds: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "worklogs", rename_all = "snake_case")]
pub enum WorklogListing {
    NoneFound,
    Found(Vec<WorklogEntry>),
}

impl WorklogListing {
    pub fn entries(&self) -> &[WorklogEntry] {
        match self {
            Self::NoneFound => &[],
            Self::Found(entries) => entries,
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(value).expect("valid datetime")
    }

    fn sample_event() -> CalendarEvent {
        CalendarEvent {
            event_id: "evt-1".to_string(),
            owner_id: "U123".to_string(),
            summary: "FES-42: standup".to_string(),
            description: String::new(),
            start: fixed_time("2024-01-10T09:00:00-05:00"),
            end: fixed_time("2024-01-10T09:15:00-05:00"),
            duration_seconds: 900,
            issue_key: "FES-42".to_string(),
            worklog_id: None,
        }
    }

    #[test]
    fn bucket_uses_the_event_utc_date() {
        let mut event = sample_event();
        event.start = fixed_time("2024-01-10T23:30:00-05:00");
        assert_eq!(event.bucket().to_string(), "20240111");
        assert_eq!(event.bucket().as_u32(), 20_240_111);

        event.start = fixed_time("2024-01-10T00:30:00+09:00");
        assert_eq!(event.bucket().to_string(), "20240109");
    }

    #[test]
    fn comment_text_falls_back_to_summary() {
        let mut event = sample_event();
        assert_eq!(event.comment_text(), "FES-42: standup");
        event.description = "real notes".to_string();
        assert_eq!(event.comment_text(), "real notes");
    }

    #[test]
    fn event_validate_rejects_blank_worklog_id() {
        let mut event = sample_event();
        assert!(event.validate().is_ok());
        event.worklog_id = Some("  ".to_string());
        assert!(event.validate().is_err());
    }

    #[test]
    fn window_buckets_follow_utc_dates() {
        let window = SyncWindow {
            start: fixed_time("2024-01-03T00:00:00Z").with_timezone(&Utc),
            end: fixed_time("2024-01-10T23:59:59.999999Z").with_timezone(&Utc),
        };
        assert_eq!(window.start_bucket().to_string(), "20240103");
        assert_eq!(window.end_bucket().to_string(), "20240110");
        assert!(window.validate().is_ok());
    }

    #[test]
    fn credentials_fall_back_to_utc_for_unknown_timezone() {
        let credentials = UserCredentials {
            tracker_email: "dev@example.com".to_string(),
            tracker_api_token: "token".to_string(),
            calendar_access_token: "access".to_string(),
            calendar_refresh_token: None,
            timezone: "Mars/Olympus".to_string(),
        };
        assert_eq!(credentials.tz(), Tz::UTC);

        let parsed: UserCredentials = serde_json::from_str(
            r#"{"tracker_email":"a@b.c","tracker_api_token":"t","calendar_access_token":"x","timezone":"America/New_York"}"#,
        )
        .expect("parse credentials");
        assert_eq!(parsed.tz(), Tz::America__New_York);
    }

    #[test]
    fn worklog_listing_serializes_with_status_tag() {
        let json = serde_json::to_value(WorklogListing::NoneFound).expect("serialize");
        assert_eq!(json, serde_json::json!({ "status": "none_found" }));
    }
}
