use crate::domain::models::CalendarEvent;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use std::sync::OnceLock;

const ISSUE_KEY_PATTERN: &str = r"(?i)[A-Z]+-[0-9]+";
const DESCRIPTION_START_MARKER: &str = "<<<";
const DESCRIPTION_END_MARKER: &str = ">>>";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub start: CalendarEventDateTime,
    #[serde(default)]
    pub end: CalendarEventDateTime,
}

fn issue_key_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(ISSUE_KEY_PATTERN).expect("issue key pattern is valid"))
}

/// First issue key in `text`, matched case-insensitively and returned upper-cased.
pub fn find_issue_key(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    issue_key_regex()
        .find(&upper)
        .map(|found| found.as_str().to_string())
}

/// Text strictly between the first `<<<` and the first `>>>`, trimmed.
pub fn strip_description(description: &str) -> String {
    let Some(start) = description.find(DESCRIPTION_START_MARKER) else {
        return String::new();
    };
    let Some(end) = description.find(DESCRIPTION_END_MARKER) else {
        return String::new();
    };
    let content_start = start + DESCRIPTION_START_MARKER.len();
    if end < content_start {
        return String::new();
    }
    description[content_start..end].trim().to_string()
}

/// Keeps the entries whose title carries an issue key and normalizes them into
/// [`CalendarEvent`]s, preserving source order. Entries that cannot be read are dropped.
pub fn extract_issue_events(
    entries: &[GoogleCalendarEvent],
    owner_id: &str,
    user_tz: Tz,
) -> Vec<CalendarEvent> {
    entries
        .iter()
        .filter_map(|entry| extract_issue_event(entry, owner_id, user_tz))
        .collect()
}

fn extract_issue_event(
    entry: &GoogleCalendarEvent,
    owner_id: &str,
    user_tz: Tz,
) -> Option<CalendarEvent> {
    let summary = entry.summary.as_deref()?;
    let issue_key = find_issue_key(summary)?;
    let event_id = entry
        .id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())?;

    let start = resolve_boundary(&entry.start, user_tz)?;
    let end = resolve_boundary(&entry.end, user_tz)?;
    let duration_seconds = (end - start).num_seconds();

    Some(CalendarEvent {
        event_id: event_id.to_string(),
        owner_id: owner_id.to_string(),
        summary: summary.to_string(),
        description: entry
            .description
            .as_deref()
            .map(strip_description)
            .unwrap_or_default(),
        start,
        end,
        duration_seconds,
        issue_key,
        worklog_id: None,
    })
}

fn resolve_boundary(value: &CalendarEventDateTime, user_tz: Tz) -> Option<DateTime<FixedOffset>> {
    if let Some(date_time) = value.date_time.as_deref() {
        return DateTime::parse_from_rfc3339(date_time.trim()).ok();
    }
    let date = NaiveDate::parse_from_str(value.date.as_deref()?.trim(), "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    user_tz
        .from_local_datetime(&midnight)
        .earliest()
        .map(|local| local.fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn timed_event(id: &str, summary: &str, start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some(id.to_string()),
            summary: Some(summary.to_string()),
            description: None,
            start: CalendarEventDateTime {
                date_time: Some(start.to_string()),
                ..CalendarEventDateTime::default()
            },
            end: CalendarEventDateTime {
                date_time: Some(end.to_string()),
                ..CalendarEventDateTime::default()
            },
        }
    }

    fn all_day_event(id: &str, summary: &str, start: &str, end: &str) -> GoogleCalendarEvent {
        GoogleCalendarEvent {
            id: Some(id.to_string()),
            summary: Some(summary.to_string()),
            description: None,
            start: CalendarEventDateTime {
                date: Some(start.to_string()),
                ..CalendarEventDateTime::default()
            },
            end: CalendarEventDateTime {
                date: Some(end.to_string()),
                ..CalendarEventDateTime::default()
            },
        }
    }

    #[test]
    fn lowercase_key_is_normalized_and_plain_titles_are_dropped() {
        let entries = vec![
            timed_event("a", "fes-42: standup", "2024-01-10T09:00:00Z", "2024-01-10T09:15:00Z"),
            timed_event("b", "standup", "2024-01-10T10:00:00Z", "2024-01-10T10:15:00Z"),
        ];

        let events = extract_issue_events(&entries, "U1", Tz::UTC);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "a");
        assert_eq!(events[0].issue_key, "FES-42");
        assert_eq!(events[0].summary, "fes-42: standup");
        assert_eq!(events[0].owner_id, "U1");
        assert_eq!(events[0].duration_seconds, 900);
        assert_eq!(events[0].worklog_id, None);
    }

    #[test]
    fn first_match_wins_when_title_has_several_keys() {
        assert_eq!(find_issue_key("Pair on abc-1 and FES-2"), Some("ABC-1".to_string()));
        assert_eq!(find_issue_key("no key here"), None);
        assert_eq!(find_issue_key("FES- 12"), None);
    }

    #[test]
    fn description_is_taken_between_markers() {
        assert_eq!(strip_description("intro <<< real notes >>> outro"), "real notes");
        assert_eq!(strip_description("no markers at all"), "");
        assert_eq!(strip_description("only start <<< dangling"), "");
        assert_eq!(strip_description(">>> reversed <<<"), "");
        assert_eq!(strip_description("<<<>>>"), "");
    }

    #[test]
    fn description_markers_are_applied_during_extraction() {
        let mut entry =
            timed_event("a", "FES-1 review", "2024-01-10T09:00:00Z", "2024-01-10T10:00:00Z");
        entry.description = Some("agenda\n<<< reviewed the PR >>>\nfooter".to_string());

        let events = extract_issue_events(&[entry], "U1", Tz::UTC);
        assert_eq!(events[0].description, "reviewed the PR");
    }

    #[test]
    fn all_day_events_start_at_local_midnight() {
        let entry = all_day_event("a", "FES-7 offsite", "2024-01-10", "2024-01-11");

        let events = extract_issue_events(&[entry], "U1", Tz::America__New_York);

        assert_eq!(events[0].start.to_rfc3339(), "2024-01-10T00:00:00-05:00");
        assert_eq!(events[0].duration_seconds, 86_400);
        assert_eq!(events[0].bucket().to_string(), "20240110");
    }

    #[test]
    fn non_positive_durations_pass_through() {
        let entries = vec![
            timed_event("zero", "FES-1", "2024-01-10T09:00:00Z", "2024-01-10T09:00:00Z"),
            timed_event("neg", "FES-2", "2024-01-10T09:00:00Z", "2024-01-10T08:00:00Z"),
        ];

        let events = extract_issue_events(&entries, "U1", Tz::UTC);

        assert_eq!(events[0].duration_seconds, 0);
        assert_eq!(events[1].duration_seconds, -3600);
    }

    #[test]
    fn malformed_entries_are_excluded_without_aborting_the_batch() {
        let mut missing_id =
            timed_event("x", "FES-1", "2024-01-10T09:00:00Z", "2024-01-10T10:00:00Z");
        missing_id.id = None;
        let bad_time = timed_event("y", "FES-2", "yesterday-ish", "2024-01-10T10:00:00Z");
        let good = timed_event("z", "FES-3", "2024-01-10T09:00:00Z", "2024-01-10T10:00:00Z");

        let events = extract_issue_events(&[missing_id, bad_time, good], "U1", Tz::UTC);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "z");
    }

    #[test]
    fn source_order_is_preserved() {
        let entries = vec![
            timed_event("late", "FES-2", "2024-01-11T09:00:00Z", "2024-01-11T10:00:00Z"),
            timed_event("early", "FES-1", "2024-01-10T09:00:00Z", "2024-01-10T10:00:00Z"),
        ];

        let ids = extract_issue_events(&entries, "U1", Tz::UTC)
            .into_iter()
            .map(|event| event.event_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["late".to_string(), "early".to_string()]);
    }

    fn title_pattern() -> impl Strategy<Value = String> {
        "[A-Za-z0-9 :\\-]{0,40}".prop_map(|value| value.to_string())
    }

    // Included iff the title has a case-insensitive key; the key is the first match upper-cased.
    proptest! {
        #[test]
        fn issue_key_inclusion_matches_pattern(title in title_pattern()) {
            let entry = timed_event("evt", &title, "2024-01-10T09:00:00Z", "2024-01-10T10:00:00Z");
            let events = extract_issue_events(&[entry], "U1", Tz::UTC);

            let expected = Regex::new("[A-Z]+-[0-9]+")
                .expect("regex")
                .find(&title.to_uppercase())
                .map(|found| found.as_str().to_string());

            match expected {
                Some(key) => {
                    prop_assert_eq!(events.len(), 1);
                    prop_assert_eq!(&events[0].issue_key, &key);
                }
                None => prop_assert!(events.is_empty()),
            }
        }
    }
}
