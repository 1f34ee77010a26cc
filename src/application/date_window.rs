use crate::domain::models::SyncWindow;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::sync_window_repository::SyncWindowRepository;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use tracing::info;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeToken {
    Today,
    Yesterday,
    NextSevenDays,
    LastSevenDays,
    Next(u32),
    Last(u32),
}

impl RangeToken {
    /// Parses `today`, `yesterday`, `next_seven_days`, `last_seven_days`,
    /// `next N` or `last N`. Words after the token are ignored.
    pub fn parse(words: &[&str]) -> Result<Self, InfraError> {
        let invalid = || InfraError::InvalidRange {
            token: words.join(" ").trim().to_string(),
        };
        let normalized = words
            .iter()
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>();

        let Some(head) = normalized.first() else {
            return Err(invalid());
        };
        match head.as_str() {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "next_seven_days" => Ok(Self::NextSevenDays),
            "last_seven_days" => Ok(Self::LastSevenDays),
            "next" | "last" => {
                let count = normalized
                    .get(1)
                    .and_then(|raw| parse_positive_count(raw))
                    .ok_or_else(invalid)?;
                if head == "next" {
                    Ok(Self::Next(count))
                } else {
                    Ok(Self::Last(count))
                }
            }
            _ => Err(invalid()),
        }
    }

    fn label(self) -> String {
        match self {
            Self::Today => "today".to_string(),
            Self::Yesterday => "yesterday".to_string(),
            Self::NextSevenDays => "next_seven_days".to_string(),
            Self::LastSevenDays => "last_seven_days".to_string(),
            Self::Next(count) => format!("next {count}"),
            Self::Last(count) => format!("last {count}"),
        }
    }
}

fn parse_positive_count(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u32>().ok().filter(|count| *count > 0)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>, InfraError> {
    let last_micro = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).ok_or_else(|| {
        InfraError::InvalidConfig("end-of-day time is out of range".to_string())
    })?;
    Ok(date.and_time(last_micro).and_utc())
}

/// Resolves `token` against `today` into a UTC window spanning whole days.
///
/// `last_seven_days` covers eight days ending yesterday.
pub fn resolve(token: RangeToken, today: NaiveDate) -> Result<SyncWindow, InfraError> {
    let overflow = || InfraError::InvalidRange {
        token: token.label(),
    };
    let back = |days: u64| today.checked_sub_days(Days::new(days)).ok_or_else(overflow);
    let forward = |days: u64| today.checked_add_days(Days::new(days)).ok_or_else(overflow);

    let (first, last) = match token {
        RangeToken::Today => (today, today),
        RangeToken::Yesterday => {
            let yesterday = back(1)?;
            (yesterday, yesterday)
        }
        RangeToken::NextSevenDays => (today, forward(7)?),
        RangeToken::LastSevenDays => (back(8)?, back(1)?),
        RangeToken::Next(count) => (today, forward(u64::from(count))?),
        RangeToken::Last(count) => (back(u64::from(count))?, back(1)?),
    };

    Ok(SyncWindow {
        start: start_of_day(first),
        end: end_of_day(last)?,
    })
}

/// Resolves a user's range words and records the window pruning will use.
pub struct DateWindowResolver<W>
where
    W: SyncWindowRepository,
{
    windows: Arc<W>,
    now_provider: NowProvider,
}

impl<W> DateWindowResolver<W>
where
    W: SyncWindowRepository,
{
    pub fn new(windows: Arc<W>) -> Self {
        Self {
            windows,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn resolve_and_record(
        &self,
        user_id: &str,
        words: &[&str],
    ) -> Result<SyncWindow, InfraError> {
        let token = RangeToken::parse(words)?;
        let today = (self.now_provider)().date_naive();
        let window = resolve(token, today)?;
        self.windows.save(user_id, &window)?;
        info!(
            user_id,
            token = token.label().as_str(),
            start = %window.start,
            end = %window.end,
            "resolved sync window"
        );
        Ok(window)
    }
}
