use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::DEFAULT_CALENDAR_API_BASE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_CALENDAR_ID: &str = "primary";
const DEFAULT_SEARCH_TERM: &str = "FES";
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

const JIRA_BASE_URL_KEYS: &[&str] = &["WORKLOG_SYNC_JIRA_BASE_URL", "JIRA_BASE_URL"];
const CALENDAR_ID_KEYS: &[&str] = &["WORKLOG_SYNC_CALENDAR_ID"];
const SEARCH_TERM_KEYS: &[&str] = &["WORKLOG_SYNC_SEARCH_TERM"];
const HTTP_TIMEOUT_KEYS: &[&str] = &["WORKLOG_SYNC_HTTP_TIMEOUT_SECONDS"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub jira_base_url: Option<String>,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default = "default_search_term")]
    pub search_term: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,
}

fn default_calendar_id() -> String {
    DEFAULT_CALENDAR_ID.to_string()
}

fn default_search_term() -> String {
    DEFAULT_SEARCH_TERM.to_string()
}

fn default_http_timeout_seconds() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECONDS
}

fn default_calendar_api_base() -> String {
    DEFAULT_CALENDAR_API_BASE.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jira_base_url: None,
            calendar_id: default_calendar_id(),
            search_term: default_search_term(),
            http_timeout_seconds: default_http_timeout_seconds(),
            calendar_api_base: default_calendar_api_base(),
        }
    }
}

impl AppConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn require_jira_base_url(&self) -> Result<&str, InfraError> {
        self.jira_base_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                InfraError::InvalidConfig(format!(
                    "missing jira base url (set jiraBaseUrl in {APP_JSON} or one of: {})",
                    JIRA_BASE_URL_KEYS.join(", ")
                ))
            })
    }

    pub fn validate(&self) -> Result<(), InfraError> {
        if self.calendar_id.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "calendarId must not be empty".to_string(),
            ));
        }
        if self.http_timeout_seconds == 0 {
            return Err(InfraError::InvalidConfig(
                "httpTimeoutSeconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_app_file() -> serde_json::Value {
    serde_json::json!({
        "schema": SUPPORTED_SCHEMA,
        "jiraBaseUrl": null,
        "calendarId": DEFAULT_CALENDAR_ID,
        "searchTerm": DEFAULT_SEARCH_TERM,
        "httpTimeoutSeconds": DEFAULT_HTTP_TIMEOUT_SECONDS,
        "calendarApiBase": DEFAULT_CALENDAR_API_BASE
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_file())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    load_config_from_lookup(config_dir, |key| std::env::var(key).ok())
}

/// Reads `app.json` and applies overrides resolved through `lookup`.
pub fn load_config_from_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read_config(&config_dir.join(APP_JSON))?;
    let mut config: AppConfig = serde_json::from_value(raw)?;

    if let Some(base_url) = optional_lookup_value(&lookup, JIRA_BASE_URL_KEYS) {
        config.jira_base_url = Some(base_url);
    }
    if let Some(calendar_id) = optional_lookup_value(&lookup, CALENDAR_ID_KEYS) {
        config.calendar_id = calendar_id;
    }
    if let Some(search_term) = optional_lookup_value(&lookup, SEARCH_TERM_KEYS) {
        config.search_term = search_term;
    }
    if let Some(raw_timeout) = optional_lookup_value(&lookup, HTTP_TIMEOUT_KEYS) {
        config.http_timeout_seconds = raw_timeout.parse::<u64>().map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid {} '{raw_timeout}': {error}",
                HTTP_TIMEOUT_KEYS.join(", ")
            ))
        })?;
    }

    config.validate()?;
    Ok(config)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
