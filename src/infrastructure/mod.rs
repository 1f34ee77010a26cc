pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_index;
pub mod event_mapper;
pub mod google_calendar_client;
pub mod jira_client;
pub mod run_lock;
pub mod storage;
pub mod sync_window_repository;
