mod application;
mod domain;
mod infrastructure;

use application::commands::{
    delete_worklog_impl, list_events_impl, list_worklogs_impl, log_worklogs_impl,
    set_credentials_impl, AppState,
};
use clap::{Parser, Subcommand};
use infrastructure::error::InfraError;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "worklog-sync",
    version,
    about = "Reconcile calendar time against issue tracker worklogs"
)]
struct Cli {
    /// Directory holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List calendar events that mention an issue key, grouped by day
    ListEvents {
        #[arg(long)]
        user: String,
        /// today, yesterday, next_seven_days, last_seven_days, next N or last N
        #[arg(required = true, num_args = 1..)]
        range: Vec<String>,
    },
    /// Create or update one worklog per event and prune events that left the last listing
    Log {
        #[arg(long)]
        user: String,
        #[arg(required = true, num_args = 1..)]
        event_ids: Vec<String>,
    },
    /// List the worklogs recorded on an issue
    Worklogs {
        #[arg(long)]
        user: String,
        issue_key: String,
    },
    /// Delete a worklog and unlink the event it was created from
    DeleteWorklog {
        #[arg(long)]
        user: String,
        issue_key: String,
        worklog_id: String,
    },
    /// Store a credential bundle read from a JSON file
    SetCredentials {
        #[arg(long)]
        user: String,
        #[arg(long)]
        file: PathBuf,
    },
}

pub async fn run() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => match std::env::current_dir() {
            Ok(path) => path,
            Err(error) => {
                eprintln!("failed to resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    if let Err(error) = init_tracing(&workspace_root.join("logs")) {
        eprintln!("failed to initialize logging: {error}");
    }

    let state = match AppState::new(workspace_root) {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "failed to initialize app state");
            eprintln!("{error}");
            return ExitCode::FAILURE;
        }
    };

    match dispatch(&state, cli.command).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(state: &AppState, command: Commands) -> Result<String, String> {
    match command {
        Commands::ListEvents { user, range } => {
            let listing = list_events_impl(state, user, range)
                .await
                .map_err(|error| state.command_error("list_events", &error))?;
            render(state, "list_events", &listing)
        }
        Commands::Log { user, event_ids } => {
            let outcome = log_worklogs_impl(state, user, event_ids)
                .await
                .map_err(|error| state.command_error("log_worklogs", &error))?;
            render(state, "log_worklogs", &outcome)
        }
        Commands::Worklogs { user, issue_key } => {
            let listing = list_worklogs_impl(state, user, issue_key)
                .await
                .map_err(|error| state.command_error("list_worklogs", &error))?;
            render(state, "list_worklogs", &listing)
        }
        Commands::DeleteWorklog {
            user,
            issue_key,
            worklog_id,
        } => {
            let outcome = delete_worklog_impl(state, user, issue_key, worklog_id)
                .await
                .map_err(|error| state.command_error("delete_worklog", &error))?;
            render(state, "delete_worklog", &outcome)
        }
        Commands::SetCredentials { user, file } => {
            set_credentials_impl(state, user.clone(), file)
                .map_err(|error| state.command_error("set_credentials", &error))?;
            render(
                state,
                "set_credentials",
                &serde_json::json!({ "user": user.trim(), "stored": true }),
            )
        }
    }
}

fn render<T: Serialize>(state: &AppState, command: &str, value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value)
        .map_err(|error| state.command_error(command, &InfraError::from(error)))
}

/// JSON lines appended to `logs/commands.log`; `RUST_LOG` overrides the default `info` filter.
fn init_tracing(logs_dir: &Path) -> Result<(), InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join("commands.log"))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn range_words_are_collected_in_order() {
        let cli = Cli::try_parse_from(["worklog-sync", "list-events", "--user", "U1", "next", "3"])
            .expect("parse");
        match cli.command {
            Commands::ListEvents { user, range } => {
                assert_eq!(user, "U1");
                assert_eq!(range, vec!["next", "3"]);
            }
            _ => panic!("expected list-events"),
        }
    }

    #[test]
    fn log_requires_event_ids() {
        assert!(Cli::try_parse_from(["worklog-sync", "log", "--user", "U1"]).is_err());
    }
}
