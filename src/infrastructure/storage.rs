use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = open_connection(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Opens a connection that waits on a locked database instead of failing immediately.
pub fn open_connection(path: &Path) -> Result<Connection, InfraError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::initialize_database;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DATABASE: AtomicUsize = AtomicUsize::new(0);

    pub(crate) struct TempDatabase {
        dir: PathBuf,
        pub(crate) path: PathBuf,
    }

    impl TempDatabase {
        pub(crate) fn new(label: &str) -> Self {
            let sequence = NEXT_TEMP_DATABASE.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "worklog-sync-{label}-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("worklog-sync.sqlite3");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TempDatabase;
    use super::*;

    #[test]
    fn schema_can_be_applied_repeatedly() {
        let database = TempDatabase::new("storage");
        initialize_database(&database.path).expect("second initialization");

        let connection = open_connection(&database.path).expect("open");
        let tables: Vec<String> = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("collect");
        assert_eq!(
            tables,
            vec![
                "calendar_events",
                "event_index",
                "run_locks",
                "sync_windows",
                "worklog_links"
            ]
        );
    }
}
