use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    worklog_sync::run().await
}
