//! Operator approval gate for `CONFIRM`-tier actions submitted without a
//! caller-supplied `confirmed: true`.
//!
//! The prompt runs on a blocking thread since it reads stdin; the async
//! side just waits on the resulting `JoinHandle` with a deadline. If the
//! deadline passes, the blocking read is abandoned (the thread keeps
//! waiting on stdin, harmlessly, until the process exits) and the action
//! is treated as denied.

use std::time::Duration;
use uuid::Uuid;

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn confirm(action: &str, request_id: Uuid) -> bool {
    let prompt = format!("Approve '{action}' ({request_id})? [y/N]: ");

    let handle = tokio::task::spawn_blocking(move || {
        use std::io::Write;
        print!("{prompt}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let read = std::io::stdin().read_line(&mut line);
        read.is_ok() && line.trim().eq_ignore_ascii_case("y")
    });

    match tokio::time::timeout(APPROVAL_TIMEOUT, handle).await {
        Ok(Ok(approved)) => approved,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "approval prompt task panicked");
            false
        }
        Err(_) => {
            tracing::warn!(%request_id, "approval timed out after {:?}, denying", APPROVAL_TIMEOUT);
            false
        }
    }
}
