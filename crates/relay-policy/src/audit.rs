//! Append-only JSONL audit trail (spec §4.E).
//!
//! One record per dispatch attempt, win or lose. Writing happens on a
//! dedicated background task so a slow or momentarily-stalled disk never
//! adds latency to the dispatch path: callers push onto an unbounded
//! channel and move on.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How a dispatch attempt ended, for the audit trail. Distinct from
/// [`relay_protocol::ResponseStatus`], which only knows success/error —
/// this captures *why* a non-execution happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Executed,
    Blocked,
    DeniedByOperator,
    RateLimited,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: time::OffsetDateTime,
    pub request_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub action: String,
    pub tier: relay_protocol::Tier,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditRecord {
    pub fn new(
        request_id: Uuid,
        action: impl Into<String>,
        tier: relay_protocol::Tier,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: time::OffsetDateTime::now_utc(),
            request_id,
            task_id: None,
            action: action.into(),
            tier,
            outcome,
            reason: None,
            duration_ms: None,
        }
    }

    pub fn with_task_id(mut self, task_id: Option<String>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Handle to the audit writer task. Cloning shares the same underlying
/// channel and, therefore, the same target file.
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditLogger {
    /// Spawn the writer task. The target file (and its parent directory)
    /// is created lazily on first write, not here, so constructing a
    /// logger never touches the filesystem.
    pub fn spawn(path: PathBuf) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditRecord>();

        tokio::spawn(async move {
            let mut file = None;
            while let Some(record) = receiver.recv().await {
                if file.is_none() {
                    file = match open_append(&path).await {
                        Ok(f) => Some(f),
                        Err(e) => {
                            tracing::error!(path = %path.display(), error = %e, "failed to open audit log");
                            continue;
                        }
                    };
                }
                let Some(f) = file.as_mut() else { continue };
                match serde_json::to_string(&record) {
                    Ok(mut line) => {
                        line.push('\n');
                        if let Err(e) = f.write_all(line.as_bytes()).await {
                            tracing::error!(error = %e, "failed to append audit record, dropping file handle");
                            file = None;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialise audit record"),
                }
            }
        });

        Self { sender }
    }

    /// Record an outcome. Never blocks and never fails the caller's
    /// dispatch path: a full or closed channel just drops the record,
    /// logging a warning so the gap is at least visible in `tracing`.
    pub fn log(&self, record: AuditRecord) {
        if self.sender.send(record).is_err() {
            tracing::warn!("audit writer task is gone, dropping record");
        }
    }
}

async fn open_append(path: &PathBuf) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::Tier;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_one_jsonl_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let logger = AuditLogger::spawn(path.clone());

        logger.log(
            AuditRecord::new(Uuid::new_v4(), "git_status", Tier::Auto, AuditOutcome::Executed)
                .with_duration(12),
        );
        logger.log(AuditRecord::new(
            Uuid::new_v4(),
            "format_disk",
            Tier::Blocked,
            AuditOutcome::Blocked,
        ));

        // Give the background task a moment to drain the channel.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "git_status");
        assert_eq!(first["outcome"], "EXECUTED");
    }

    #[tokio::test]
    async fn parent_directory_is_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does").join("not").join("exist").join("audit.jsonl");
        assert!(!path.parent().unwrap().exists());

        let logger = AuditLogger::spawn(path.clone());
        logger.log(AuditRecord::new(
            Uuid::new_v4(),
            "list_directory",
            Tier::Auto,
            AuditOutcome::Executed,
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(path.exists());
    }
}
