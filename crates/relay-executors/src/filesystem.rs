//! Filesystem action executors. Paths arrive already canonicalised and
//! jail-checked by the validator; these executors only enforce their own
//! size limits and directory-listing shape.

use crate::error::ExecutorError;
use crate::params::require_str;
use crate::Executor;
use async_trait::async_trait;
use relay_protocol::{ActionParams, ActionResult};
use std::path::Path;

const FILE_READ_LIMIT: usize = 64 * 1024;
const FILE_WRITE_LIMIT: usize = 1024 * 1024;
const LIST_ENTRY_LIMIT: usize = 500;
const LIST_MAX_DEPTH: usize = 3;

pub struct FileRead;

#[async_trait]
impl Executor for FileRead {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let path = require_str(params, "file")?;
        let bytes = tokio::fs::read(path).await?;
        let truncated = bytes.len() > FILE_READ_LIMIT;
        let slice = &bytes[..bytes.len().min(FILE_READ_LIMIT)];
        let mut content = String::from_utf8_lossy(slice).into_owned();
        if truncated {
            content.push_str("…[truncated]");
        }
        Ok(ActionResult::new(0, content, String::new()))
    }
}

pub struct FileWrite;

#[async_trait]
impl Executor for FileWrite {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let path = require_str(params, "file")?;
        let content = require_str(params, "content")?;
        if content.len() > FILE_WRITE_LIMIT {
            return Ok(ActionResult::new(
                -1,
                String::new(),
                format!(
                    "content exceeds the {FILE_WRITE_LIMIT}-byte write limit ({} bytes given)",
                    content.len()
                ),
            ));
        }
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(ActionResult::new(
            0,
            format!("wrote {} bytes to {path}", content.len()),
            String::new(),
        ))
    }
}

pub struct CreateDirectory;

#[async_trait]
impl Executor for CreateDirectory {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let directory = require_str(params, "directory")?;
        tokio::fs::create_dir_all(directory).await?;
        Ok(ActionResult::new(0, format!("created {directory}"), String::new()))
    }
}

pub struct ListDirectory;

#[async_trait]
impl Executor for ListDirectory {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let directory = require_str(params, "directory")?.to_string();
        let (entries, truncated) = tokio::task::spawn_blocking(move || {
            list_recursive(Path::new(&directory), 0)
        })
        .await
        .map_err(|e| ExecutorError::Other(format!("list task panicked: {e}")))??;

        let mut out = entries.join("\n");
        if truncated {
            out.push_str(&format!("\n…[truncated at {LIST_ENTRY_LIMIT} entries]"));
        }
        Ok(ActionResult::new(0, out, String::new()))
    }
}

/// Depth-bounded recursive listing, alphabetical within each directory,
/// directories prefixed with `[DIR]` so the caller can tell them apart
/// without a second stat call.
fn list_recursive(root: &Path, depth: usize) -> Result<(Vec<String>, bool), ExecutorError> {
    let mut entries = Vec::new();
    let mut truncated = false;
    collect(root, root, depth, &mut entries, &mut truncated)?;
    Ok((entries, truncated))
}

fn collect(
    base: &Path,
    dir: &Path,
    depth: usize,
    out: &mut Vec<String>,
    truncated: &mut bool,
) -> Result<(), ExecutorError> {
    if out.len() >= LIST_ENTRY_LIMIT {
        *truncated = true;
        return Ok(());
    }
    let mut names: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .collect();
    names.sort_by_key(|e| e.file_name());

    for entry in names {
        if out.len() >= LIST_ENTRY_LIMIT {
            *truncated = true;
            break;
        }
        let path = entry.path();
        let relative = path.strip_prefix(base).unwrap_or(&path).display();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            out.push(format!("[DIR] {relative}"));
            if depth + 1 < LIST_MAX_DEPTH {
                collect(base, &path, depth + 1, out, truncated)?;
            }
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            out.push(format!("{relative} {size}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");

        let mut params = ActionParams::new();
        params.insert("file".to_string(), json!(path.to_string_lossy()));
        params.insert("content".to_string(), json!("hello"));
        let write_result = FileWrite.execute(&params).await.unwrap();
        assert_eq!(write_result.returncode, 0);

        let mut read_params = ActionParams::new();
        read_params.insert("file".to_string(), json!(path.to_string_lossy()));
        let read_result = FileRead.execute(&read_params).await.unwrap();
        assert_eq!(read_result.stdout, "hello");
    }

    #[tokio::test]
    async fn file_write_over_limit_is_rejected_without_touching_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let mut params = ActionParams::new();
        params.insert("file".to_string(), json!(path.to_string_lossy()));
        params.insert("content".to_string(), json!("a".repeat(FILE_WRITE_LIMIT + 1)));
        let result = FileWrite.execute(&params).await.unwrap();
        assert_eq!(result.returncode, -1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn list_directory_is_alphabetical_with_dir_prefix_and_file_size() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("a_dir")).unwrap();

        let mut params = ActionParams::new();
        params.insert("directory".to_string(), json!(dir.path().to_string_lossy()));
        let result = ListDirectory.execute(&params).await.unwrap();
        let lines: Vec<&str> = result.stdout.lines().collect();
        assert_eq!(lines[0], "[DIR] a_dir");
        assert_eq!(lines[1], "b.txt 5");
    }

    #[tokio::test]
    async fn list_directory_respects_depth_cap() {
        let dir = tempdir().unwrap();
        let mut nested = dir.path().to_path_buf();
        for name in ["l1", "l2", "l3", "l4"] {
            nested = nested.join(name);
            std::fs::create_dir(&nested).unwrap();
        }
        let mut params = ActionParams::new();
        params.insert("directory".to_string(), json!(dir.path().to_string_lossy()));
        let result = ListDirectory.execute(&params).await.unwrap();
        assert!(!result.stdout.contains("l4"));
    }
}
