//! `zip_project`: archive a working directory to a base64-encoded zip,
//! skipping the directories that are never worth shipping back over the
//! wire (dependency trees, build output, VCS internals).

use crate::error::ExecutorError;
use crate::params::require_str;
use crate::Executor;
use async_trait::async_trait;
use base64::Engine;
use relay_protocol::{ActionParams, ActionResult};
use std::cell::Cell;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use walkdir::{DirEntry, WalkDir};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "venv",
    ".venv",
    "dist",
    "build",
    ".next",
];

const MAX_COMPRESSED_BYTES: usize = 10 * 1024 * 1024;

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIP_DIRS.contains(&name))
            .unwrap_or(false)
}

pub struct ZipProject;

#[async_trait]
impl Executor for ZipProject {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let working_dir = require_str(params, "working_dir")?.to_string();
        match tokio::task::spawn_blocking(move || zip_dir(&working_dir))
            .await
            .map_err(|e| ExecutorError::Other(format!("zip task panicked: {e}")))??
        {
            ZipOutcome::Complete(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                Ok(ActionResult::new(0, encoded, String::new()))
            }
            ZipOutcome::TooLarge(written) => Ok(ActionResult::new(
                -1,
                String::new(),
                format!(
                    "archive exceeds the {MAX_COMPRESSED_BYTES}-byte compressed limit ({written} bytes written before abort)"
                ),
            )),
        }
    }
}

enum ZipOutcome {
    Complete(Vec<u8>),
    TooLarge(usize),
}

/// Tracks bytes written to the underlying in-memory buffer independently
/// of the `Vec` itself, so the walk loop can check the running compressed
/// size without holding a second borrow of `buf`.
struct CountingWriter<W> {
    inner: W,
    written: Rc<Cell<usize>>,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(data)?;
        self.written.set(self.written.get() + n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn zip_dir(root: &str) -> Result<ZipOutcome, ExecutorError> {
    let root_path = Path::new(root);
    let mut buf = Vec::new();
    let written = Rc::new(Cell::new(0usize));
    {
        let mut writer = ZipWriter::new(CountingWriter {
            inner: std::io::Cursor::new(&mut buf),
            written: written.clone(),
        });
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for entry in WalkDir::new(root_path)
            .into_iter()
            .filter_entry(|e| !is_skipped(e))
        {
            let entry = entry.map_err(|e| ExecutorError::Other(e.to_string()))?;
            let path = entry.path();
            let relative = path.strip_prefix(root_path).unwrap_or(path);
            if relative.as_os_str().is_empty() {
                continue;
            }
            let name = relative.to_string_lossy().replace('\\', "/");

            if entry.file_type().is_dir() {
                writer
                    .add_directory(format!("{name}/"), options)
                    .map_err(|e| ExecutorError::Other(e.to_string()))?;
            } else if entry.file_type().is_file() {
                writer
                    .start_file(name, options)
                    .map_err(|e| ExecutorError::Other(e.to_string()))?;
                let data = std::fs::read(path)?;
                writer
                    .write_all(&data)
                    .map_err(ExecutorError::Io)?;
            }

            // Abort the walk as soon as the compressed size crosses the
            // limit instead of finishing the archive and discarding it.
            if written.get() > MAX_COMPRESSED_BYTES {
                return Ok(ZipOutcome::TooLarge(written.get()));
            }
        }
        writer.finish().map_err(|e| ExecutorError::Other(e.to_string()))?;
    }
    Ok(ZipOutcome::Complete(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn zips_project_and_skips_ignored_dirs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/junk.js"), "// junk").unwrap();

        let mut params = ActionParams::new();
        params.insert("working_dir".to_string(), json!(dir.path().to_string_lossy()));
        let result = ZipProject.execute(&params).await.unwrap();
        assert_eq!(result.returncode, 0);

        let archive = base64::engine::general_purpose::STANDARD
            .decode(&result.stdout)
            .unwrap();
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("main.rs")));
        assert!(!names.iter().any(|n| n.contains("node_modules")));
    }
}
