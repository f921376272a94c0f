//! Dispatches the same action catalogue the worker's local executors
//! handle, but over a single SSH connection to the operator's machine.
//! Used by the gateway when no websocket session is live.

use crate::client::{SshClient, SshConfig};
use crate::error::SshError;
use crate::platform::Platform;
use crate::quoting::{posix_command, windows_encoded_command};
use crate::sanitize::strip_clixml;
use base64::Engine;
use once_cell::sync::Lazy;
use relay_policy::AllowedRoots;
use relay_protocol::{ActionParams, ActionResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const INSTALL_TIMEOUT_SECS: u64 = 300;
const DOCKER_BUILD_TIMEOUT_SECS: u64 = 600;
const FILE_READ_LIMIT: usize = 64 * 1024;
const FILE_WRITE_LIMIT: usize = 1024 * 1024;
const MAX_COMPRESSED_ARCHIVE_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5-coder:7b";
const DEFAULT_OLLAMA_MAX_TOKENS: u64 = 4096;

/// `messages`/`tools` may arrive either as a JSON-encoded string or as an
/// already-decoded JSON value, same as the worker-local ollama executor.
fn ollama_json_param(params: &ActionParams, key: &str) -> Option<Result<Value, serde_json::Error>> {
    let raw = params.get(key)?;
    match raw.as_str() {
        Some(s) => Some(serde_json::from_str(s)),
        None => Some(Ok(raw.clone())),
    }
}

fn ollama_convert_tools(tools: &Value) -> Vec<Value> {
    let Some(tools) = tools.as_array() else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|tool| {
            if let Some(name) = tool.get("name").and_then(Value::as_str) {
                Some(json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.get("description").cloned().unwrap_or(json!("")),
                        "parameters": tool.get("input_schema").cloned().unwrap_or(json!({})),
                    }
                }))
            } else if tool.get("type").and_then(Value::as_str) == Some("function") {
                Some(tool.clone())
            } else {
                None
            }
        })
        .collect()
}

/// Normalises a raw Ollama `/api/chat` reply into the
/// `{text, tool_calls, stop_reason, input_tokens, output_tokens, model,
/// provider_name}` shape the worker-local transport also returns, so
/// callers see one contract regardless of which transport answered.
fn ollama_normalize(data: &Value, model: &str) -> Value {
    let message = data.get("message").cloned().unwrap_or(json!({}));
    let text = message.get("content").and_then(Value::as_str).unwrap_or("").to_string();
    let tool_calls: Vec<Value> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, tc)| {
            let func = tc.get("function").cloned().unwrap_or(json!({}));
            json!({
                "id": format!("ollama_{i}"),
                "name": func.get("name").and_then(Value::as_str).unwrap_or(""),
                "input": func.get("arguments").cloned().unwrap_or(json!({})),
            })
        })
        .collect();
    let stop_reason = if tool_calls.is_empty() { "end_turn" } else { "tool_use" };

    json!({
        "text": text,
        "tool_calls": tool_calls,
        "stop_reason": stop_reason,
        "input_tokens": data.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0),
        "output_tokens": data.get("eval_count").and_then(Value::as_u64).unwrap_or(0),
        "model": model,
        "provider_name": "ollama",
    })
}

/// Same allow-list as the worker's local `close_app`, one table per
/// target platform (spec §6: "Allowed-app table (Windows close_app)...
/// chrome→chrome.exe, firefox→firefox.exe, edge→msedge.exe, code→Code.exe,
/// explorer→explorer.exe"). The caller-supplied friendly name is looked up
/// here, never passed to the remote shell directly.
static ALLOWED_APPS_UNIX: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("vscode", "code"),
        ("chrome", "chrome"),
        ("firefox", "firefox"),
        ("slack", "slack"),
        ("docker_desktop", "Docker Desktop"),
        ("terminal", "Terminal"),
    ]
    .into_iter()
    .collect()
});

static ALLOWED_APPS_WINDOWS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("vscode", "Code.exe"),
        ("chrome", "chrome.exe"),
        ("firefox", "firefox.exe"),
        ("edge", "msedge.exe"),
        ("explorer", "explorer.exe"),
        ("notepad", "notepad.exe"),
        ("terminal", "WindowsTerminal.exe"),
        ("docker_desktop", "Docker Desktop.exe"),
        ("slack", "slack.exe"),
    ]
    .into_iter()
    .collect()
});

pub struct SshExecutor {
    config: SshConfig,
    platform: Platform,
    allowed_roots: AllowedRoots,
    client: Mutex<Option<SshClient>>,
}

impl SshExecutor {
    pub fn new(config: SshConfig, platform: Platform, allowed_roots: AllowedRoots) -> Self {
        Self {
            config,
            platform,
            allowed_roots,
            client: Mutex::new(None),
        }
    }

    fn require_str<'a>(&self, params: &'a ActionParams, key: &str) -> Result<&'a str, SshError> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SshError::Unsupported(format!("missing or non-string '{key}'")))
    }

    fn check_path(&self, value: &str) -> Result<(), SshError> {
        self.allowed_roots
            .canonicalize_and_check(value)
            .map(|_| ())
            .map_err(SshError::Sftp)
    }

    /// Run a PowerShell script directly (no `cd`/argv wrapping), via the
    /// same `-EncodedCommand` transport used for ordinary command ops.
    /// Used as the Windows filesystem fallback when SFTP can't perform an
    /// operation (spec §4.J: "PowerShell fallback on Windows when SFTP
    /// cannot perform the operation").
    async fn powershell(&self, script: &str, timeout_secs: u64) -> Result<ActionResult, SshError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(SshClient::connect(&self.config).await?);
        }
        let client = guard.as_mut().expect("just connected");
        let args = windows_encoded_command(script);
        let command = format!("powershell.exe {}", args.join(" "));
        match client.exec(&command, timeout_secs).await {
            Ok((code, stdout, stderr)) => Ok(ActionResult::new(code, stdout, strip_clixml(&stderr))),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    /// Run `argv` in `working_dir`, producing `(returncode, stdout, stderr)`.
    async fn run(
        &self,
        working_dir: &str,
        argv: &[&str],
        timeout_secs: u64,
    ) -> Result<ActionResult, SshError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(SshClient::connect(&self.config).await?);
        }
        let client = guard.as_mut().expect("just connected");

        let command = match self.platform {
            Platform::Unix => posix_command(working_dir, argv),
            Platform::Windows => {
                let script = format!(
                    "Set-Location -LiteralPath '{working_dir}'; & {}",
                    argv.join(" ")
                );
                let args = windows_encoded_command(&script);
                format!("powershell.exe {}", args.join(" "))
            }
        };

        match client.exec(&command, timeout_secs).await {
            Ok((code, stdout, stderr)) => Ok(ActionResult::new(code, stdout, strip_clixml(&stderr))),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    pub async fn dispatch(&self, action: &str, params: &ActionParams) -> Result<ActionResult, SshError> {
        match action {
            "git_status" => self.git(params, &["status", "--short", "--branch"]).await,
            "git_diff" => self.git(params, &["diff"]).await,
            "git_log" => self.git(params, &["log", "--oneline", "-20"]).await,
            "git_commit" => self.git_commit(params).await,
            "git_push" => self.git(params, &["push"]).await,
            "run_tests" => {
                let working_dir = self.require_str(params, "working_dir")?;
                self.check_path(working_dir)?;
                self.run(working_dir, &["python3", "-m", "pytest", "-q"], DEFAULT_TIMEOUT_SECS)
                    .await
            }
            "install_dependencies" => self.install_dependencies(params).await,
            "docker_build" => self.docker_build(params).await,
            "file_read" => self.file_read(params).await,
            "file_write" => self.file_write(params).await,
            "create_directory" => self.create_directory(params).await,
            "list_directory" => self.list_directory(params).await,
            "close_app" => self.close_app(params).await,
            "zip_project" => self.zip_project(params).await,
            "ollama_chat" => self.ollama_chat(params).await,
            "web_search" => self.web_search(params).await,
            other => Err(SshError::Unsupported(other.to_string())),
        }
    }

    /// Unlike every other action, `web_search` never touches the operator's
    /// machine at all — serviced in-process, same as the worker-side
    /// executor (spec §4.J: "`web_search` is serviced in-process... rather
    /// than remotely").
    async fn web_search(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let query = self.require_str(params, "query")?;
        let limit = params.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        match crate::web_search::web_search(query, limit).await {
            Ok(results) => Ok(ActionResult::new(
                0,
                serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string()),
                String::new(),
            )),
            Err(e) => Ok(ActionResult::new(-1, String::new(), format!("web search request failed: {e}"))),
        }
    }

    async fn git(&self, params: &ActionParams, args: &[&str]) -> Result<ActionResult, SshError> {
        let working_dir = self.require_str(params, "working_dir")?;
        self.check_path(working_dir)?;
        self.run(working_dir, args, DEFAULT_TIMEOUT_SECS).await
    }

    async fn git_commit(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let working_dir = self.require_str(params, "working_dir")?;
        let message = self.require_str(params, "message")?;
        self.check_path(working_dir)?;
        let add = self.run(working_dir, &["git", "add", "-A"], DEFAULT_TIMEOUT_SECS).await?;
        if add.returncode != 0 {
            return Ok(add);
        }
        self.run(working_dir, &["git", "commit", "-m", message], DEFAULT_TIMEOUT_SECS)
            .await
    }

    async fn install_dependencies(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let working_dir = self.require_str(params, "working_dir")?;
        let manager = self.require_str(params, "manager")?;
        self.check_path(working_dir)?;
        let argv: &[&str] = match manager {
            "npm" => &["npm", "install"],
            "yarn" => &["yarn", "install"],
            "pnpm" => &["pnpm", "install"],
            "pip" => &["pip", "install", "-r", "requirements.txt"],
            "poetry" => &["poetry", "install"],
            "uv" => &["uv", "sync"],
            other => {
                return Ok(ActionResult::new(
                    -1,
                    String::new(),
                    format!("unsupported package manager '{other}'"),
                ));
            }
        };
        self.run(working_dir, argv, INSTALL_TIMEOUT_SECS).await
    }

    async fn docker_build(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let working_dir = self.require_str(params, "working_dir")?;
        let tag = self.require_str(params, "tag")?;
        self.check_path(working_dir)?;
        self.run(working_dir, &["docker", "build", "-t", tag, "."], DOCKER_BUILD_TIMEOUT_SECS)
            .await
    }

    async fn close_app(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let name = self.require_str(params, "name")?;
        let table = match self.platform {
            Platform::Unix => &*ALLOWED_APPS_UNIX,
            Platform::Windows => &*ALLOWED_APPS_WINDOWS,
        };
        let Some(process_name) = table.get(name) else {
            return Ok(ActionResult::new(
                -1,
                String::new(),
                format!("'{name}' is not in the allowed app list"),
            ));
        };
        match self.platform {
            Platform::Unix => {
                self.run(".", &["pkill", "-x", process_name], DEFAULT_TIMEOUT_SECS).await
            }
            Platform::Windows => {
                self.run(".", &["taskkill", "/IM", process_name, "/F"], DEFAULT_TIMEOUT_SECS)
                    .await
            }
        }
    }

    async fn zip_project(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let working_dir = self.require_str(params, "working_dir")?;
        self.check_path(working_dir)?;
        // Stream a deflated tar out as base64 rather than shipping `zip`
        // itself — more consistently present on bare operator machines.
        let remote = "tar --exclude node_modules --exclude __pycache__ --exclude .git \
             --exclude venv --exclude .venv --exclude dist --exclude build --exclude .next \
             -czf - . | base64";
        let result = self.run(working_dir, &["sh", "-c", remote], DEFAULT_TIMEOUT_SECS).await?;
        if result.returncode != 0 {
            return Ok(result);
        }
        // The base64 text is ~4/3 the underlying compressed bytes; compare
        // against the same limit the worker-local transport enforces
        // (spec §4.J: the two transports share one action contract).
        let approx_compressed_bytes = result.stdout.len() * 3 / 4;
        if approx_compressed_bytes > MAX_COMPRESSED_ARCHIVE_BYTES {
            return Ok(ActionResult::new(
                -1,
                String::new(),
                format!(
                    "archive exceeds the {MAX_COMPRESSED_ARCHIVE_BYTES}-byte compressed limit (~{approx_compressed_bytes} bytes)"
                ),
            ));
        }
        Ok(result)
    }

    async fn ollama_chat(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let messages = match ollama_json_param(params, "messages") {
            Some(Ok(Value::Array(items))) => items,
            Some(Ok(_)) | None => Vec::new(),
            Some(Err(e)) => {
                return Ok(ActionResult::new(1, String::new(), format!("Invalid messages JSON: {e}")));
            }
        };
        let model = params
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_OLLAMA_MODEL)
            .to_string();
        let system = params.get("system").and_then(Value::as_str).unwrap_or("");
        let max_tokens = params.get("max_tokens").and_then(Value::as_u64).unwrap_or(DEFAULT_OLLAMA_MAX_TOKENS);
        let temperature = params.get("temperature").and_then(Value::as_f64).unwrap_or(0.0);
        let tools = match ollama_json_param(params, "tools") {
            Some(Ok(v)) => {
                let converted = ollama_convert_tools(&v);
                if converted.is_empty() { None } else { Some(converted) }
            }
            Some(Err(_)) | None => None,
        };

        let mut ollama_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            ollama_messages.push(json!({"role": "system", "content": system}));
        }
        ollama_messages.extend(messages);

        let mut body = json!({
            "model": model,
            "messages": ollama_messages,
            "stream": false,
            "options": { "num_predict": max_tokens, "temperature": temperature },
        });
        if let Some(tools) = tools {
            body["tools"] = Value::Array(tools);
        }

        let remote = format!(
            "curl -s -X POST http://localhost:11434/api/chat -d {}",
            crate::quoting::posix_quote(&body.to_string())
        );
        let raw = self.run(".", &["sh", "-c", &remote], DEFAULT_TIMEOUT_SECS).await?;
        if raw.returncode != 0 {
            return Ok(raw);
        }
        match serde_json::from_str::<Value>(&raw.stdout) {
            Ok(data) => Ok(ActionResult::new(0, ollama_normalize(&data, &model).to_string(), String::new())),
            Err(e) => Ok(ActionResult::new(1, String::new(), format!("failed to parse ollama response: {e}"))),
        }
    }

    async fn file_read(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let path = self.require_str(params, "file")?;
        self.check_path(path)?;
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(SshClient::connect(&self.config).await?);
        }
        let client = guard.as_mut().expect("just connected");
        let sftp_result = async {
            let mut sftp = client.sftp().await?;
            sftp.read(path).await.map_err(|e| SshError::Sftp(e.to_string()))
        }
        .await;
        drop(guard);

        let bytes = match sftp_result {
            Ok(bytes) => bytes,
            Err(e) if self.platform == Platform::Windows => {
                tracing::debug!(error = %e, "sftp read failed, falling back to PowerShell");
                return self.file_read_powershell(path).await;
            }
            Err(e) => return Err(e),
        };
        let truncated = bytes.len() > FILE_READ_LIMIT;
        let mut content = String::from_utf8_lossy(&bytes[..bytes.len().min(FILE_READ_LIMIT)]).into_owned();
        if truncated {
            content.push_str("…[truncated]");
        }
        Ok(ActionResult::new(0, content, String::new()))
    }

    /// Read a file via `Get-Content -Encoding Byte` + base64, for SFTP
    /// subsystems disabled on locked-down Windows hosts.
    async fn file_read_powershell(&self, path: &str) -> Result<ActionResult, SshError> {
        let script = format!(
            "[Convert]::ToBase64String([System.IO.File]::ReadAllBytes('{}'))",
            path.replace('\'', "''")
        );
        let result = self.powershell(&script, DEFAULT_TIMEOUT_SECS).await?;
        if result.returncode != 0 {
            return Ok(result);
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(result.stdout.trim())
            .unwrap_or_default();
        let truncated = bytes.len() > FILE_READ_LIMIT;
        let mut content = String::from_utf8_lossy(&bytes[..bytes.len().min(FILE_READ_LIMIT)]).into_owned();
        if truncated {
            content.push_str("…[truncated]");
        }
        Ok(ActionResult::new(0, content, String::new()))
    }

    async fn file_write(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let path = self.require_str(params, "file")?;
        let content = self.require_str(params, "content")?;
        self.check_path(path)?;
        if content.len() > FILE_WRITE_LIMIT {
            return Ok(ActionResult::new(
                -1,
                String::new(),
                format!("content exceeds the {FILE_WRITE_LIMIT}-byte write limit"),
            ));
        }
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(SshClient::connect(&self.config).await?);
        }
        let client = guard.as_mut().expect("just connected");
        let sftp_result = async {
            let mut sftp = client.sftp().await?;
            sftp.write(path, content.as_bytes())
                .await
                .map_err(|e| SshError::Sftp(e.to_string()))
        }
        .await;
        drop(guard);

        if let Err(e) = sftp_result {
            if self.platform == Platform::Windows {
                tracing::debug!(error = %e, "sftp write failed, falling back to PowerShell");
                return self.file_write_powershell(path, content).await;
            }
            return Err(e);
        }
        Ok(ActionResult::new(0, format!("wrote {} bytes to {path}", content.len()), String::new()))
    }

    /// Write a file via base64-encoded bytes handed to
    /// `[System.IO.File]::WriteAllBytes`, for the same SFTP-disabled case.
    async fn file_write_powershell(&self, path: &str, content: &str) -> Result<ActionResult, SshError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let script = format!(
            "[System.IO.File]::WriteAllBytes('{}', [Convert]::FromBase64String('{}'))",
            path.replace('\'', "''"),
            encoded
        );
        let result = self.powershell(&script, DEFAULT_TIMEOUT_SECS).await?;
        if result.returncode != 0 {
            return Ok(result);
        }
        Ok(ActionResult::new(0, format!("wrote {} bytes to {path}", content.len()), String::new()))
    }

    async fn create_directory(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let directory = self.require_str(params, "directory")?;
        self.check_path(directory)?;
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(SshClient::connect(&self.config).await?);
        }
        let client = guard.as_mut().expect("just connected");
        let sftp_result = async {
            let mut sftp = client.sftp().await?;
            sftp.create_dir(directory)
                .await
                .map_err(|e| SshError::Sftp(e.to_string()))
        }
        .await;
        drop(guard);

        if let Err(e) = sftp_result {
            if self.platform == Platform::Windows {
                tracing::debug!(error = %e, "sftp mkdir failed, falling back to PowerShell");
                let script = format!(
                    "New-Item -ItemType Directory -Force -Path '{}' | Out-Null",
                    directory.replace('\'', "''")
                );
                let result = self.powershell(&script, DEFAULT_TIMEOUT_SECS).await?;
                if result.returncode != 0 {
                    return Ok(result);
                }
                return Ok(ActionResult::new(0, format!("created {directory}"), String::new()));
            }
            return Err(e);
        }
        Ok(ActionResult::new(0, format!("created {directory}"), String::new()))
    }

    async fn list_directory(&self, params: &ActionParams) -> Result<ActionResult, SshError> {
        let directory = self.require_str(params, "directory")?;
        self.check_path(directory)?;
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(SshClient::connect(&self.config).await?);
        }
        let client = guard.as_mut().expect("just connected");
        let sftp_result = async {
            let mut sftp = client.sftp().await?;
            sftp.read_dir(directory)
                .await
                .map_err(|e| SshError::Sftp(e.to_string()))
        }
        .await;
        drop(guard);

        let listing = match sftp_result {
            Ok(listing) => listing,
            Err(e) if self.platform == Platform::Windows => {
                tracing::debug!(error = %e, "sftp readdir failed, falling back to PowerShell");
                return self.list_directory_powershell(directory).await;
            }
            Err(e) => return Err(e),
        };

        let mut names: Vec<String> = listing
            .into_iter()
            .map(|entry| {
                let is_dir = entry.file_type().is_dir();
                let name = entry.file_name();
                if is_dir {
                    format!("[DIR] {name}")
                } else {
                    let size = entry.metadata().size.unwrap_or(0);
                    format!("{name} {size}")
                }
            })
            .collect();
        names.sort();
        Ok(ActionResult::new(0, names.join("\n"), String::new()))
    }

    /// List a directory via `Get-ChildItem`, formatted to match the SFTP
    /// path's `"[DIR] name"` / `"name size"` convention.
    async fn list_directory_powershell(&self, directory: &str) -> Result<ActionResult, SshError> {
        let script = format!(
            "Get-ChildItem -LiteralPath '{}' | ForEach-Object {{ if ($_.PSIsContainer) {{ \"[DIR] $($_.Name)\" }} else {{ \"$($_.Name) $($_.Length)\" }} }}",
            directory.replace('\'', "''")
        );
        let result = self.powershell(&script, DEFAULT_TIMEOUT_SECS).await?;
        if result.returncode != 0 {
            return Ok(result);
        }
        let mut names: Vec<String> = result.stdout.lines().map(str::to_string).collect();
        names.sort();
        Ok(ActionResult::new(0, names.join("\n"), String::new()))
    }
}
