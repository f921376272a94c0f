//! `ollama_chat`: proxy a chat completion to a local Ollama daemon. The
//! only executor that talks to the network rather than the filesystem or
//! a subprocess.
//!
//! Ollama's own reply shape is normalised into the same
//! `{text, tool_calls, stop_reason, input_tokens, output_tokens, model,
//! provider_name}` envelope every AI provider in this workspace's
//! sibling crates returns, so callers don't need to know which backend
//! answered.

use crate::error::ExecutorError;
use crate::params::{optional_f64, optional_str, optional_u64};
use crate::Executor;
use async_trait::async_trait;
use relay_protocol::{ActionParams, ActionResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const OLLAMA_URL: &str = "http://localhost:11434/api/chat";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";
const DEFAULT_MAX_TOKENS: u64 = 4096;
const ERROR_BODY_TRUNCATE: usize = 2000;

#[derive(Serialize)]
struct ChatOptions {
    num_predict: u64,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
    options: ChatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Deserialize, Default)]
struct ToolCallFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Deserialize, Default)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

pub struct OllamaChat {
    client: reqwest::Client,
}

impl Default for OllamaChat {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaChat {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }
}

/// `messages`/`tools` may arrive either as a JSON-encoded string or as an
/// already-decoded JSON value; accept both, same as the reference
/// implementation this is normalised against.
fn parse_json_param(params: &ActionParams, key: &str) -> Option<Result<Value, serde_json::Error>> {
    let raw = params.get(key)?;
    match raw.as_str() {
        Some(s) => Some(serde_json::from_str(s)),
        None => Some(Ok(raw.clone())),
    }
}

/// Converts `{name, description, input_schema}` tool definitions into
/// Ollama's OpenAI-compatible `{type:"function", function:{...}}` shape;
/// entries already in that shape pass through unchanged.
fn convert_tools(tools: &Value) -> Vec<Value> {
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

fn normalize_response(data: ChatResponse, model: &str) -> Value {
    let tool_calls: Vec<Value> = data
        .message
        .tool_calls
        .into_iter()
        .enumerate()
        .map(|(i, tc)| {
            json!({
                "id": format!("ollama_{i}"),
                "name": tc.function.name,
                "input": tc.function.arguments,
            })
        })
        .collect();
    let stop_reason = if tool_calls.is_empty() { "end_turn" } else { "tool_use" };

    json!({
        "text": data.message.content,
        "tool_calls": tool_calls,
        "stop_reason": stop_reason,
        "input_tokens": data.prompt_eval_count,
        "output_tokens": data.eval_count,
        "model": model,
        "provider_name": "ollama",
    })
}

#[async_trait]
impl Executor for OllamaChat {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let messages: Vec<Value> = match parse_json_param(params, "messages") {
            Some(Ok(Value::Array(items))) => items,
            Some(Ok(_)) | None => Vec::new(),
            Some(Err(e)) => {
                return Ok(ActionResult::new(1, String::new(), format!("Invalid messages JSON: {e}")));
            }
        };

        let model = optional_str(params, "model").unwrap_or(DEFAULT_MODEL).to_string();
        let system = optional_str(params, "system").unwrap_or("");
        let max_tokens = optional_u64(params, "max_tokens", DEFAULT_MAX_TOKENS);
        let temperature = optional_f64(params, "temperature", 0.0);

        let tools = match parse_json_param(params, "tools") {
            Some(Ok(v)) => {
                let converted = convert_tools(&v);
                if converted.is_empty() { None } else { Some(converted) }
            }
            // Invalid tools JSON is ignored, not fatal — mirrors the reference behaviour.
            Some(Err(_)) | None => None,
        };

        let mut ollama_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            ollama_messages.push(json!({"role": "system", "content": system}));
        }
        ollama_messages.extend(messages);

        let body = ChatRequest {
            model: model.clone(),
            messages: ollama_messages,
            stream: false,
            options: ChatOptions { num_predict: max_tokens, temperature },
            tools,
        };

        let response = match self.client.post(OLLAMA_URL).json(&body).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => {
                return Ok(ActionResult::new(
                    1,
                    String::new(),
                    "Ollama is not running. Start it with: ollama serve".to_string(),
                ));
            }
            Err(e) if e.is_timeout() => {
                return Ok(ActionResult::new(
                    1,
                    String::new(),
                    format!("Ollama timed out after {}s.", REQUEST_TIMEOUT.as_secs()),
                ));
            }
            Err(e) => {
                return Ok(ActionResult::new(1, String::new(), format!("Ollama error: {e}")));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let truncated: String = body_text.chars().take(ERROR_BODY_TRUNCATE).collect();
            return Ok(ActionResult::new(
                1,
                String::new(),
                format!("Ollama returned HTTP {status}: {truncated}"),
            ));
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return Ok(ActionResult::new(1, String::new(), format!("Ollama error: {e}")));
            }
        };

        let normalized = normalize_response(parsed, &model);
        Ok(ActionResult::new(0, normalized.to_string(), String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_internal_tool_shape_to_openai_function_shape() {
        let tools = json!([{"name": "read_file", "description": "reads a file", "input_schema": {"type": "object"}}]);
        let converted = convert_tools(&tools);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0]["type"], "function");
        assert_eq!(converted[0]["function"]["name"], "read_file");
    }

    #[test]
    fn passthrough_tools_already_in_openai_shape() {
        let tools = json!([{"type": "function", "function": {"name": "x"}}]);
        let converted = convert_tools(&tools);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0]["function"]["name"], "x");
    }

    #[test]
    fn normalizes_a_plain_text_reply_with_no_tool_calls() {
        let response = ChatResponse {
            message: ChatResponseMessage { content: "hi there".to_string(), tool_calls: vec![] },
            prompt_eval_count: 10,
            eval_count: 3,
        };
        let normalized = normalize_response(response, "qwen2.5-coder:7b");
        assert_eq!(normalized["text"], "hi there");
        assert_eq!(normalized["stop_reason"], "end_turn");
        assert_eq!(normalized["input_tokens"], 10);
        assert_eq!(normalized["output_tokens"], 3);
        assert_eq!(normalized["provider_name"], "ollama");
    }

    #[test]
    fn normalizes_tool_calls_with_synthesized_ids() {
        let response = ChatResponse {
            message: ChatResponseMessage {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    function: ToolCallFunction { name: "git_status".to_string(), arguments: json!({"working_dir": "."}) },
                }],
            },
            prompt_eval_count: 5,
            eval_count: 2,
        };
        let normalized = normalize_response(response, "qwen2.5-coder:7b");
        assert_eq!(normalized["stop_reason"], "tool_use");
        assert_eq!(normalized["tool_calls"][0]["id"], "ollama_0");
        assert_eq!(normalized["tool_calls"][0]["name"], "git_status");
    }
}
