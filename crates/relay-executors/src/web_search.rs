//! `web_search` executor. Unlike every other action in the catalogue this
//! one never touches the operator's machine — it answers straight from the
//! worker process via an outbound HTTP request, which is also why the SSH
//! fallback path (`relay-ssh`) services it in-process rather than relaying
//! it over the tunnel.

use crate::error::ExecutorError;
use crate::params::{optional_u64, require_str};
use crate::Executor;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use relay_protocol::{ActionParams, ActionResult};
use std::time::Duration;

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap()
});
static TAG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

pub struct WebSearch;

#[async_trait]
impl Executor for WebSearch {
    async fn execute(&self, params: &ActionParams) -> Result<ActionResult, ExecutorError> {
        let query = require_str(params, "query")?;
        let limit = optional_u64(params, "limit", 5) as usize;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExecutorError::Other(e.to_string()))?;

        let body = match client.get(SEARCH_URL).query(&[("q", query)]).send().await {
            Ok(resp) => resp.text().await.unwrap_or_default(),
            Err(e) => {
                return Ok(ActionResult::new(
                    -1,
                    String::new(),
                    format!("web search request failed: {e}"),
                ));
            }
        };

        let results: Vec<serde_json::Value> = RESULT_LINK
            .captures_iter(&body)
            .take(limit)
            .map(|cap| {
                serde_json::json!({
                    "title": TAG_STRIP.replace_all(&cap[2], "").trim().to_string(),
                    "url": cap[1].to_string(),
                })
            })
            .collect();

        Ok(ActionResult::new(
            0,
            serde_json::to_string(&results).unwrap_or_else(|_| "[]".to_string()),
            String::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_url_from_result_markup() {
        let html = r#"<a class="result__a" href="https://example.com">Example <b>Site</b></a>"#;
        let cap = RESULT_LINK.captures(html).unwrap();
        assert_eq!(&cap[1], "https://example.com");
        assert_eq!(TAG_STRIP.replace_all(&cap[2], "").trim(), "Example Site");
    }
}
