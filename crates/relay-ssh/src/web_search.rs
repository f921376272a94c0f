//! In-process web search helper, used by the gateway's fallback path to
//! answer lookups that don't need the operator's machine at all — it
//! never goes over the SSH connection.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::time::Duration;

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
}

static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap()
});
static TAG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

pub async fn web_search(query: &str, limit: usize) -> Result<Vec<SearchResult>, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let body = client
        .get(SEARCH_URL)
        .query(&[("q", query)])
        .send()
        .await?
        .text()
        .await?;

    let results = RESULT_LINK
        .captures_iter(&body)
        .take(limit)
        .map(|cap| SearchResult {
            url: cap[1].to_string(),
            title: TAG_STRIP.replace_all(&cap[2], "").trim().to_string(),
        })
        .collect();
    Ok(results)
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
