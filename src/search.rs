use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;

const SEARCH_ENDPOINT: &str = "https://api.ydc-index.io/search";

/// Hits requested from (and kept out of) every search.
pub const TOP_K: usize = 3;

const ATTEMPTS: usize = 3;

/// A numbered web-search hit. `position` matches the `[citation:N]` markers
/// the model is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub position: usize,
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct SearchClient {
    client: reqwest::Client,
    api_key: String,
}

impl SearchClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key: config.you_api_key.clone(),
        })
    }

    /// Search the web for the extracted keyphrases.
    ///
    /// Transient failures and empty result pages are retried up to three
    /// attempts in total. Exhausting the attempts on HTTP failure is an
    /// error; exhausting them on empty pages degrades to no references so
    /// the caller can still respond.
    pub async fn search(&self, keyphrases: &str) -> Result<Vec<Reference>> {
        let query = clean_query(keyphrases);
        debug!(query = %query, "searching");

        let mut last_failure = None;
        for attempt in 1..=ATTEMPTS {
            match self.fetch(&query).await {
                Ok(references) if !references.is_empty() => {
                    debug!(attempt, hits = references.len(), "search succeeded");
                    return Ok(references);
                }
                Ok(_) => {
                    debug!(attempt, "search returned no hits");
                    last_failure = None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "search request failed");
                    last_failure = Some(e);
                }
            }
        }

        match last_failure {
            Some(e) => Err(e.context(format!("search failed after {} attempts", ATTEMPTS))),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch(&self, query: &str) -> Result<Vec<Reference>> {
        let top_k = TOP_K.to_string();
        let resp = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("query", query), ("num_web_results", top_k.as_str())])
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("search request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("search endpoint returned {}", status);
        }

        let payload: Value = resp
            .json()
            .await
            .context("failed to parse search response")?;
        Ok(collect_hits(&payload))
    }
}

/// Strip the punctuation the model tends to wrap keyphrases in: one trailing
/// period, then one matching pair of surrounding double quotes.
fn clean_query(keyphrases: &str) -> String {
    let query = keyphrases.trim();
    let query = query.strip_suffix('.').unwrap_or(query);
    let query = match query.strip_prefix('"').and_then(|q| q.strip_suffix('"')) {
        Some(inner) => inner,
        None => query,
    };
    query.to_string()
}

fn collect_hits(payload: &Value) -> Vec<Reference> {
    let Some(hits) = payload["hits"].as_array() else {
        return Vec::new();
    };

    hits.iter()
        .take(TOP_K)
        .enumerate()
        .map(|(index, hit)| {
            let description = hit["description"].as_str().unwrap_or("");
            let joined = hit["snippets"]
                .as_array()
                .map(|snippets| {
                    snippets
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            Reference {
                position: index + 1,
                title: hit["title"].as_str().unwrap_or("").to_string(),
                url: hit["url"].as_str().unwrap_or("").to_string(),
                snippet: format!("{}{}", description, truncate_chars(&joined, 1000)),
            }
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((pos, _)) => &text[..pos],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_query_strips_quotes_and_period() {
        assert_eq!(clean_query("\"red planet\"."), "red planet");
    }

    #[test]
    fn test_clean_query_keeps_unmatched_quote() {
        assert_eq!(clean_query("\"red planet"), "\"red planet");
        assert_eq!(clean_query("red planet"), "red planet");
    }

    #[test]
    fn test_clean_query_strips_single_trailing_period() {
        assert_eq!(clean_query("dwarf planets.."), "dwarf planets.");
    }

    #[test]
    fn test_collect_hits_positions_and_cap() {
        let payload = json!({"hits": [
            {"title": "a", "url": "http://a", "description": "da", "snippets": ["s1", "s2"]},
            {"title": "b", "url": "http://b", "description": "db", "snippets": []},
            {"title": "c", "url": "http://c", "description": "dc"},
            {"title": "d", "url": "http://d", "description": "dd"},
        ]});
        let references = collect_hits(&payload);
        assert_eq!(references.len(), TOP_K);
        for (index, reference) in references.iter().enumerate() {
            assert_eq!(reference.position, index + 1);
        }
        assert_eq!(references[0].snippet, "das1\ns2");
        assert_eq!(references[1].snippet, "db");
    }

    #[test]
    fn test_collect_hits_caps_snippet_length() {
        let long = "x".repeat(2000);
        let payload = json!({"hits": [
            {"title": "a", "url": "http://a", "description": "d: ", "snippets": [long]},
        ]});
        let references = collect_hits(&payload);
        assert_eq!(references[0].snippet.len(), "d: ".len() + 1000);
    }

    #[test]
    fn test_collect_hits_without_hits_is_empty() {
        assert!(collect_hits(&json!({})).is_empty());
        assert!(collect_hits(&json!({"hits": []})).is_empty());
    }
}
