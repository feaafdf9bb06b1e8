use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BelError;

pub const DEFAULT_CONTENT_SERVICE: &str = "https://reactome.org/ContentService/data";

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Node of the `eventsHierarchy` tree: pathways contain child events,
/// reactions are leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNode {
    pub st_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub children: Vec<EventNode>,
}

impl EventNode {
    pub fn is_reaction_like(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "Reaction" | "BlackBoxEvent" | "Polymerisation" | "Depolymerisation" | "FailedReaction"
        )
    }
}

pub trait ReactomeClient: Send + Sync {
    /// Raw "enhanced" JSON document for a dbId or stable id.
    fn fetch_document(&self, id: &str) -> Result<Value, BelError>;
    fn events_hierarchy(&self, taxon: &str) -> Result<Vec<EventNode>, BelError>;
}

#[derive(Clone)]
pub struct ReactomeHttpClient {
    client: Client,
    base_url: String,
}

impl ReactomeHttpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BelError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("reactome-bel/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BelError::ReactomeHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| BelError::ReactomeHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, BelError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(BelError::ReactomeHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, BelError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Reactome request failed".to_string());
        Err(BelError::ReactomeStatus { status, message })
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, BelError> {
        tracing::debug!(url, "fetching");
        let response = self.send_with_retries(|| self.client.get(url))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| BelError::ReactomeHttp(err.to_string()))
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/query/enhanced/{id}", self.base_url)
    }

    fn hierarchy_url(&self, taxon: &str) -> String {
        format!("{}/eventsHierarchy/{taxon}", self.base_url)
    }
}

impl ReactomeClient for ReactomeHttpClient {
    fn fetch_document(&self, id: &str) -> Result<Value, BelError> {
        self.get_json(&self.document_url(id))
    }

    fn events_hierarchy(&self, taxon: &str) -> Result<Vec<EventNode>, BelError> {
        self.get_json(&self.hierarchy_url(taxon))
    }
}

/// Reaction-like event ids in depth-first order, each listed once.
pub fn reaction_ids(hierarchy: &[EventNode]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    let mut stack: Vec<&EventNode> = hierarchy.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if node.is_reaction_like() && seen.insert(node.st_id.as_str()) {
            ids.push(node.st_id.clone());
        }
        stack.extend(node.children.iter().rev());
    }
    ids
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    tracing::warn!(attempt = attempt + 1, delay_ms = delay, "Reactome request failed; retrying");
    std::thread::sleep(Duration::from_millis(delay));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: &str, children: Vec<EventNode>) -> EventNode {
        EventNode {
            st_id: id.to_string(),
            name: String::new(),
            event_type: kind.to_string(),
            species: None,
            children,
        }
    }

    #[test]
    fn hierarchy_flattens_to_reactions() {
        let tree = vec![node(
            "R-HSA-1",
            "TopLevelPathway",
            vec![
                node("R-HSA-2", "Reaction", vec![]),
                node(
                    "R-HSA-3",
                    "Pathway",
                    vec![
                        node("R-HSA-4", "BlackBoxEvent", vec![]),
                        node("R-HSA-2", "Reaction", vec![]),
                    ],
                ),
            ],
        )];
        assert_eq!(reaction_ids(&tree), vec!["R-HSA-2", "R-HSA-4"]);
    }

    #[test]
    fn urls() {
        let client = ReactomeHttpClient::new("https://reactome.test/data/").unwrap();
        assert_eq!(
            client.document_url("445813"),
            "https://reactome.test/data/query/enhanced/445813"
        );
        assert_eq!(
            client.hierarchy_url("9606"),
            "https://reactome.test/data/eventsHierarchy/9606"
        );
    }

    #[test]
    fn hierarchy_json_uses_camel_case() {
        let raw = r#"[{"stId":"R-HSA-9","name":"x","type":"Reaction","species":"Homo sapiens"}]"#;
        let nodes: Vec<EventNode> = serde_json::from_str(raw).unwrap();
        assert!(nodes[0].is_reaction_like());
        assert!(nodes[0].children.is_empty());
    }
}
