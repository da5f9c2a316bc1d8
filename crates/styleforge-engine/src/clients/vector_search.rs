use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use styleforge_contracts::config::ForgeConfig;

use super::{IndexQuery, VectorIndex};
use crate::http::{ensure_success, response_json_or_error};

/// Similarity index over captioned reference images.
pub struct VectorSearchIndex {
    index_base: String,
    token: String,
    http: HttpClient,
}

impl VectorSearchIndex {
    pub fn new(config: &ForgeConfig, http: HttpClient) -> Self {
        Self {
            index_base: format!(
                "{}/api/2.0/vector-search/indexes/{}",
                config.endpoints.index, config.vector_index
            ),
            token: config.credentials.workspace_token.clone(),
            http,
        }
    }
}

fn query_body(query: &IndexQuery) -> Result<Value> {
    let mut body = Map::new();
    body.insert(
        "query_text".to_string(),
        Value::String(query.query_text.clone()),
    );
    body.insert(
        "columns".to_string(),
        Value::Array(query.columns.iter().cloned().map(Value::String).collect()),
    );
    body.insert("num_results".to_string(), Value::from(query.num_results));
    if let Some(filters) = query.filters.as_ref().filter(|filters| !filters.is_empty()) {
        body.insert(
            "filters_json".to_string(),
            Value::String(serde_json::to_string(filters)?),
        );
    }
    Ok(Value::Object(body))
}

impl VectorIndex for VectorSearchIndex {
    fn query(&self, query: &IndexQuery) -> Result<Vec<Vec<Value>>> {
        let endpoint = format!("{}/query", self.index_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&query_body(query)?)
            .send()
            .with_context(|| format!("vector search request failed ({endpoint})"))?;
        let payload = response_json_or_error("Vector search", response)?;
        Ok(payload
            .pointer("/result/data_array")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_array)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    fn sync(&self) -> Result<()> {
        let endpoint = format!("{}/sync", self.index_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .with_context(|| format!("vector index sync failed ({endpoint})"))?;
        ensure_success("Vector index sync", response)
    }
}
