use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use styleforge_contracts::config::ForgeConfig;

use super::{ChatRequest, LanguageModel};
use crate::http::response_json_or_error;

/// Chat model behind a workspace serving endpoint.
pub struct ServingEndpointModel {
    name: String,
    endpoint: String,
    token: String,
    http: HttpClient,
}

impl ServingEndpointModel {
    pub fn new(config: &ForgeConfig, endpoint_name: &str, http: HttpClient) -> Self {
        Self {
            name: endpoint_name.to_string(),
            endpoint: format!(
                "{}/serving-endpoints/{}/invocations",
                config.endpoints.model, endpoint_name
            ),
            token: config.credentials.workspace_token.clone(),
            http,
        }
    }
}

impl LanguageModel for ServingEndpointModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .with_context(|| format!("{} request failed ({})", self.name, self.endpoint))?;
        let payload = response_json_or_error(&self.name, response)?;
        Ok(extract_message_text(&payload))
    }
}

/// `choices[0].message.content`, either a string or a list of text parts.
fn extract_message_text(payload: &Value) -> Option<String> {
    let content = payload.pointer("/choices/0/message/content")?;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::extract_message_text;

    #[test]
    fn reads_first_choice_content() {
        let payload = json!({"choices": [{"message": {"content": "  A misty harbor.  "}}]});
        assert_eq!(
            extract_message_text(&payload).as_deref(),
            Some("A misty harbor.")
        );
    }

    #[test]
    fn joins_text_parts() {
        let payload = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "Ink wash, "},
            {"type": "text", "text": "loose brushwork."},
        ]}}]});
        assert_eq!(
            extract_message_text(&payload).as_deref(),
            Some("Ink wash, loose brushwork.")
        );
    }

    #[test]
    fn empty_or_missing_content_is_none() {
        assert_eq!(extract_message_text(&json!({"choices": []})), None);
        assert_eq!(
            extract_message_text(&json!({"choices": [{"message": {"content": " "}}]})),
            None
        );
    }
}
