use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use styleforge_contracts::config::ForgeConfig;
use tracing::debug;

use super::{
    ImageService, JobStatus, Prediction, PredictionRequest, TrainingJob, TrainingRequest,
    TrainingService,
};
use crate::http::{non_empty_str, response_json_or_error};

/// Image synthesis and LoRA training on Replicate.
pub struct ReplicateService {
    api_base: String,
    token: String,
    http: HttpClient,
}

impl ReplicateService {
    pub fn new(config: &ForgeConfig, http: HttpClient) -> Self {
        Self {
            api_base: config.endpoints.image_service.clone(),
            token: config.credentials.image_service_token.clone(),
            http,
        }
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.api_base)
    }

    fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(url) => {
                let trimmed = url.trim();
                if !trimmed.is_empty()
                    && trimmed.starts_with("http")
                    && !out.iter().any(|existing| existing == trimmed)
                {
                    out.push(trimmed.to_string());
                }
            }
            Value::Array(rows) => {
                for row in rows {
                    Self::extract_output_urls(row, out);
                }
            }
            Value::Object(obj) => {
                if let Some(url) = obj.get("url") {
                    Self::extract_output_urls(url, out);
                }
                if let Some(urls) = obj.get("urls") {
                    Self::extract_output_urls(urls, out);
                }
            }
            _ => {}
        }
    }
}

fn prediction_payload(request: &PredictionRequest) -> Value {
    json!({
        "version": request.version,
        "input": {
            "prompt": request.prompt,
            "num_outputs": request.num_outputs,
            "aspect_ratio": request.aspect_ratio,
            "output_format": request.output_format,
            "output_quality": request.output_quality,
        }
    })
}

fn prediction_from_payload(payload: &Value) -> Prediction {
    let mut urls = Vec::new();
    if let Some(output) = payload.get("output") {
        ReplicateService::extract_output_urls(output, &mut urls);
    }
    Prediction {
        id: non_empty_str(payload.get("id")),
        status: JobStatus::parse(payload.get("status").and_then(Value::as_str).unwrap_or("")),
        output_urls: urls,
    }
}

fn training_from_payload(payload: &Value) -> Result<TrainingJob> {
    let id = non_empty_str(payload.get("id")).context("Replicate training missing id")?;
    Ok(TrainingJob {
        id,
        status: JobStatus::parse(payload.get("status").and_then(Value::as_str).unwrap_or("")),
        output: payload.get("output").filter(|value| !value.is_null()).cloned(),
        logs: payload
            .get("logs")
            .and_then(Value::as_str)
            .map(str::to_string),
        error: match payload.get("error") {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Some(Value::Null) | None => None,
            Some(Value::String(_)) => None,
            Some(other) => Some(other.to_string()),
        },
    })
}

impl ImageService for ReplicateService {
    fn predict(&self, request: &PredictionRequest) -> Result<Prediction> {
        let endpoint = self.predictions_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .header("Prefer", "wait")
            .json(&prediction_payload(request))
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let payload = response_json_or_error("Replicate", response)?;
        let prediction = prediction_from_payload(&payload);
        debug!(
            prediction_id = prediction.id.as_deref().unwrap_or(""),
            status = ?prediction.status,
            outputs = prediction.output_urls.len(),
            "Replicate prediction returned"
        );
        Ok(prediction)
    }
}

impl TrainingService for ReplicateService {
    fn upload_file(&self, filename: &str, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        let endpoint = format!("{}/files", self.api_base);
        let part = MultipartPart::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)
            .with_context(|| format!("invalid upload content type ({content_type})"))?;
        let form = MultipartForm::new().part("content", part);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .with_context(|| format!("Replicate file upload failed ({endpoint})"))?;
        let payload = response_json_or_error("Replicate files", response)?;
        non_empty_str(payload.pointer("/urls/get"))
            .context("Replicate file upload response missing urls.get")
    }

    fn create_training(&self, request: &TrainingRequest) -> Result<TrainingJob> {
        let endpoint = format!(
            "{}/models/{}/{}/versions/{}/trainings",
            self.api_base, request.trainer.owner, request.trainer.name, request.trainer.version
        );
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&json!({
                "destination": request.destination,
                "input": request.input,
            }))
            .send()
            .with_context(|| format!("Replicate training request failed ({endpoint})"))?;
        let payload = response_json_or_error("Replicate training", response)?;
        training_from_payload(&payload)
    }

    fn training(&self, job_id: &str) -> Result<TrainingJob> {
        let endpoint = format!("{}/trainings/{}", self.api_base, job_id);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("Replicate training poll failed ({endpoint})"))?;
        let payload = response_json_or_error("Replicate training poll", response)?;
        training_from_payload(&payload)
    }
}
