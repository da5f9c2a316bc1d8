//! Seams to the external collaborators.
//!
//! Each trait is the fixed contract the pipeline relies on; the HTTP
//! implementations live in the submodules and the tests swap in in-memory
//! fakes.

mod files;
mod replicate;
mod serving;
mod sql;
mod vector_search;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use styleforge_contracts::images::{Caption, ImageRecord};
use styleforge_contracts::models::TrainerSpec;
use styleforge_contracts::project::{Project, ProjectSummary, TrainingClaim, TrainingStatus};

pub use files::VolumeBlobStore;
pub use replicate::ReplicateService;
pub use serving::ServingEndpointModel;
pub use sql::{SqlMetadataStore, SqlParam, Statement};
pub use vector_search::VectorSearchIndex;

/// Relational store of projects and image records.
pub trait MetadataStore: Send + Sync {
    fn project(&self, project_id: &str) -> Result<Option<Project>>;
    fn list_projects(&self) -> Result<Vec<ProjectSummary>>;
    fn insert_project(&self, project: &Project) -> Result<()>;
    /// All images of a project, ascending by id.
    fn images(&self, project_id: &str) -> Result<Vec<ImageRecord>>;
    fn pending_images(&self, project_id: &str) -> Result<Vec<ImageRecord>>;
    /// Images whose caption is not pending, ascending by id.
    fn captioned_images(&self, project_id: &str) -> Result<Vec<ImageRecord>>;
    fn insert_image(&self, record: &ImageRecord) -> Result<()>;
    /// Replaces a pending caption of one image of `project_id`. Returns false
    /// when the row was no longer pending.
    fn set_caption(&self, project_id: &str, image_id: i64, caption: &Caption) -> Result<bool>;
    /// Moves the project to `training` only if its status is still `expected`.
    fn begin_training(
        &self,
        project_id: &str,
        expected: TrainingStatus,
        claim: &TrainingClaim,
    ) -> Result<bool>;
    /// Terminal writes only apply while `job_handle` is the job on record.
    fn complete_training(&self, project_id: &str, job_handle: &str, version: &str)
        -> Result<bool>;
    fn fail_training(&self, project_id: &str, job_handle: &str) -> Result<bool>;
}

/// Path-addressed raw bytes.
pub trait BlobStore: Send + Sync {
    fn image_path(&self, project_id: &str, filename: &str) -> String;
    /// `Ok(None)` when the store answered but had nothing usable.
    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>>;
    fn store(&self, path: &str, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Hosted chat model. `Ok(None)` means the call succeeded without content.
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &ChatRequest) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub query_text: String,
    pub columns: Vec<String>,
    pub num_results: usize,
    pub filters: Option<Map<String, Value>>,
}

pub trait VectorIndex: Send + Sync {
    /// Rows of column values in the order of `query.columns`, best match first.
    fn query(&self, query: &IndexQuery) -> Result<Vec<Vec<Value>>>;
    fn sync(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRequest {
    pub version: String,
    pub prompt: String,
    pub num_outputs: u32,
    pub aspect_ratio: String,
    pub output_format: String,
    pub output_quality: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub id: Option<String>,
    pub status: JobStatus,
    pub output_urls: Vec<String>,
}

pub trait ImageService: Send + Sync {
    fn predict(&self, request: &PredictionRequest) -> Result<Prediction>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRequest {
    pub trainer: TrainerSpec,
    pub destination: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "starting" => JobStatus::Starting,
            "processing" => JobStatus::Processing,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "canceled" | "cancelled" => JobStatus::Canceled,
            other => JobStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingJob {
    pub id: String,
    pub status: JobStatus,
    pub output: Option<Value>,
    pub logs: Option<String>,
    pub error: Option<String>,
}

impl TrainingJob {
    pub fn model_version(&self) -> Option<String> {
        crate::http::non_empty_str(self.output.as_ref().and_then(|output| output.get("version")))
    }

    pub fn log_tail(&self, lines: usize) -> String {
        let Some(logs) = self.logs.as_deref() else {
            return String::new();
        };
        let all: Vec<&str> = logs.split('\n').collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Long-running fine-tune jobs plus the file upload they read their data from.
pub trait TrainingService: Send + Sync {
    /// Uploads bytes and returns a URL the trainer can read them from.
    fn upload_file(&self, filename: &str, content_type: &str, bytes: Vec<u8>) -> Result<String>;
    fn create_training(&self, request: &TrainingRequest) -> Result<TrainingJob>;
    fn training(&self, job_id: &str) -> Result<TrainingJob>;
}
