pub mod clients;
pub mod error;
pub mod handlers;
mod http;
pub mod pipeline;

#[cfg(test)]
mod fakes;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use styleforge_contracts::api::GenerateRequest;
use styleforge_contracts::config::ForgeConfig;
use styleforge_contracts::events::{EventWriter, PipelineEvent};
use styleforge_contracts::images::{ImageRecord, StyleExemplar};
use styleforge_contracts::models::{ModelSelection, ModelSelector};
use styleforge_contracts::project::{Project, ProjectSummary};
use tracing::{info, warn};

use crate::clients::{
    BlobStore, ImageService, LanguageModel, MetadataStore, ReplicateService,
    ServingEndpointModel, SqlMetadataStore, TrainingService, VectorIndex, VectorSearchIndex,
    VolumeBlobStore,
};
use crate::http::build_http_client;
use crate::pipeline::{
    CaptionReport, TrainingPlan, TrainingPoll, TrainingSubmission, UploadFile,
};

pub use crate::error::ForgeError;
pub use crate::http::error_chain_text;

/// The external services one `StyleForge` talks to.
pub struct Collaborators {
    pub metadata: Box<dyn MetadataStore>,
    pub blobs: Box<dyn BlobStore>,
    pub enhancer: Box<dyn LanguageModel>,
    pub captioner: Box<dyn LanguageModel>,
    pub index: Box<dyn VectorIndex>,
    pub images: Box<dyn ImageService>,
    pub trainer: Box<dyn TrainingService>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub original_prompt: String,
    pub enhanced_prompt: String,
    pub exemplars: Vec<StyleExemplar>,
    pub image_url: Option<String>,
    pub model: ModelSelection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub records: Vec<ImageRecord>,
    /// Present when captioning ran after the upload and finished.
    pub captioning: Option<CaptionReport>,
}

/// Entry point for every pipeline operation. Holds no mutable state; one
/// value can serve a whole CLI invocation or a single HTTP request.
pub struct StyleForge {
    collaborators: Collaborators,
    model_selector: ModelSelector,
    training_plan: TrainingPlan,
    events: Option<EventWriter>,
}

impl StyleForge {
    pub fn new(
        collaborators: Collaborators,
        model_selector: ModelSelector,
        training_plan: TrainingPlan,
    ) -> Self {
        Self {
            collaborators,
            model_selector,
            training_plan,
            events: None,
        }
    }

    /// Wires the HTTP-backed collaborators around one shared client.
    pub fn from_config(config: &ForgeConfig) -> Result<Self> {
        let http = build_http_client(config.http_timeout)?;
        let collaborators = Collaborators {
            metadata: Box::new(SqlMetadataStore::new(config, http.clone())),
            blobs: Box::new(VolumeBlobStore::new(config, http.clone())),
            enhancer: Box::new(ServingEndpointModel::new(
                config,
                &config.enhance_model,
                http.clone(),
            )),
            captioner: Box::new(ServingEndpointModel::new(
                config,
                &config.caption_model,
                http.clone(),
            )),
            index: Box::new(VectorSearchIndex::new(config, http.clone())),
            images: Box::new(ReplicateService::new(config, http.clone())),
            trainer: Box::new(ReplicateService::new(config, http)),
        };
        Ok(Self::new(
            collaborators,
            ModelSelector::new(Some(config.baseline_version.clone())),
            TrainingPlan::new(config.model_owner.clone()),
        ))
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn model_selector(&self) -> &ModelSelector {
        &self.model_selector
    }

    /// Journal failures are logged and never fail the operation.
    fn journal(&self, event: PipelineEvent, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit(event, payload) {
            warn!(
                event = event.as_str(),
                path = %events.path().display(),
                error = %error_chain_text(&err, 300),
                "event journal write failed"
            );
        }
    }

    /// Enhance, retrieve, resolve, synthesize. Nothing is persisted.
    pub fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ForgeError::InvalidRequest("prompt is required".to_string()).into());
        }
        let project_id = request
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let composed = pipeline::compose(
            self.collaborators.enhancer.as_ref(),
            self.collaborators.index.as_ref(),
            prompt,
            project_id,
        )?;
        let model = pipeline::resolve_model_version(
            self.collaborators.metadata.as_ref(),
            &self.model_selector,
            project_id,
        );
        let image_url = pipeline::synthesize(
            self.collaborators.images.as_ref(),
            &composed.generation_prompt,
            &model.version,
        )?;

        info!(
            project_id = project_id.unwrap_or(""),
            model_version = %model.version,
            references = composed.exemplars.len(),
            has_image = image_url.is_some(),
            "generation finished"
        );
        self.journal(
            PipelineEvent::GenerationFinished,
            json!({
                "project_id": project_id,
                "model_version": model.version,
                "model_source": model.source,
                "model_fallback": model.fallback_reason,
                "style_references": composed.exemplars.len(),
                "image_url": image_url,
            }),
        );
        Ok(Generation {
            original_prompt: request.prompt.clone(),
            enhanced_prompt: composed.enhanced_prompt,
            exemplars: composed.exemplars,
            image_url,
            model,
        })
    }

    pub fn caption(&self, project_id: &str) -> Result<CaptionReport> {
        let report = pipeline::caption_pending_images(
            self.collaborators.metadata.as_ref(),
            self.collaborators.blobs.as_ref(),
            self.collaborators.captioner.as_ref(),
            self.collaborators.index.as_ref(),
            project_id,
        )?;
        self.journal(
            PipelineEvent::CaptionBatchFinished,
            json!({
                "project_id": project_id,
                "captioned": report.captioned,
                "failed": report.failed,
                "skipped": report.skipped,
                "errors": report.errors,
                "index_synced": report.index_synced,
            }),
        );
        Ok(report)
    }

    pub fn submit_training(&self, project_id: &str) -> Result<TrainingSubmission> {
        let submission = pipeline::submit_training(
            self.collaborators.metadata.as_ref(),
            self.collaborators.blobs.as_ref(),
            self.collaborators.trainer.as_ref(),
            &self.training_plan,
            project_id,
        )?;
        self.journal(
            PipelineEvent::TrainingSubmitted,
            json!({
                "project_id": project_id,
                "job_id": submission.job_id,
                "destination": submission.destination,
                "images": submission.images,
                "skipped": submission.skipped,
                "dataset_sha256": submission.dataset_sha256,
            }),
        );
        Ok(submission)
    }

    pub fn poll_training(&self, project_id: &str) -> Result<TrainingPoll> {
        let poll = pipeline::poll_training(
            self.collaborators.metadata.as_ref(),
            self.collaborators.trainer.as_ref(),
            project_id,
        )?;
        self.journal(
            PipelineEvent::TrainingPolled,
            json!({
                "project_id": project_id,
                "status": poll.status.as_str(),
                "job_status": poll.job_status,
                "version": poll.version,
                "error": poll.error,
            }),
        );
        Ok(poll)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        pipeline::list_projects(self.collaborators.metadata.as_ref())
    }

    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<Project> {
        let project =
            pipeline::create_project(self.collaborators.metadata.as_ref(), name, description)?;
        self.journal(
            PipelineEvent::ProjectCreated,
            json!({
                "project_id": project.project_id,
                "name": project.name,
            }),
        );
        Ok(project)
    }

    pub fn project_detail(&self, project_id: &str) -> Result<(Project, Vec<ImageRecord>)> {
        pipeline::project_detail(self.collaborators.metadata.as_ref(), project_id)
    }

    /// Stores the files as pending images, then captions the project's
    /// pending images unless `caption` is false. A captioning failure after
    /// a successful upload is logged, not returned.
    pub fn upload(
        &self,
        project_id: &str,
        files: &[UploadFile],
        caption: bool,
    ) -> Result<UploadOutcome> {
        let records = pipeline::upload_images(
            self.collaborators.metadata.as_ref(),
            self.collaborators.blobs.as_ref(),
            project_id,
            files,
        )
        .with_context(|| format!("upload to {project_id} failed"))?;
        self.journal(
            PipelineEvent::ImagesUploaded,
            json!({
                "project_id": project_id,
                "filenames": records.iter().map(|record| record.filename.as_str()).collect::<Vec<_>>(),
            }),
        );

        let captioning = if caption {
            match self.caption(project_id) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(
                        project_id,
                        error = %error_chain_text(&err, 300),
                        "captioning after upload failed"
                    );
                    None
                }
            }
        } else {
            None
        };
        Ok(UploadOutcome {
            records,
            captioning,
        })
    }
}
