//! The catch-all boundary of every public operation: each handler runs one
//! `StyleForge` call and turns its outcome into a status code plus the JSON
//! body the web client expects. Shared by the CLI and the HTTP server.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use styleforge_contracts::api::{
    CaptionResponse, CreateProjectRequest, CreateProjectResponse, ErrorResponse,
    GenerateRequest, GenerateResponse, ProjectDetailResponse, ProjectInfo, ProjectListResponse,
    TrainPollResponse, TrainSubmitResponse, UploadResponse,
};
use styleforge_contracts::project::TrainingStatus;
use tracing::error;

use crate::error::ForgeError;
use crate::http::error_chain_text;
use crate::pipeline::UploadFile;
use crate::StyleForge;

pub const GENERATE_FAILED: &str = "Generation failed";
pub const CAPTION_FAILED: &str = "Captioning failed";
pub const TRAIN_FAILED: &str = "Failed to start training";
pub const TRAIN_STATUS_FAILED: &str = "Failed to check training status";
pub const LIST_PROJECTS_FAILED: &str = "Failed to load projects";
pub const CREATE_PROJECT_FAILED: &str = "Failed to create project";
pub const PROJECT_DETAIL_FAILED: &str = "Failed to load project";
pub const UPLOAD_FAILED: &str = "Upload failed";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status: 200, body },
            Err(err) => Self::failure("response encoding", "Internal error", err.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Logs `err` and answers with its typed rejection when it has one,
    /// otherwise with `generic` and a 500.
    pub fn failure(operation: &str, generic: &str, err: anyhow::Error) -> Self {
        error!(operation, error = %error_chain_text(&err, 500), "operation failed");
        let (status, message) = match err.downcast_ref::<ForgeError>() {
            Some(rejection) => (rejection.http_status(), rejection.to_string()),
            None => (500, generic.to_string()),
        };
        let body = ErrorResponse::new(message);
        Self {
            status,
            body: json!({"success": body.success, "error": body.error}),
        }
    }
}

fn respond<T: Serialize>(operation: &str, generic: &str, result: Result<T>) -> ApiResponse {
    match result {
        Ok(body) => ApiResponse::ok(&body),
        Err(err) => ApiResponse::failure(operation, generic, err),
    }
}

pub fn generate(forge: &StyleForge, request: &GenerateRequest) -> ApiResponse {
    let result = forge.generate(request).map(|generation| GenerateResponse {
        success: true,
        original_prompt: generation.original_prompt,
        enhanced_prompt: generation.enhanced_prompt,
        style_references: generation.exemplars,
        image_url: generation.image_url,
    });
    respond("generate", GENERATE_FAILED, result)
}

pub fn caption(forge: &StyleForge, project_id: &str) -> ApiResponse {
    let result = forge.caption(project_id).map(|report| CaptionResponse {
        success: true,
        captioned: report.captioned,
    });
    respond("caption", CAPTION_FAILED, result)
}

pub fn submit_training(forge: &StyleForge, project_id: &str) -> ApiResponse {
    let result = forge
        .submit_training(project_id)
        .map(|submission| TrainSubmitResponse {
            success: true,
            training_id: submission.job_id,
            status: TrainingStatus::Training,
        });
    respond("train", TRAIN_FAILED, result)
}

pub fn training_status(forge: &StyleForge, project_id: &str) -> ApiResponse {
    let result = forge.poll_training(project_id).map(|poll| TrainPollResponse {
        success: true,
        status: poll.status,
        version: poll.version,
        logs: poll.logs,
        error: poll.error,
    });
    respond("training_status", TRAIN_STATUS_FAILED, result)
}

pub fn list_projects(forge: &StyleForge) -> ApiResponse {
    let result = forge.list_projects().map(|projects| ProjectListResponse {
        success: true,
        projects,
    });
    respond("list_projects", LIST_PROJECTS_FAILED, result)
}

pub fn create_project(forge: &StyleForge, request: &CreateProjectRequest) -> ApiResponse {
    let result = forge
        .create_project(&request.name, request.description.as_deref())
        .map(|project| CreateProjectResponse {
            success: true,
            project_id: project.project_id,
        });
    respond("create_project", CREATE_PROJECT_FAILED, result)
}

pub fn project_detail(forge: &StyleForge, project_id: &str) -> ApiResponse {
    let result = forge
        .project_detail(project_id)
        .map(|(project, images)| ProjectDetailResponse {
            success: true,
            project: ProjectInfo {
                project_id: project.project_id,
                name: project.name,
                description: project.description,
                training_status: project.training_status,
            },
            images,
        });
    respond("project_detail", PROJECT_DETAIL_FAILED, result)
}

pub fn upload(
    forge: &StyleForge,
    project_id: &str,
    files: &[UploadFile],
    caption: bool,
) -> ApiResponse {
    let result = forge
        .upload(project_id, files, caption)
        .map(|outcome| UploadResponse {
            success: true,
            uploaded: outcome.records.len() as u64,
        });
    respond("upload", UPLOAD_FAILED, result)
}
