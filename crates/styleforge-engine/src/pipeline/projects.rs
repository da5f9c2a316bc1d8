use anyhow::{Context, Result};
use styleforge_contracts::images::{Caption, ImageRecord};
use styleforge_contracts::project::{Project, ProjectSummary};
use tracing::info;

use super::dataset::MANIFEST_NAME;
use crate::clients::{BlobStore, MetadataStore};
use crate::error::ForgeError;
use crate::http::timestamp_millis;

/// One reference image as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub fn create_project(
    store: &dyn MetadataStore,
    name: &str,
    description: Option<&str>,
) -> Result<Project> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ForgeError::InvalidRequest("project name is required".to_string()).into());
    }
    let project = Project::new(
        format!("proj-{}", timestamp_millis()),
        name,
        description.map(str::trim).unwrap_or_default(),
    );
    store
        .insert_project(&project)
        .with_context(|| format!("failed to insert project {}", project.project_id))?;
    info!(project_id = %project.project_id, name, "project created");
    Ok(project)
}

pub fn list_projects(store: &dyn MetadataStore) -> Result<Vec<ProjectSummary>> {
    store.list_projects().context("failed to list projects")
}

pub fn project_detail(
    store: &dyn MetadataStore,
    project_id: &str,
) -> Result<(Project, Vec<ImageRecord>)> {
    let project = store
        .project(project_id)
        .with_context(|| format!("failed to load project {project_id}"))?
        .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()))?;
    let images = store
        .images(project_id)
        .with_context(|| format!("failed to list images for {project_id}"))?;
    Ok((project, images))
}

/// A bare file name that can live in a project folder and a training archive.
pub fn validate_filename(raw: &str) -> Result<String, ForgeError> {
    let name = raw.trim();
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control)
        || name == MANIFEST_NAME;
    if invalid {
        return Err(ForgeError::InvalidRequest(format!(
            "invalid image filename '{raw}'"
        )));
    }
    Ok(name.to_string())
}

/// Stores each file in the blob store and records it as awaiting a caption.
/// All names are validated before anything is written.
pub fn upload_images(
    store: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    project_id: &str,
    files: &[UploadFile],
) -> Result<Vec<ImageRecord>> {
    if files.is_empty() {
        return Err(ForgeError::InvalidRequest("no files to upload".to_string()).into());
    }
    if store
        .project(project_id)
        .with_context(|| format!("failed to load project {project_id}"))?
        .is_none()
    {
        return Err(ForgeError::ProjectNotFound(project_id.to_string()).into());
    }
    let filenames = files
        .iter()
        .map(|file| validate_filename(&file.filename))
        .collect::<Result<Vec<_>, _>>()?;

    let base_id = i64::try_from(timestamp_millis()).context("clock out of range")?;
    let mut records = Vec::with_capacity(files.len());
    for (idx, (file, filename)) in files.iter().zip(filenames).enumerate() {
        let path = blobs.image_path(project_id, &filename);
        blobs
            .store(&path, &file.bytes)
            .with_context(|| format!("failed to store {filename}"))?;
        let record = ImageRecord {
            id: base_id + idx as i64,
            project_id: project_id.to_string(),
            filename,
            path,
            caption: Caption::Pending,
        };
        store
            .insert_image(&record)
            .with_context(|| format!("failed to record {}", record.filename))?;
        records.push(record);
    }
    info!(project_id, uploaded = records.len(), "images uploaded");
    Ok(records)
}
