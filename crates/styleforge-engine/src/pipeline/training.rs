use anyhow::{Context, Result};
use styleforge_contracts::models::{destination_for, TrainerSpec, TrainingHyperparameters};
use styleforge_contracts::project::{Project, TrainingClaim, TrainingStatus};
use tracing::{error, info, warn};

use super::dataset::{package_dataset, ARCHIVE_CONTENT_TYPE};
use crate::clients::{
    BlobStore, JobStatus, MetadataStore, TrainingJob, TrainingRequest, TrainingService,
};
use crate::error::ForgeError;

const LOG_TAIL_LINES: usize = 5;
const DEFAULT_FAILURE_MESSAGE: &str = "Training failed";
const MISSING_VERSION_MESSAGE: &str = "Training succeeded but the service reported no model version.";

/// Where trainings go and with which settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub trainer: TrainerSpec,
    pub hyperparameters: TrainingHyperparameters,
    /// Namespace owner of the destination model; trainings are refused without it.
    pub model_owner: Option<String>,
}

impl TrainingPlan {
    pub fn new(model_owner: Option<String>) -> Self {
        Self {
            trainer: TrainerSpec::default(),
            hyperparameters: TrainingHyperparameters::default(),
            model_owner: model_owner
                .map(|owner| owner.trim().to_string())
                .filter(|owner| !owner.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSubmission {
    pub project_id: String,
    pub job_id: String,
    pub destination: String,
    pub images: usize,
    pub skipped: Vec<String>,
    pub dataset_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingPoll {
    pub status: TrainingStatus,
    pub version: Option<String>,
    pub logs: Option<String>,
    pub error: Option<String>,
    /// Job status as reported by the service; `None` when it was not asked.
    pub job_status: Option<String>,
}

impl TrainingPoll {
    fn persisted(project: &Project) -> Self {
        Self {
            status: project.training_status,
            version: project.custom_model_version().map(str::to_string),
            logs: None,
            error: None,
            job_status: None,
        }
    }
}

fn load_project(store: &dyn MetadataStore, project_id: &str) -> Result<Project> {
    store
        .project(project_id)
        .with_context(|| format!("failed to load project {project_id}"))?
        .ok_or_else(|| ForgeError::ProjectNotFound(project_id.to_string()).into())
}

/// Packages the project's captioned images, uploads them and starts a
/// training. The project moves to `training` only after the service has
/// accepted the job, and only if no other submission got there first.
pub fn submit_training(
    store: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    service: &dyn TrainingService,
    plan: &TrainingPlan,
    project_id: &str,
) -> Result<TrainingSubmission> {
    let project = load_project(store, project_id)?;
    if !project
        .training_status
        .can_transition_to(TrainingStatus::Training)
    {
        return Err(ForgeError::TrainingInProgress(project_id.to_string()).into());
    }

    let records = store
        .captioned_images(project_id)
        .with_context(|| format!("failed to list captioned images for {project_id}"))?;
    if records.is_empty() {
        return Err(ForgeError::NoCaptionedImages(project_id.to_string()).into());
    }
    let owner = plan
        .model_owner
        .as_deref()
        .ok_or(ForgeError::MissingConfig("REPLICATE_MODEL_OWNER"))?;

    let package = package_dataset(blobs, &records)?;
    if package.is_empty() {
        return Err(ForgeError::EmptyDataset(project_id.to_string()).into());
    }
    let images = package.entries.len();
    let dataset_sha256 = package.sha256.clone();
    let skipped = package.skipped.clone();

    let archive_url = service
        .upload_file(
            &format!("{project_id}-training.zip"),
            ARCHIVE_CONTENT_TYPE,
            package.archive,
        )
        .context("failed to upload training dataset")?;

    let destination = destination_for(owner);
    let job = service
        .create_training(&TrainingRequest {
            trainer: plan.trainer.clone(),
            destination: destination.clone(),
            input: plan.hyperparameters.input_payload(&archive_url),
        })
        .context("failed to create training")?;

    let claim = TrainingClaim {
        job_handle: job.id.clone(),
        destination: destination.clone(),
    };
    let claimed = store
        .begin_training(project_id, project.training_status, &claim)
        .with_context(|| format!("failed to record training {} for {project_id}", job.id))?;
    if !claimed {
        error!(
            project_id,
            job_id = %job.id,
            "training accepted by the service but another submission was recorded first"
        );
        return Err(ForgeError::ConcurrentSubmission(project_id.to_string()).into());
    }

    info!(
        project_id,
        job_id = %job.id,
        %destination,
        images,
        skipped = skipped.len(),
        "training submitted"
    );
    Ok(TrainingSubmission {
        project_id: project_id.to_string(),
        job_id: job.id,
        destination,
        images,
        skipped,
        dataset_sha256,
    })
}

/// Advances the persisted training state from the service's view of the job.
/// Projects without a job, or already in a terminal state, are answered from
/// the store alone.
pub fn poll_training(
    store: &dyn MetadataStore,
    service: &dyn TrainingService,
    project_id: &str,
) -> Result<TrainingPoll> {
    let project = load_project(store, project_id)?;
    let handle = project
        .trained_job_handle
        .as_deref()
        .map(str::trim)
        .filter(|handle| !handle.is_empty());
    let Some(handle) = handle else {
        return Ok(TrainingPoll::persisted(&project));
    };
    if project.training_status.is_terminal() {
        return Ok(TrainingPoll::persisted(&project));
    }

    let job = service
        .training(handle)
        .with_context(|| format!("failed to fetch training {handle}"))?;
    let job_status = Some(job_status_label(&job));

    let mut poll = match &job.status {
        JobStatus::Succeeded => match job.model_version() {
            Some(version) => {
                if !store.complete_training(project_id, handle, &version)? {
                    return stale_poll(store, project_id, handle);
                }
                info!(project_id, job_id = handle, %version, "training completed");
                TrainingPoll {
                    status: TrainingStatus::Completed,
                    version: Some(version),
                    logs: None,
                    error: None,
                    job_status: None,
                }
            }
            None => {
                if !store.fail_training(project_id, handle)? {
                    return stale_poll(store, project_id, handle);
                }
                warn!(project_id, job_id = handle, "training succeeded without a model version");
                failed_poll(MISSING_VERSION_MESSAGE.to_string())
            }
        },
        JobStatus::Failed | JobStatus::Canceled => {
            if !store.fail_training(project_id, handle)? {
                return stale_poll(store, project_id, handle);
            }
            let message = job
                .error
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                .to_string();
            warn!(project_id, job_id = handle, error = %message, "training failed");
            failed_poll(message)
        }
        JobStatus::Starting | JobStatus::Processing | JobStatus::Other(_) => TrainingPoll {
            status: TrainingStatus::Training,
            version: None,
            logs: Some(job.log_tail(LOG_TAIL_LINES)),
            error: None,
            job_status: None,
        },
    };
    poll.job_status = job_status;
    Ok(poll)
}

fn failed_poll(message: String) -> TrainingPoll {
    TrainingPoll {
        status: TrainingStatus::Failed,
        version: None,
        logs: None,
        error: Some(message),
        job_status: None,
    }
}

/// A terminal write was refused because the record moved on; report what is
/// stored now instead.
fn stale_poll(store: &dyn MetadataStore, project_id: &str, handle: &str) -> Result<TrainingPoll> {
    warn!(
        project_id,
        job_id = handle,
        "training record changed while polling; returning stored state"
    );
    let project = load_project(store, project_id)?;
    Ok(TrainingPoll::persisted(&project))
}

fn job_status_label(job: &TrainingJob) -> String {
    match &job.status {
        JobStatus::Starting => "starting".to_string(),
        JobStatus::Processing => "processing".to_string(),
        JobStatus::Succeeded => "succeeded".to_string(),
        JobStatus::Failed => "failed".to_string(),
        JobStatus::Canceled => "canceled".to_string(),
        JobStatus::Other(raw) => raw.clone(),
    }
}
