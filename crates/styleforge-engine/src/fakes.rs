//! In-memory collaborators for tests. Each fake is a cheap handle over shared
//! state so a test can keep a clone after boxing one into a `StyleForge`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use styleforge_contracts::images::{Caption, ImageRecord};
use styleforge_contracts::project::{Project, ProjectSummary, TrainingClaim, TrainingStatus};

use crate::clients::{
    BlobStore, ChatRequest, ImageService, IndexQuery, JobStatus, LanguageModel, MetadataStore,
    Prediction, PredictionRequest, TrainingJob, TrainingRequest, TrainingService, VectorIndex,
};

const VOLUME_ROOT: &str = "/Volumes/test";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn image(id: i64, project_id: &str, filename: &str, caption: Caption) -> ImageRecord {
    ImageRecord {
        id,
        project_id: project_id.to_string(),
        filename: filename.to_string(),
        path: format!("{VOLUME_ROOT}/{project_id}/{filename}"),
        caption,
    }
}

pub fn training_job(id: &str, status: JobStatus, output: Option<Value>) -> TrainingJob {
    TrainingJob {
        id: id.to_string(),
        status,
        output,
        logs: None,
        error: None,
    }
}

#[derive(Default)]
struct StoreState {
    projects: BTreeMap<String, Project>,
    /// Keyed by `(project_id, id)`; ids are only unique within a project.
    images: BTreeMap<(String, i64), ImageRecord>,
    fail_reads: bool,
    project_lookups: usize,
    failing_caption_ids: HashSet<(String, i64)>,
    lose_next_claim: bool,
    training_writes: usize,
}

#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<StoreState>>,
}

impl FakeStore {
    pub fn put_project(&self, project: Project) {
        locked(&self.state)
            .projects
            .insert(project.project_id.clone(), project);
    }

    pub fn put_image(&self, record: ImageRecord) {
        locked(&self.state)
            .images
            .insert((record.project_id.clone(), record.id), record);
    }

    pub fn project_snapshot(&self, project_id: &str) -> Option<Project> {
        locked(&self.state).projects.get(project_id).cloned()
    }

    pub fn image_snapshot(&self, project_id: &str, image_id: i64) -> Option<ImageRecord> {
        locked(&self.state)
            .images
            .get(&(project_id.to_string(), image_id))
            .cloned()
    }

    pub fn caption_of(&self, project_id: &str, image_id: i64) -> Option<Caption> {
        self.image_snapshot(project_id, image_id)
            .map(|record| record.caption)
    }

    pub fn stored_caption_text(&self, project_id: &str, image_id: i64) -> Option<String> {
        self.caption_of(project_id, image_id)
            .map(|caption| caption.stored_text().to_string())
    }

    pub fn fail_reads(&self, fail: bool) {
        locked(&self.state).fail_reads = fail;
    }

    pub fn project_lookups(&self) -> usize {
        locked(&self.state).project_lookups
    }

    pub fn fail_caption_writes_for(&self, project_id: &str, image_id: i64) {
        locked(&self.state)
            .failing_caption_ids
            .insert((project_id.to_string(), image_id));
    }

    /// The next `begin_training` behaves as if another writer changed the status first.
    pub fn lose_next_training_claim(&self) {
        locked(&self.state).lose_next_claim = true;
    }

    pub fn training_writes(&self) -> usize {
        locked(&self.state).training_writes
    }

    fn project_images(&self, project_id: &str, keep: impl Fn(&ImageRecord) -> bool) -> Vec<ImageRecord> {
        locked(&self.state)
            .images
            .values()
            .filter(|record| record.project_id == project_id && keep(record))
            .cloned()
            .collect()
    }
}

impl MetadataStore for FakeStore {
    fn project(&self, project_id: &str) -> Result<Option<Project>> {
        let mut state = locked(&self.state);
        state.project_lookups += 1;
        if state.fail_reads {
            bail!("metadata store unavailable");
        }
        Ok(state.projects.get(project_id).cloned())
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let state = locked(&self.state);
        if state.fail_reads {
            bail!("metadata store unavailable");
        }
        Ok(state
            .projects
            .values()
            .map(|project| ProjectSummary {
                project_id: project.project_id.clone(),
                name: project.name.clone(),
                description: project.description.clone(),
                image_count: state
                    .images
                    .values()
                    .filter(|record| record.project_id == project.project_id)
                    .count() as u64,
                training_status: project.training_status,
            })
            .collect())
    }

    fn insert_project(&self, project: &Project) -> Result<()> {
        self.put_project(project.clone());
        Ok(())
    }

    fn images(&self, project_id: &str) -> Result<Vec<ImageRecord>> {
        Ok(self.project_images(project_id, |_| true))
    }

    fn pending_images(&self, project_id: &str) -> Result<Vec<ImageRecord>> {
        Ok(self.project_images(project_id, |record| record.caption.is_pending()))
    }

    fn captioned_images(&self, project_id: &str) -> Result<Vec<ImageRecord>> {
        Ok(self.project_images(project_id, |record| !record.caption.is_pending()))
    }

    fn insert_image(&self, record: &ImageRecord) -> Result<()> {
        self.put_image(record.clone());
        Ok(())
    }

    fn set_caption(&self, project_id: &str, image_id: i64, caption: &Caption) -> Result<bool> {
        let key = (project_id.to_string(), image_id);
        let mut state = locked(&self.state);
        if state.failing_caption_ids.contains(&key) {
            bail!("caption write rejected for image {image_id}");
        }
        match state.images.get_mut(&key) {
            Some(record) if record.caption.is_pending() => {
                record.caption = caption.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn begin_training(
        &self,
        project_id: &str,
        expected: TrainingStatus,
        claim: &TrainingClaim,
    ) -> Result<bool> {
        let mut state = locked(&self.state);
        if state.lose_next_claim {
            state.lose_next_claim = false;
            return Ok(false);
        }
        let Some(project) = state.projects.get_mut(project_id) else {
            return Ok(false);
        };
        if project.training_status != expected {
            return Ok(false);
        }
        project.training_status = TrainingStatus::Training;
        project.trained_job_handle = Some(claim.job_handle.clone());
        project.trained_model_destination = Some(claim.destination.clone());
        state.training_writes += 1;
        Ok(true)
    }

    fn complete_training(&self, project_id: &str, job_handle: &str, version: &str) -> Result<bool> {
        let mut state = locked(&self.state);
        let Some(project) = state.projects.get_mut(project_id) else {
            return Ok(false);
        };
        if project.training_status != TrainingStatus::Training
            || project.trained_job_handle.as_deref() != Some(job_handle)
        {
            return Ok(false);
        }
        project.training_status = TrainingStatus::Completed;
        project.trained_model_reference = Some(version.to_string());
        state.training_writes += 1;
        Ok(true)
    }

    fn fail_training(&self, project_id: &str, job_handle: &str) -> Result<bool> {
        let mut state = locked(&self.state);
        let Some(project) = state.projects.get_mut(project_id) else {
            return Ok(false);
        };
        if project.training_status != TrainingStatus::Training
            || project.trained_job_handle.as_deref() != Some(job_handle)
        {
            return Ok(false);
        }
        project.training_status = TrainingStatus::Failed;
        state.training_writes += 1;
        Ok(true)
    }
}

#[derive(Default)]
struct BlobState {
    files: BTreeMap<String, Vec<u8>>,
    failing: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct FakeBlobs {
    state: Arc<Mutex<BlobState>>,
}

impl FakeBlobs {
    pub fn put(&self, path: &str, bytes: &[u8]) {
        locked(&self.state)
            .files
            .insert(path.to_string(), bytes.to_vec());
    }

    /// Stores bytes at the path of an image already in `store`.
    pub fn put_for(&self, store: &FakeStore, project_id: &str, image_id: i64, bytes: &[u8]) {
        if let Some(record) = store.image_snapshot(project_id, image_id) {
            self.put(&record.path, bytes);
        }
    }

    /// Fetches of `path` fail with a transport error.
    pub fn fail_path(&self, path: &str) {
        locked(&self.state).failing.insert(path.to_string());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        locked(&self.state).files.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        locked(&self.state).files.len()
    }
}

impl BlobStore for FakeBlobs {
    fn image_path(&self, project_id: &str, filename: &str) -> String {
        format!("{VOLUME_ROOT}/{project_id}/{filename}")
    }

    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let state = locked(&self.state);
        if state.failing.contains(path) {
            bail!("download of {path} failed");
        }
        Ok(state.files.get(path).cloned())
    }

    fn store(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.put(path, bytes);
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeModel {
    reply: Result<Option<String>, String>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl FakeModel {
    pub fn replying(reply: Option<&str>) -> Self {
        Self {
            reply: Ok(reply.map(str::to_string)),
            requests: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("serving endpoint unavailable".to_string()),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        locked(&self.requests).clone()
    }
}

impl LanguageModel for FakeModel {
    fn name(&self) -> &str {
        "fake-model"
    }

    fn complete(&self, request: &ChatRequest) -> Result<Option<String>> {
        locked(&self.requests).push(request.clone());
        self.reply.clone().map_err(|message| anyhow!(message))
    }
}

#[derive(Clone)]
pub struct FakeIndex {
    rows: Option<Vec<Vec<Value>>>,
    queries: Arc<Mutex<Vec<IndexQuery>>>,
    syncs: Arc<Mutex<usize>>,
}

impl FakeIndex {
    pub fn with_rows(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows: Some(rows),
            queries: Arc::default(),
            syncs: Arc::default(),
        }
    }

    /// Both queries and syncs fail.
    pub fn failing() -> Self {
        Self {
            rows: None,
            queries: Arc::default(),
            syncs: Arc::default(),
        }
    }

    pub fn queries(&self) -> Vec<IndexQuery> {
        locked(&self.queries).clone()
    }

    pub fn syncs(&self) -> usize {
        *locked(&self.syncs)
    }
}

impl VectorIndex for FakeIndex {
    fn query(&self, query: &IndexQuery) -> Result<Vec<Vec<Value>>> {
        locked(&self.queries).push(query.clone());
        self.rows
            .clone()
            .ok_or_else(|| anyhow!("vector search unavailable"))
    }

    fn sync(&self) -> Result<()> {
        *locked(&self.syncs) += 1;
        if self.rows.is_none() {
            bail!("vector search sync unavailable");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeImageService {
    outputs: Option<Vec<String>>,
    requests: Arc<Mutex<Vec<PredictionRequest>>>,
}

impl FakeImageService {
    pub fn returning(outputs: Vec<&str>) -> Self {
        Self {
            outputs: Some(outputs.into_iter().map(str::to_string).collect()),
            requests: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            outputs: None,
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<PredictionRequest> {
        locked(&self.requests).clone()
    }
}

impl ImageService for FakeImageService {
    fn predict(&self, request: &PredictionRequest) -> Result<Prediction> {
        locked(&self.requests).push(request.clone());
        let Some(outputs) = self.outputs.clone() else {
            bail!("image service request failed (502)");
        };
        Ok(Prediction {
            id: Some("pred-1".to_string()),
            status: JobStatus::Succeeded,
            output_urls: outputs,
        })
    }
}

#[derive(Default)]
struct TrainerState {
    uploads: Vec<(String, String, usize)>,
    submissions: Vec<TrainingRequest>,
    lookups: Vec<String>,
}

#[derive(Clone)]
pub struct FakeTrainer {
    job: Option<TrainingJob>,
    state: Arc<Mutex<TrainerState>>,
}

impl FakeTrainer {
    /// Accepts submissions with `job_id`; lookups report the job as starting.
    pub fn accepting(job_id: &str) -> Self {
        Self::with_job(training_job(job_id, JobStatus::Starting, None))
    }

    pub fn with_job(job: TrainingJob) -> Self {
        Self {
            job: Some(job),
            state: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            job: None,
            state: Arc::default(),
        }
    }

    pub fn upload_url(&self) -> &'static str {
        "https://files.example/dataset.zip"
    }

    /// `(filename, content type, byte count)` per upload.
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        locked(&self.state).uploads.clone()
    }

    pub fn submissions(&self) -> Vec<TrainingRequest> {
        locked(&self.state).submissions.clone()
    }

    pub fn lookups(&self) -> Vec<String> {
        locked(&self.state).lookups.clone()
    }
}

impl TrainingService for FakeTrainer {
    fn upload_file(&self, filename: &str, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        locked(&self.state).uploads.push((
            filename.to_string(),
            content_type.to_string(),
            bytes.len(),
        ));
        Ok(self.upload_url().to_string())
    }

    fn create_training(&self, request: &TrainingRequest) -> Result<TrainingJob> {
        locked(&self.state).submissions.push(request.clone());
        self.job
            .clone()
            .ok_or_else(|| anyhow!("training service request failed (500)"))
    }

    fn training(&self, job_id: &str) -> Result<TrainingJob> {
        locked(&self.state).lookups.push(job_id.to_string());
        self.job
            .clone()
            .ok_or_else(|| anyhow!("training service request failed (500)"))
    }
}
