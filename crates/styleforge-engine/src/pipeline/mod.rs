//! The pipeline components, leaves first. Every function takes its
//! collaborators as trait objects so the orchestrator and the tests can wire
//! them differently.

pub mod captioning;
pub mod composer;
pub mod dataset;
pub mod projects;
pub mod resolver;
pub mod retrieval;
pub mod synthesis;
pub mod training;

pub use captioning::{caption_pending_images, CaptionReport};
pub use composer::{compose, enhance_prompt, generation_prompt, ComposedPrompt};
pub use dataset::{package_dataset, DatasetPackage};
pub use projects::{create_project, list_projects, project_detail, upload_images, UploadFile};
pub use resolver::resolve_model_version;
pub use retrieval::{retrieve_exemplars, STYLE_REFERENCE_LIMIT};
pub use synthesis::synthesize;
pub use training::{poll_training, submit_training, TrainingPlan, TrainingPoll, TrainingSubmission};
