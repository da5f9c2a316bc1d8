use std::fmt;

use serde::{Deserialize, Serialize};

/// Training lifecycle of a project.
///
/// `None -> Training -> {Completed, Failed}`, and both terminal states may
/// re-enter `Training` (retry / retrain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    #[default]
    None,
    Training,
    Completed,
    Failed,
}

impl TrainingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrainingStatus::None => "none",
            TrainingStatus::Training => "training",
            TrainingStatus::Completed => "completed",
            TrainingStatus::Failed => "failed",
        }
    }

    /// Reads a persisted status column. Missing or blank values are `None`,
    /// which is what freshly created projects carry.
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        let normalized = raw
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match normalized.as_str() {
            "" | "none" | "null" => Ok(TrainingStatus::None),
            "training" => Ok(TrainingStatus::Training),
            "completed" => Ok(TrainingStatus::Completed),
            "failed" => Ok(TrainingStatus::Failed),
            other => Err(format!("Unknown training status '{other}'.")),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TrainingStatus::Completed | TrainingStatus::Failed)
    }

    pub fn can_transition_to(self, next: TrainingStatus) -> bool {
        match (self, next) {
            (TrainingStatus::Training, TrainingStatus::Training) => false,
            (_, TrainingStatus::Training) => true,
            (TrainingStatus::Training, TrainingStatus::Completed | TrainingStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub training_status: TrainingStatus,
    pub trained_model_reference: Option<String>,
    pub trained_job_handle: Option<String>,
    pub trained_model_destination: Option<String>,
}

impl Project {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            description: description.into(),
            training_status: TrainingStatus::None,
            trained_model_reference: None,
            trained_job_handle: None,
            trained_model_destination: None,
        }
    }

    pub fn custom_model_version(&self) -> Option<&str> {
        self.trained_model_reference
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Row of the project listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub image_count: u64,
    pub training_status: TrainingStatus,
}

/// What the training controller writes once a submission has been accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingClaim {
    pub job_handle: String,
    pub destination: String,
}
