use serde::{Deserialize, Serialize};

use crate::project::Project;

/// Public text-to-image version used when a project has no fine-tune.
pub const BASELINE_MODEL_VERSION: &str =
    "6cf56a65fbcb6780fbf892befe53af18edb2c9ad0213e8eaaf4b78ebd7cc25f8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Baseline,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub version: String,
    pub source: ModelSource,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    baseline: String,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelSelector {
    pub fn new(baseline: Option<String>) -> Self {
        Self {
            baseline: baseline
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| BASELINE_MODEL_VERSION.to_string()),
        }
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    pub fn select(&self, project: Option<&Project>) -> ModelSelection {
        let Some(project) = project else {
            return self.fallback("No project specified; using baseline.".to_string());
        };
        if let Some(version) = project.custom_model_version() {
            return ModelSelection {
                version: version.to_string(),
                source: ModelSource::Custom,
                fallback_reason: None,
            };
        }
        self.fallback(format!(
            "Project '{}' has no trained model; using baseline.",
            project.project_id
        ))
    }

    pub fn fallback(&self, reason: String) -> ModelSelection {
        ModelSelection {
            version: self.baseline.clone(),
            source: ModelSource::Baseline,
            fallback_reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::project::{Project, TrainingStatus};

    use super::*;

    #[test]
    fn trained_project_uses_its_custom_version() {
        let mut project = Project::new("p1", "Ink", "");
        project.training_status = TrainingStatus::Completed;
        project.trained_model_reference = Some("v123".to_string());

        let selection = ModelSelector::default().select(Some(&project));
        assert_eq!(selection.version, "v123");
        assert_eq!(selection.source, ModelSource::Custom);
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn untrained_project_falls_back_with_explanation() {
        let project = Project::new("p2", "Ink", "");
        let selection = ModelSelector::default().select(Some(&project));
        assert_eq!(selection.version, BASELINE_MODEL_VERSION);
        assert_eq!(selection.source, ModelSource::Baseline);
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Project 'p2' has no trained model; using baseline.")
        );
    }

    #[test]
    fn blank_baseline_override_is_ignored() {
        let selector = ModelSelector::new(Some("  ".to_string()));
        assert_eq!(selector.baseline(), BASELINE_MODEL_VERSION);
        let selector = ModelSelector::new(Some("custom-base".to_string()));
        assert_eq!(selector.select(None).version, "custom-base");
    }
}
