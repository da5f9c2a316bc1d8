use styleforge_contracts::models::{ModelSelection, ModelSelector};
use tracing::warn;

use crate::clients::MetadataStore;
use crate::http::error_chain_text;

/// Model version for a generation request. Never fails: lookup errors and
/// unknown projects resolve to the baseline.
pub fn resolve_model_version(
    store: &dyn MetadataStore,
    selector: &ModelSelector,
    project_id: Option<&str>,
) -> ModelSelection {
    let Some(project_id) = project_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return selector.select(None);
    };
    match store.project(project_id) {
        Ok(Some(project)) => selector.select(Some(&project)),
        Ok(None) => selector.fallback(format!(
            "Project '{project_id}' not found; using baseline."
        )),
        Err(err) => {
            warn!(
                project_id,
                error = %error_chain_text(&err, 300),
                "model version lookup failed; using baseline"
            );
            selector.fallback(format!(
                "Model lookup for project '{project_id}' failed; using baseline."
            ))
        }
    }
}
