use std::env;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::models::BASELINE_MODEL_VERSION;

pub const DEFAULT_SCHEMA: &str = "styleforge.data";
pub const DEFAULT_VOLUME_ROOT: &str = "/Volumes/styleforge/data/illustrations";
pub const DEFAULT_VECTOR_INDEX: &str = "styleforge.data.illustration_index";
pub const DEFAULT_ENHANCE_MODEL: &str = "databricks-meta-llama-3-3-70b-instruct";
pub const DEFAULT_CAPTION_MODEL: &str = "databricks-llama-4-maverick";
pub const DEFAULT_IMAGE_SERVICE_BASE: &str = "https://api.replicate.com/v1";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Base URLs of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub metadata: String,
    pub blob: String,
    pub model: String,
    pub index: String,
    pub image_service: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub workspace_token: String,
    pub image_service_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("workspace_token", &redact(&self.workspace_token))
            .field("image_service_token", &redact(&self.image_service_token))
            .finish()
    }
}

fn redact(token: &str) -> &'static str {
    if token.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Everything the engine needs to reach its collaborators, built once and
/// passed to each component at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForgeConfig {
    pub endpoints: Endpoints,
    pub credentials: Credentials,
    pub warehouse_id: String,
    pub schema: String,
    pub volume_root: String,
    pub vector_index: String,
    pub enhance_model: String,
    pub caption_model: String,
    pub model_owner: Option<String>,
    pub baseline_version: String,
    pub http_timeout: Duration,
}

impl ForgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds a config from any key lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut missing = Vec::new();
        let host = get("DATABRICKS_HOST").map(|value| normalize_base(&value));
        let workspace_token = get("DATABRICKS_TOKEN");
        let warehouse_id = get("DATABRICKS_WAREHOUSE_ID");
        let image_service_token =
            get("REPLICATE_API_TOKEN").or_else(|| get("REPLICATE_API_KEY"));
        if host.is_none() {
            missing.push("DATABRICKS_HOST");
        }
        if workspace_token.is_none() {
            missing.push("DATABRICKS_TOKEN");
        }
        if warehouse_id.is_none() {
            missing.push("DATABRICKS_WAREHOUSE_ID");
        }
        if image_service_token.is_none() {
            missing.push("REPLICATE_API_TOKEN");
        }
        let (Some(host), Some(workspace_token), Some(warehouse_id), Some(image_service_token)) =
            (host, workspace_token, warehouse_id, image_service_token)
        else {
            bail!("missing configuration: {}", missing.join(", "));
        };

        let endpoint = |key: &str| {
            get(key)
                .map(|value| normalize_base(&value))
                .unwrap_or_else(|| host.clone())
        };
        let endpoints = Endpoints {
            metadata: endpoint("STYLEFORGE_METADATA_ENDPOINT"),
            blob: endpoint("STYLEFORGE_BLOB_ENDPOINT"),
            model: endpoint("STYLEFORGE_MODEL_ENDPOINT"),
            index: endpoint("STYLEFORGE_INDEX_ENDPOINT"),
            image_service: get("REPLICATE_API_BASE")
                .map(|value| normalize_base(&value))
                .unwrap_or_else(|| DEFAULT_IMAGE_SERVICE_BASE.to_string()),
        };

        let schema = get("STYLEFORGE_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        if !is_dotted_identifier(&schema) {
            bail!("STYLEFORGE_SCHEMA must be a dotted identifier (got '{schema}')");
        }
        let vector_index =
            get("STYLEFORGE_VECTOR_INDEX").unwrap_or_else(|| DEFAULT_VECTOR_INDEX.to_string());
        if !is_dotted_identifier(&vector_index) {
            bail!("STYLEFORGE_VECTOR_INDEX must be a dotted identifier (got '{vector_index}')");
        }

        let http_timeout_secs = match get("STYLEFORGE_HTTP_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => bail!("STYLEFORGE_HTTP_TIMEOUT_SECS must be a positive integer (got '{raw}')"),
            },
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            endpoints,
            credentials: Credentials {
                workspace_token,
                image_service_token,
            },
            warehouse_id,
            schema,
            volume_root: get("STYLEFORGE_VOLUME_ROOT")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_VOLUME_ROOT.to_string()),
            vector_index,
            enhance_model: get("STYLEFORGE_ENHANCE_MODEL")
                .unwrap_or_else(|| DEFAULT_ENHANCE_MODEL.to_string()),
            caption_model: get("STYLEFORGE_CAPTION_MODEL")
                .unwrap_or_else(|| DEFAULT_CAPTION_MODEL.to_string()),
            model_owner: get("REPLICATE_MODEL_OWNER"),
            baseline_version: get("STYLEFORGE_BASELINE_VERSION")
                .unwrap_or_else(|| BASELINE_MODEL_VERSION.to_string()),
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    pub fn projects_table(&self) -> String {
        format!("{}.projects", self.schema)
    }

    pub fn images_table(&self) -> String {
        format!("{}.image_records", self.schema)
    }
}

fn normalize_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

/// `catalog.schema[.name]` made of ASCII word characters. Table and index
/// names are spliced into statements, so nothing else is accepted.
pub fn is_dotted_identifier(raw: &str) -> bool {
    !raw.is_empty()
        && raw.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        })
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
