use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use styleforge_contracts::config::ForgeConfig;
use tracing::debug;

use super::BlobStore;
use crate::http::ensure_success;

/// Raw image bytes on a workspace volume, through the Files API.
pub struct VolumeBlobStore {
    api_base: String,
    token: String,
    volume_root: String,
    http: HttpClient,
}

impl VolumeBlobStore {
    pub fn new(config: &ForgeConfig, http: HttpClient) -> Self {
        Self {
            api_base: format!("{}/api/2.0/fs/files", config.endpoints.blob),
            token: config.credentials.workspace_token.clone(),
            volume_root: config.volume_root.clone(),
            http,
        }
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, normalize_volume_path(path))
    }
}

impl BlobStore for VolumeBlobStore {
    fn image_path(&self, project_id: &str, filename: &str) -> String {
        format!("{}/{}/{}", self.volume_root, project_id, filename)
    }

    fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let url = self.file_url(path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .with_context(|| format!("volume download failed ({url})"))?;
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), %url, "volume download unsuccessful");
            return Ok(None);
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed reading volume bytes ({url})"))?;
        Ok(Some(bytes.to_vec()))
    }

    fn store(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let url = self.file_url(path);
        let response = self
            .http
            .put(&url)
            .query(&[("overwrite", "true")])
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .with_context(|| format!("volume upload failed ({url})"))?;
        ensure_success("Volume upload", response)
    }
}

/// Stored paths may carry a `dbfs:` scheme; the Files API wants the bare
/// absolute path.
fn normalize_volume_path(path: &str) -> String {
    let bare = path.trim().trim_start_matches("dbfs:");
    if bare.starts_with('/') {
        bare.to_string()
    } else {
        format!("/{bare}")
    }
}
