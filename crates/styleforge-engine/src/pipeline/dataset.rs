use std::collections::HashSet;
use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use styleforge_contracts::images::ImageRecord;
use styleforge_contracts::models::TRIGGER_WORD;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::clients::BlobStore;
use crate::http::error_chain_text;

pub const MANIFEST_NAME: &str = "metadata.jsonl";
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// A training archive built in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPackage {
    pub archive: Vec<u8>,
    /// Image entries in archive order; each has one manifest line.
    pub entries: Vec<String>,
    pub skipped: Vec<String>,
    pub sha256: String,
}

impl DatasetPackage {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn manifest_line(filename: &str, caption: &str) -> String {
    json!({
        "file_name": filename,
        "text": format!("{TRIGGER_WORD} {caption}"),
    })
    .to_string()
}

/// Packs `records` into a zip with one entry per fetched image and a
/// trailing `metadata.jsonl`. Images still pending a caption and images that
/// cannot be fetched are left out of both.
pub fn package_dataset(blobs: &dyn BlobStore, records: &[ImageRecord]) -> Result<DatasetPackage> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    let mut manifest = Vec::new();
    let mut seen = HashSet::new();

    for record in records {
        if record.caption.is_pending() {
            warn!(image_id = record.id, filename = %record.filename, "caption still pending; skipping");
            skipped.push(record.filename.clone());
            continue;
        }
        if record.filename == MANIFEST_NAME || seen.contains(&record.filename) {
            warn!(
                image_id = record.id,
                filename = %record.filename,
                "duplicate archive entry name; skipping"
            );
            skipped.push(record.filename.clone());
            continue;
        }
        let bytes = match blobs.fetch(&record.path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(image_id = record.id, path = %record.path, "image unavailable; leaving it out of the dataset");
                skipped.push(record.filename.clone());
                continue;
            }
            Err(err) => {
                warn!(
                    image_id = record.id,
                    path = %record.path,
                    error = %error_chain_text(&err, 300),
                    "image download failed; leaving it out of the dataset"
                );
                skipped.push(record.filename.clone());
                continue;
            }
        };
        writer
            .start_file(record.filename.as_str(), options)
            .with_context(|| format!("failed to start archive entry {}", record.filename))?;
        writer
            .write_all(&bytes)
            .with_context(|| format!("failed to write archive entry {}", record.filename))?;
        seen.insert(record.filename.clone());
        manifest.push(manifest_line(&record.filename, record.caption.stored_text()));
        entries.push(record.filename.clone());
    }

    writer
        .start_file(MANIFEST_NAME, options)
        .context("failed to start dataset manifest")?;
    writer
        .write_all(manifest.join("\n").as_bytes())
        .context("failed to write dataset manifest")?;
    let archive = writer
        .finish()
        .context("failed to finalize dataset archive")?
        .into_inner();
    let sha256 = hex::encode(Sha256::digest(&archive));

    info!(
        entries = entries.len(),
        skipped = skipped.len(),
        bytes = archive.len(),
        %sha256,
        "dataset packaged"
    );
    Ok(DatasetPackage {
        archive,
        entries,
        skipped,
        sha256,
    })
}
