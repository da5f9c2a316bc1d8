use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use styleforge_contracts::images::{Caption, ImageRecord};
use tracing::{debug, info, warn};

use crate::clients::{
    BlobStore, ChatMessage, ChatRequest, ContentPart, ImageUrl, LanguageModel, MetadataStore,
    VectorIndex,
};
use crate::http::error_chain_text;

const CAPTION_INSTRUCTION: &str = "You are an art expert analyzing visual reference material. Describe this image in detail: the subject matter, artistic style, techniques, color palette, mood, composition, and any distinctive characteristics. Be specific. Write 2-3 sentences.";
const CAPTION_MAX_TOKENS: u32 = 300;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptionReport {
    /// Captions written from model output.
    pub captioned: u64,
    /// Images that got the failed caption.
    pub failed: u64,
    /// Images whose bytes could not be fetched; still pending.
    pub skipped: u64,
    /// Images left pending by a store or transport error.
    pub errors: u64,
    pub index_synced: bool,
}

pub fn caption_request(record: &ImageRecord, bytes: &[u8]) -> ChatRequest {
    let data_url = format!(
        "data:{};base64,{}",
        record.media_type(),
        BASE64.encode(bytes)
    );
    ChatRequest {
        messages: vec![ChatMessage::user_parts(vec![
            ContentPart::Text {
                text: CAPTION_INSTRUCTION.to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl { url: data_url },
            },
        ])],
        max_tokens: CAPTION_MAX_TOKENS,
    }
}

/// Captions every pending image of a project, one at a time, then asks the
/// index to resync. Per-image problems never abort the batch.
pub fn caption_pending_images(
    store: &dyn MetadataStore,
    blobs: &dyn BlobStore,
    model: &dyn LanguageModel,
    index: &dyn VectorIndex,
    project_id: &str,
) -> Result<CaptionReport> {
    let pending = store
        .pending_images(project_id)
        .with_context(|| format!("failed to list pending images for {project_id}"))?;
    info!(project_id, pending = pending.len(), "captioning batch started");

    let mut report = CaptionReport::default();
    for record in &pending {
        let path = if record.path.trim().is_empty() {
            blobs.image_path(project_id, &record.filename)
        } else {
            record.path.clone()
        };
        let bytes = match blobs.fetch(&path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(project_id, image_id = record.id, %path, "image bytes unavailable; skipping");
                report.skipped += 1;
                continue;
            }
            Err(err) => {
                warn!(
                    project_id,
                    image_id = record.id,
                    error = %error_chain_text(&err, 300),
                    "image download failed"
                );
                report.errors += 1;
                continue;
            }
        };

        let caption = match model.complete(&caption_request(record, &bytes)) {
            Ok(Some(text)) => Caption::Captioned(text),
            Ok(None) => Caption::Failed,
            Err(err) => {
                warn!(
                    project_id,
                    image_id = record.id,
                    model = model.name(),
                    error = %error_chain_text(&err, 300),
                    "caption request failed"
                );
                Caption::Failed
            }
        };

        match store.set_caption(project_id, record.id, &caption) {
            Ok(true) => match caption {
                Caption::Captioned(_) => report.captioned += 1,
                _ => report.failed += 1,
            },
            Ok(false) => {
                debug!(project_id, image_id = record.id, "caption already written elsewhere");
            }
            Err(err) => {
                warn!(
                    project_id,
                    image_id = record.id,
                    error = %error_chain_text(&err, 300),
                    "failed to persist caption"
                );
                report.errors += 1;
            }
        }
    }

    report.index_synced = match index.sync() {
        Ok(()) => true,
        Err(err) => {
            warn!(project_id, error = %error_chain_text(&err, 300), "index resync failed");
            false
        }
    };
    info!(
        project_id,
        captioned = report.captioned,
        failed = report.failed,
        skipped = report.skipped,
        errors = report.errors,
        "captioning batch finished"
    );
    Ok(report)
}
