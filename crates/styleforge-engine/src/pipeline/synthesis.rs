use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::clients::{ImageService, PredictionRequest};

const ASPECT_RATIO: &str = "1:1";
const OUTPUT_FORMAT: &str = "webp";
const OUTPUT_QUALITY: u32 = 90;

/// One square image for `prompt`. `Ok(None)` when the service answered
/// without output; transport and HTTP failures are errors.
pub fn synthesize(
    service: &dyn ImageService,
    prompt: &str,
    model_version: &str,
) -> Result<Option<String>> {
    let prediction = service
        .predict(&PredictionRequest {
            version: model_version.to_string(),
            prompt: prompt.to_string(),
            num_outputs: 1,
            aspect_ratio: ASPECT_RATIO.to_string(),
            output_format: OUTPUT_FORMAT.to_string(),
            output_quality: OUTPUT_QUALITY,
        })
        .context("image synthesis request failed")?;
    let image_url = prediction.output_urls.into_iter().next();
    match &image_url {
        Some(url) => info!(
            prediction_id = prediction.id.as_deref().unwrap_or(""),
            %url,
            "image synthesized"
        ),
        None => warn!(
            prediction_id = prediction.id.as_deref().unwrap_or(""),
            status = ?prediction.status,
            "image service returned no output"
        ),
    }
    Ok(image_url)
}
