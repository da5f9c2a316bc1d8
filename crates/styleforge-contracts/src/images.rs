use serde::{Deserialize, Serialize};

/// Stored caption of an image that has not been through the captioning batch.
pub const PENDING_CAPTION: &str = "Pending captioning...";
/// Stored caption of an image the vision model could not describe.
pub const FAILED_CAPTION: &str = "Captioning failed";

/// Caption state of a reference image.
///
/// Persisted as plain text so existing rows keep working: the two sentinel
/// strings above map to `Pending` and `Failed`, anything else is `Captioned`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caption {
    Pending,
    Captioned(String),
    Failed,
}

impl Caption {
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some(PENDING_CAPTION) => Caption::Pending,
            Some(FAILED_CAPTION) => Caption::Failed,
            Some(text) => Caption::Captioned(text.to_string()),
        }
    }

    pub fn stored_text(&self) -> &str {
        match self {
            Caption::Pending => PENDING_CAPTION,
            Caption::Captioned(text) => text.as_str(),
            Caption::Failed => FAILED_CAPTION,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Caption::Pending)
    }
}

impl Serialize for Caption {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.stored_text())
    }
}

impl<'de> Deserialize<'de> for Caption {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Caption::from_stored(raw.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub project_id: String,
    pub filename: String,
    pub path: String,
    pub caption: Caption,
}

impl ImageRecord {
    pub fn media_type(&self) -> &'static str {
        media_type_for(&self.filename)
    }
}

/// Media type sent to the vision model. Only PNG is told apart; everything
/// else is declared as JPEG.
pub fn media_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if ext == "png" {
        "image/png"
    } else {
        "image/jpeg"
    }
}

/// Retrieval hit shown next to a generated image. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleExemplar {
    pub filename: String,
    pub caption: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sentinels_map_to_tagged_states() {
        assert_eq!(Caption::from_stored(Some(PENDING_CAPTION)), Caption::Pending);
        assert_eq!(Caption::from_stored(None), Caption::Pending);
        assert_eq!(Caption::from_stored(Some(FAILED_CAPTION)), Caption::Failed);
        assert_eq!(
            Caption::from_stored(Some("A cat in ink")),
            Caption::Captioned("A cat in ink".to_string())
        );
        assert_eq!(Caption::Failed.stored_text(), FAILED_CAPTION);
        assert!(Caption::Pending.is_pending());
        assert!(!Caption::Failed.is_pending());
    }

    #[test]
    fn only_png_is_distinguished() {
        assert_eq!(media_type_for("sketch.PNG"), "image/png");
        assert_eq!(media_type_for("sketch.jpg"), "image/jpeg");
        assert_eq!(media_type_for("sketch.webp"), "image/jpeg");
        assert_eq!(media_type_for("no-extension"), "image/jpeg");
    }

    #[test]
    fn record_serializes_caption_as_text() -> anyhow::Result<()> {
        let record = ImageRecord {
            id: 7,
            project_id: "p1".to_string(),
            filename: "cat.png".to_string(),
            path: "/Volumes/styleforge/data/illustrations/p1/cat.png".to_string(),
            caption: Caption::Pending,
        };
        let value = serde_json::to_value(&record)?;
        assert_eq!(value["caption"], json!(PENDING_CAPTION));

        let back: ImageRecord = serde_json::from_value(value)?;
        assert_eq!(back, record);
        Ok(())
    }
}
