use serde::{Deserialize, Serialize};

/// Output produced by a completed node, keyed by the upstream fields the
/// resolver understands. Each node type populates exactly one field
/// (`text`, `imageData`, `videoUrl`, or `output` for media-derived
/// payloads); the struct mirrors the union of shapes the canvas knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl NodeOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn image(image_data: Option<String>) -> Self {
        Self {
            image_data,
            ..Self::default()
        }
    }

    pub fn video(video_url: Option<String>) -> Self {
        Self {
            video_url,
            ..Self::default()
        }
    }

    /// Inline-encoded payload from a media transform (crop / extract).
    pub fn media(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }
}
