use crate::{CropRect, NodeError, Timestamp};
use async_trait::async_trait;

/// Request to the external language-generation service
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// Image references: remote URLs or `data:` URLs.
    pub images: Vec<String>,
    pub temperature: f64,
}

/// Text/vision generation endpoint. The concrete implementation retries
/// across its model fallback chain internally; callers make exactly one
/// attempt per node.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, NodeError>;
}

/// Request to the external media-processing tool. `input_url` is a remote
/// URL or a `data:` URL.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaRequest {
    Crop { input_url: String, rect: CropRect },
    ExtractFrame { input_url: String, timestamp: Timestamp },
}

impl MediaRequest {
    pub fn input_url(&self) -> &str {
        match self {
            MediaRequest::Crop { input_url, .. } => input_url,
            MediaRequest::ExtractFrame { input_url, .. } => input_url,
        }
    }
}

/// Media transform tool (image crop, video frame extraction). Returns the
/// result inline-encoded as a `data:image/png;base64,...` URL.
#[async_trait]
pub trait MediaTransformer: Send + Sync {
    async fn transform(&self, request: MediaRequest) -> Result<String, NodeError>;
}
