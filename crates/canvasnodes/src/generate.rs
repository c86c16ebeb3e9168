use crate::fetch;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use canvascore::{GenerationRequest, NodeError, TextGenerator};
use serde_json::{json, Value};

/// Fixed-order model fallback chain: each model is tried exactly once,
/// immediately, and the last error propagates if all fail.
pub const DEFAULT_MODEL_CHAIN: [&str; 3] =
    ["gemini-2.0-flash-lite", "gemini-2.5-flash", "gemini-2.0-flash"];

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub models: Vec<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            models: DEFAULT_MODEL_CHAIN.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.api_key = key;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        config
    }
}

/// Generation adapter backed by the Gemini `generateContent` REST API
pub struct GeminiGenerator {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn attempt(&self, model: &str, request: &GenerationRequest) -> Result<String, NodeError> {
        let parts = self.build_parts(request).await;
        let payload = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "temperature": request.temperature },
        });
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| NodeError::Generation(format!("{}: {}", model, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeError::Generation(format!(
                "{} returned HTTP {}: {}",
                model,
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| NodeError::Generation(format!("{}: invalid response: {}", model, e)))?;
        extract_text(&body)
            .ok_or_else(|| NodeError::Generation(format!("{}: response contained no text", model)))
    }

    /// Assemble the ordered content parts: optional system instruction,
    /// then the (possibly image-wrapped) prompt, then one inline-data
    /// part per usable image.
    async fn build_parts(&self, request: &GenerationRequest) -> Vec<Value> {
        let mut parts = Vec::new();

        if let Some(system) = &request.system {
            parts.push(json!({ "text": format!("System Instruction: {}\n\n", system) }));
        }

        if request.images.is_empty() {
            parts.push(json!({ "text": request.prompt }));
            return parts;
        }

        parts.push(json!({ "text": vision_prompt(&request.prompt, request.images.len()) }));
        for image in &request.images {
            match self.inline_image(image).await {
                Ok((mime_type, data)) => {
                    parts.push(json!({ "inline_data": { "mime_type": mime_type, "data": data } }));
                }
                Err(err) => {
                    // A broken image reference drops that image only; the
                    // generation call proceeds without it.
                    tracing::warn!("Dropping unusable image input: {}", err);
                }
            }
        }
        parts
    }

    /// Normalize an image reference to a (mime type, base64 payload)
    /// pair: `data:` URLs are split in place, remote URLs are fetched.
    async fn inline_image(&self, reference: &str) -> Result<(String, String), NodeError> {
        if reference.starts_with("data:") {
            let parsed = fetch::parse_data_url(reference)?;
            return Ok((parsed.mime.to_string(), parsed.base64.to_string()));
        }

        let (bytes, content_type) = fetch::fetch_bytes(&self.client, reference).await?;
        Ok((
            content_type.unwrap_or_else(|| "image/jpeg".to_string()),
            BASE64.encode(bytes),
        ))
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, NodeError> {
        if request.prompt.is_empty() {
            return Err(NodeError::EmptyPrompt);
        }

        let mut last_error = None;
        for model in &self.config.models {
            match self.attempt(model, &request).await {
                Ok(text) => {
                    tracing::debug!(model, "Generation succeeded");
                    return Ok(text);
                }
                Err(err) => {
                    tracing::warn!(model, "Model failed, trying next in chain: {}", err);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| NodeError::Generation("no models configured".to_string())))
    }
}

/// Prompt wrapper used when images are attached: the model is told to
/// analyze them silently and answer with the final content only.
fn vision_prompt(prompt: &str, image_count: usize) -> String {
    format!(
        "I'm providing {} image(s) for you to analyze.\n\n\
         Silently examine what you see in each image, then: {}\n\n\
         IMPORTANT: Do NOT include an \"Image Analysis\" section. Just provide the final \
         requested output directly. Reference the visual content naturally in your response. \
         Avoid using markdown formatting like **text** - use plain text only.",
        image_count, prompt
    )
}

fn extract_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_prompt_embeds_count_and_task() {
        let wrapped = vision_prompt("caption this", 2);
        assert!(wrapped.starts_with("I'm providing 2 image(s)"));
        assert!(wrapped.contains("then: caption this"));
    }

    #[test]
    fn extracts_text_from_candidate_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] }
            }]
        });
        assert_eq!(extract_text(&body).as_deref(), Some("Hello world"));
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert_eq!(extract_text(&json!({ "candidates": [] })), None);
        assert_eq!(extract_text(&json!({})), None);
    }

    #[tokio::test]
    async fn data_url_images_are_inlined_without_io() {
        let generator = GeminiGenerator::new(GeminiConfig::default());
        let request = GenerationRequest {
            prompt: "describe".to_string(),
            system: Some("be brief".to_string()),
            images: vec!["data:image/webp;base64,AAAA".to_string()],
            temperature: 0.5,
        };

        let parts = generator.build_parts(&request).await;
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0]["text"].as_str().unwrap(),
            "System Instruction: be brief\n\n"
        );
        assert_eq!(parts[2]["inline_data"]["mime_type"], "image/webp");
        assert_eq!(parts[2]["inline_data"]["data"], "AAAA");
    }

    #[tokio::test]
    async fn malformed_image_is_dropped_not_fatal() {
        let generator = GeminiGenerator::new(GeminiConfig::default());
        let request = GenerationRequest {
            prompt: "describe".to_string(),
            system: None,
            images: vec!["data:broken".to_string()],
            temperature: 0.7,
        };

        let parts = generator.build_parts(&request).await;
        // Only the wrapped prompt survives; the bad image contributes nothing.
        assert_eq!(parts.len(), 1);
        assert!(parts[0]["text"].as_str().unwrap().contains("describe"));
    }
}
