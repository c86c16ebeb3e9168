use crate::fetch;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use canvascore::{CropRect, MediaRequest, MediaTransformer, NodeError, Timestamp};
use std::ffi::OsString;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl FfmpegConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("FFPROBE_PATH") {
            config.ffprobe_path = path;
        }
        config
    }
}

/// Media transform adapter backed by the ffmpeg/ffprobe binaries. Inputs
/// are staged into a per-call temp directory that is removed on every
/// exit path when the handle drops.
pub struct FfmpegTransformer {
    client: reqwest::Client,
    config: FfmpegConfig,
}

impl FfmpegTransformer {
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Resolve the input to local bytes: decode `data:` URLs in place,
    /// download anything else.
    async fn resolve_input(&self, input_url: &str) -> Result<Vec<u8>, NodeError> {
        if input_url.starts_with("data:") {
            return fetch::decode_data_url(input_url);
        }
        let (bytes, _) = fetch::fetch_bytes(&self.client, input_url).await?;
        Ok(bytes)
    }

    async fn run_ffmpeg(&self, args: Vec<OsString>) -> Result<(), NodeError> {
        let output = tokio::process::Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                NodeError::Media(format!("could not launch {}: {}", self.config.ffmpeg_path, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NodeError::Media(
                stderr
                    .lines()
                    .last()
                    .unwrap_or("ffmpeg exited with an error")
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Probe the source duration in seconds, needed to resolve
    /// percentage timestamps.
    async fn probe_duration(&self, input: &Path) -> Result<f64, NodeError> {
        let output = tokio::process::Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(input)
            .output()
            .await
            .map_err(|e| {
                NodeError::Media(format!(
                    "could not launch {}: {}",
                    self.config.ffprobe_path, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NodeError::Media(format!(
                "ffprobe failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| NodeError::Media("could not parse source duration".to_string()))
    }
}

#[async_trait]
impl MediaTransformer for FfmpegTransformer {
    async fn transform(&self, request: MediaRequest) -> Result<String, NodeError> {
        let workdir = tempfile::tempdir().map_err(|e| NodeError::Media(e.to_string()))?;
        let input_path = workdir.path().join("input");
        let output_path = workdir.path().join("output.png");

        let bytes = self.resolve_input(request.input_url()).await?;
        tokio::fs::write(&input_path, &bytes)
            .await
            .map_err(|e| NodeError::Media(e.to_string()))?;

        let args: Vec<OsString> = match &request {
            MediaRequest::Crop { rect, .. } => vec![
                "-i".into(),
                input_path.clone().into_os_string(),
                "-vf".into(),
                crop_filter(rect).into(),
                "-y".into(),
                output_path.clone().into_os_string(),
            ],
            MediaRequest::ExtractFrame { timestamp, .. } => {
                let seconds = match timestamp {
                    Timestamp::Seconds(_) => timestamp.resolve(0.0),
                    Timestamp::Percent(_) => {
                        let duration = self.probe_duration(&input_path).await?;
                        timestamp.resolve(duration)
                    }
                };
                vec![
                    "-ss".into(),
                    format!("{}", seconds).into(),
                    "-i".into(),
                    input_path.clone().into_os_string(),
                    "-vframes".into(),
                    "1".into(),
                    "-y".into(),
                    output_path.clone().into_os_string(),
                ]
            }
        };

        self.run_ffmpeg(args).await?;

        let image = tokio::fs::read(&output_path)
            .await
            .map_err(|e| NodeError::Media(format!("no output frame produced: {}", e)))?;
        Ok(format!("data:image/png;base64,{}", BASE64.encode(image)))
    }
}

/// Crop rectangle as an ffmpeg filter expression. The rect is given in
/// percentages of the source dimensions, so the filter scales by iw/ih.
fn crop_filter(rect: &CropRect) -> String {
    format!(
        "crop=iw*({}/100):ih*({}/100):iw*({}/100):ih*({}/100)",
        rect.width, rect.height, rect.x, rect.y
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_crop_covers_the_full_frame() {
        let filter = crop_filter(&CropRect::default());
        assert_eq!(filter, "crop=iw*(100/100):ih*(100/100):iw*(0/100):ih*(0/100)");
    }

    #[test]
    fn crop_filter_places_offset_after_size() {
        let filter = crop_filter(&CropRect {
            x: 10.0,
            y: 20.0,
            width: 50.0,
            height: 40.0,
        });
        assert_eq!(filter, "crop=iw*(50/100):ih*(40/100):iw*(10/100):ih*(20/100)");
    }

    #[test]
    fn percent_timestamp_resolves_against_duration() {
        assert_eq!(Timestamp::Percent(50.0).resolve(120.0), 60.0);
        assert_eq!(Timestamp::Seconds(7.5).resolve(120.0), 7.5);
    }

    #[tokio::test]
    async fn malformed_data_url_fails_before_tool_launch() {
        let transformer = FfmpegTransformer::new(FfmpegConfig::default());
        let result = transformer
            .transform(MediaRequest::Crop {
                input_url: "data:image/png".to_string(),
                rect: CropRect::default(),
            })
            .await;
        assert!(matches!(result, Err(NodeError::InvalidDataUrl)));
    }
}
