//! External service adapters
//!
//! Concrete implementations of the canvascore adapter traits: the Gemini
//! generation adapter and the ffmpeg media transform adapter.

mod fetch;
mod generate;
mod media;

pub use generate::{GeminiConfig, GeminiGenerator, DEFAULT_MODEL_CHAIN};
pub use media::{FfmpegConfig, FfmpegTransformer};
