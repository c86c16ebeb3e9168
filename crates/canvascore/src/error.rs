use crate::{NodeId, RunId, RunStatus};
use thiserror::Error;

/// Top-level error for a workflow run
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: NodeId,
        #[source]
        source: NodeError,
    },

    #[error("Workflow deadlock: {completed}/{total} nodes completed")]
    Deadlock { completed: usize, total: usize },

    #[error("Run stopped externally with status {status:?}")]
    Interrupted { status: RunStatus },

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Node run not found: {0}")]
    NodeRunNotFound(RunId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Task join error: {0}")]
    Join(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while executing a single node
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Prompt is required")]
    EmptyPrompt,

    #[error("No image input provided. Connect an image source.")]
    MissingImageInput,

    #[error("No video input provided. Connect a video source.")]
    MissingVideoInput,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("FFmpeg processing failed: {0}")]
    Media(String),

    #[error("Failed to download file: HTTP {status} from {url}")]
    Fetch { url: String, status: u16 },

    #[error("Failed to fetch {url}: {message}")]
    Network { url: String, message: String },

    #[error("Invalid base64 data URL format")]
    InvalidDataUrl,

    #[error("Workflow deadlock: dependency cycle or unreachable")]
    Deadlock,
}

/// Errors detected when loading a graph, before any node runs
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),
}
