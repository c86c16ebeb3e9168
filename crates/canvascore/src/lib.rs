//! Core abstractions for the canvasflow engine
//!
//! This crate provides the graph model, run ledger records, error taxonomy
//! and adapter traits that all other components depend on. It performs no
//! I/O of its own.

mod adapter;
mod error;
mod graph;
mod output;
mod run;

pub use adapter::{GenerationRequest, MediaRequest, MediaTransformer, TextGenerator};
pub use error::{EngineError, GraphError, NodeError};
pub use graph::{CropRect, Edge, Node, NodeId, NodeKind, TargetHandle, Timestamp, WorkflowGraph};
pub use output::NodeOutput;
pub use run::{
    NodeRun, NodeRunId, NodeRunStatus, RunDetails, RunId, RunScope, RunStatus, TriggerType,
    WorkflowRun,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
