//! Workflow execution runtime
//!
//! This crate drives a workflow graph to completion: the resolver turns
//! edges into per-node input bindings, the scheduler runs dependency
//! batches concurrently, and the run ledger records every run and node
//! run for the polling status reader.

mod ledger;
mod resolver;
mod runtime;
mod scheduler;

pub use ledger::{MemoryLedger, RunLedger};
pub use resolver::{resolve_inputs, ResolvedInputs};
pub use runtime::{CanvasRuntime, SingleNodeRequest};
pub use scheduler::{ExecutionSummary, Scheduler};
