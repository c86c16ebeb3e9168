use crate::{resolve_inputs, ResolvedInputs, RunLedger};
use canvascore::{
    EngineError, GenerationRequest, MediaRequest, MediaTransformer, Node, NodeError, NodeId,
    NodeKind, NodeOutput, RunId, RunStatus, TextGenerator, WorkflowGraph, WorkflowRun,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives one workflow graph to completion with a level-synchronous
/// schedule: fan out every ready node, await the whole batch, then
/// recompute readiness. Owns the in-memory outputs for the run; nothing
/// outside the scheduler ever sees them.
pub struct Scheduler {
    ledger: Arc<dyn RunLedger>,
    generator: Arc<dyn TextGenerator>,
    media: Arc<dyn MediaTransformer>,
}

/// Result of a fully completed run
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub run_id: RunId,
    pub outputs: HashMap<NodeId, NodeOutput>,
    pub completed_nodes: usize,
    pub total_nodes: usize,
}

enum LoopExit {
    Completed(HashMap<NodeId, NodeOutput>),
    Deadlock { completed: usize, total: usize },
    Interrupted(RunStatus),
}

impl Scheduler {
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        generator: Arc<dyn TextGenerator>,
        media: Arc<dyn MediaTransformer>,
    ) -> Self {
        Self {
            ledger,
            generator,
            media,
        }
    }

    /// Execute a full-graph run. The run row is finalized on every exit
    /// path; a run is never left stuck in RUNNING.
    pub async fn execute(
        &self,
        run: &WorkflowRun,
        graph: &WorkflowGraph,
        cancel: CancellationToken,
    ) -> canvascore::Result<ExecutionSummary> {
        let start = Instant::now();
        tracing::info!(run_id = %run.id, nodes = graph.nodes.len(), "Starting workflow run");

        let total_nodes = graph.nodes.len();
        let result = self.batch_loop(run.id, graph, &cancel).await;

        match result {
            Ok(LoopExit::Completed(outputs)) => {
                self.ledger
                    .finalize_run(run.id, RunStatus::Completed)
                    .await?;
                tracing::info!(
                    run_id = %run.id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Workflow run completed"
                );
                Ok(ExecutionSummary {
                    run_id: run.id,
                    completed_nodes: outputs.len(),
                    total_nodes,
                    outputs,
                })
            }
            Ok(LoopExit::Deadlock { completed, total }) => {
                self.ledger.finalize_run(run.id, RunStatus::Failed).await?;
                Err(EngineError::Deadlock { completed, total })
            }
            Ok(LoopExit::Interrupted(status)) => {
                // Keeps the externally-set terminal status, fills in the
                // finished timestamp and duration.
                self.ledger.finalize_run(run.id, status).await?;
                Err(EngineError::Interrupted { status })
            }
            Err(err) => {
                if let Err(ledger_err) = self.ledger.finalize_run(run.id, RunStatus::Failed).await
                {
                    tracing::error!(run_id = %run.id, "Failed to finalize run: {}", ledger_err);
                }
                tracing::error!(run_id = %run.id, "Workflow run failed: {}", err);
                Err(err)
            }
        }
    }

    async fn batch_loop(
        &self,
        run_id: RunId,
        graph: &WorkflowGraph,
        cancel: &CancellationToken,
    ) -> Result<LoopExit, EngineError> {
        let mut completed: HashSet<NodeId> = HashSet::new();
        let mut outputs: HashMap<NodeId, NodeOutput> = HashMap::new();
        let total = graph.nodes.len();

        while completed.len() < total {
            // Cooperative cancellation: the token trips immediately, the
            // ledger re-read catches out-of-band status writes. Either
            // way no new batch starts; in-flight nodes already joined.
            if cancel.is_cancelled() {
                tracing::warn!(run_id = %run_id, "Cancellation requested, stopping batch loop");
                return Ok(LoopExit::Interrupted(RunStatus::Cancelled));
            }
            let status = self.ledger.run_status(run_id).await?;
            if status == RunStatus::Failed || status == RunStatus::Cancelled {
                tracing::warn!(run_id = %run_id, ?status, "Run stopped externally, halting");
                return Ok(LoopExit::Interrupted(status));
            }

            // Ready set: incomplete nodes whose every incoming edge has a
            // completed source. Each batch is joined in full below, so no
            // node is ever mid-flight when we select here.
            let ready: Vec<Node> = graph
                .nodes
                .iter()
                .filter(|n| !completed.contains(&n.id))
                .filter(|n| graph.incoming(&n.id).all(|e| completed.contains(&e.source)))
                .cloned()
                .collect();

            if ready.is_empty() {
                return self.mark_deadlock(run_id, graph, &completed).await;
            }

            let mut handles = Vec::with_capacity(ready.len());
            for node in ready {
                let inputs = resolve_inputs(&node, &graph.edges, &outputs);
                let snapshot = config_snapshot(&node)?;
                let ledger = Arc::clone(&self.ledger);
                let generator = Arc::clone(&self.generator);
                let media = Arc::clone(&self.media);

                handles.push(tokio::spawn(async move {
                    let result =
                        execute_node(&*ledger, &*generator, &*media, run_id, &node, snapshot, inputs)
                            .await;
                    (node.id, result)
                }));
            }

            // Join the whole batch before recomputing readiness. A failed
            // node does not abort its siblings; they run to completion and
            // are recorded, then the first failure fails the run.
            let mut batch_error: Option<EngineError> = None;
            for joined in join_all(handles).await {
                let (node_id, result) = joined.map_err(|e| EngineError::Join(e.to_string()))?;
                match result {
                    Ok(output) => {
                        outputs.insert(node_id.clone(), output);
                        completed.insert(node_id);
                    }
                    Err(err) => {
                        if batch_error.is_none() {
                            batch_error = Some(EngineError::Node {
                                node_id,
                                source: err,
                            });
                        }
                    }
                }
            }
            if let Some(err) = batch_error {
                return Err(err);
            }
        }

        Ok(LoopExit::Completed(outputs))
    }

    /// No node is ready and none are running while incomplete nodes
    /// remain: a dependency cycle or a dangling dependency. Every
    /// stranded node gets a FAILED row; completed nodes keep theirs.
    async fn mark_deadlock(
        &self,
        run_id: RunId,
        graph: &WorkflowGraph,
        completed: &HashSet<NodeId>,
    ) -> Result<LoopExit, EngineError> {
        let total = graph.nodes.len();
        tracing::warn!(
            run_id = %run_id,
            completed = completed.len(),
            total,
            "Workflow deadlock detected"
        );

        for node in graph.nodes.iter().filter(|n| !completed.contains(&n.id)) {
            let snapshot = config_snapshot(node)?;
            let node_run = self.ledger.create_node_run(run_id, &node.id, snapshot).await;
            self.ledger
                .fail_node_run(node_run.id, NodeError::Deadlock.to_string())
                .await?;
        }

        Ok(LoopExit::Deadlock {
            completed: completed.len(),
            total,
        })
    }
}

/// The node's configuration as recorded in its NodeRun row.
fn config_snapshot(node: &Node) -> Result<serde_json::Value, EngineError> {
    let tagged = serde_json::to_value(&node.kind)?;
    Ok(tagged
        .get("data")
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

/// One node-execution unit: NodeRun row, input resolution already done by
/// the caller, adapter dispatch, terminal row write. The terminal status
/// is always recorded before the result propagates.
async fn execute_node(
    ledger: &dyn RunLedger,
    generator: &dyn TextGenerator,
    media: &dyn MediaTransformer,
    run_id: RunId,
    node: &Node,
    snapshot: serde_json::Value,
    inputs: ResolvedInputs,
) -> Result<NodeOutput, NodeError> {
    let started = Instant::now();
    let node_run = ledger.create_node_run(run_id, &node.id, snapshot).await;
    tracing::debug!(node_id = %node.id, node_type = node.kind.type_name(), "Executing node");

    let result = dispatch(generator, media, node, inputs).await;

    let record = match &result {
        Ok(output) => {
            tracing::info!(
                node_id = %node.id,
                duration_ms = started.elapsed().as_millis() as u64,
                "Node completed"
            );
            let outputs = serde_json::to_value(output).unwrap_or(serde_json::Value::Null);
            ledger.complete_node_run(node_run.id, outputs).await
        }
        Err(err) => {
            tracing::error!(node_id = %node.id, "Node failed: {}", err);
            ledger.fail_node_run(node_run.id, err.to_string()).await
        }
    };
    if let Err(ledger_err) = record {
        tracing::error!(node_id = %node.id, "Failed to record node run: {}", ledger_err);
    }

    result
}

/// Per-type node logic. Source nodes are pure pass-throughs; llm and the
/// two media types call out through their adapters.
async fn dispatch(
    generator: &dyn TextGenerator,
    media: &dyn MediaTransformer,
    node: &Node,
    inputs: ResolvedInputs,
) -> Result<NodeOutput, NodeError> {
    match &node.kind {
        NodeKind::Text { text } => Ok(NodeOutput::text(text.clone())),
        NodeKind::UploadImage { image_data } => Ok(NodeOutput::image(image_data.clone())),
        NodeKind::UploadVideo { video_url } => Ok(NodeOutput::video(video_url.clone())),
        NodeKind::Llm {
            prompt,
            temperature,
        } => {
            let system = inputs.system().map(str::to_string);
            // Connected user messages win over the node's own prompt.
            let prompt = if inputs.user_message.is_empty() {
                prompt.clone().unwrap_or_default()
            } else {
                inputs.user_message
            };
            let text = generator
                .generate(GenerationRequest {
                    prompt,
                    system,
                    images: inputs.images,
                    temperature: temperature.unwrap_or(0.7),
                })
                .await?;
            Ok(NodeOutput::text(text))
        }
        NodeKind::CropImage(rect) => {
            let input_url = inputs.image_url.ok_or(NodeError::MissingImageInput)?;
            let output = media
                .transform(MediaRequest::Crop {
                    input_url,
                    rect: *rect,
                })
                .await?;
            Ok(NodeOutput::media(output))
        }
        NodeKind::ExtractFrame { timestamp } => {
            let input_url = inputs.video_url.ok_or(NodeError::MissingVideoInput)?;
            let output = media
                .transform(MediaRequest::ExtractFrame {
                    input_url,
                    timestamp: *timestamp,
                })
                .await?;
            Ok(NodeOutput::media(output))
        }
    }
}
