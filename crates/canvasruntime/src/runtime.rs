use crate::{RunLedger, Scheduler};
use canvascore::{
    EngineError, GenerationRequest, MediaTransformer, NodeId, RunDetails, RunId, RunScope,
    RunStatus, TextGenerator, WorkflowGraph, WorkflowRun,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Default cap on run-history reads, matching the editor's history panel.
const DEFAULT_RUN_HISTORY: usize = 50;

/// Engine facade: the only API surface the core exposes. Full runs are
/// fire-and-forget background tasks; single-node runs resolve inline.
pub struct CanvasRuntime {
    ledger: Arc<dyn RunLedger>,
    generator: Arc<dyn TextGenerator>,
    scheduler: Arc<Scheduler>,
    active: Arc<RwLock<HashMap<RunId, CancellationToken>>>,
}

/// Interactive "run this node only" request from the editor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleNodeRequest {
    pub workflow_id: String,
    pub node_id: NodeId,
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_message: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl CanvasRuntime {
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        generator: Arc<dyn TextGenerator>,
        media: Arc<dyn MediaTransformer>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&generator),
            Arc::clone(&media),
        ));
        Self {
            ledger,
            generator,
            scheduler,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create the run record, kick off the batch loop in the background
    /// and return immediately. The spawned task owns its copy of the
    /// graph; the caller holds nothing the task needs.
    pub async fn start_full_run(
        &self,
        workflow_id: &str,
        graph: WorkflowGraph,
    ) -> canvascore::Result<RunId> {
        graph.validate()?;

        let run = self.ledger.create_run(workflow_id, RunScope::Full).await;
        let run_id = run.id;
        let token = CancellationToken::new();
        self.active.write().await.insert(run_id, token.clone());

        let scheduler = Arc::clone(&self.scheduler);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            match scheduler.execute(&run, &graph, token).await {
                Ok(summary) => {
                    tracing::info!(
                        run_id = %run.id,
                        "Background run finished: {}/{} nodes",
                        summary.completed_nodes,
                        summary.total_nodes
                    );
                }
                Err(err) => {
                    tracing::warn!(run_id = %run.id, "Background run ended: {}", err);
                }
            }
            active.write().await.remove(&run_id);
        });

        Ok(run_id)
    }

    /// Run one llm node with caller-supplied inputs, bypassing graph
    /// traversal. Records its own SINGLE-scope run and node run, then
    /// returns the generated text synchronously.
    pub async fn run_single_node(&self, request: SingleNodeRequest) -> canvascore::Result<String> {
        let run = self
            .ledger
            .create_run(&request.workflow_id, RunScope::Single)
            .await;
        let inputs = serde_json::json!({
            "systemPrompt": request.system_prompt,
            "userMessage": request.user_message,
            "imagesCount": request.images.len(),
        });
        let node_run = self
            .ledger
            .create_node_run(run.id, &request.node_id, inputs)
            .await;

        let generation = self
            .generator
            .generate(GenerationRequest {
                prompt: request.user_message,
                system: request.system_prompt,
                images: request.images,
                temperature: request.temperature.unwrap_or(0.7),
            })
            .await;

        match generation {
            Ok(output) => {
                self.ledger
                    .complete_node_run(node_run.id, serde_json::json!({ "output": output }))
                    .await?;
                self.ledger.finalize_run(run.id, RunStatus::Completed).await?;
                Ok(output)
            }
            Err(err) => {
                tracing::error!(node_id = %request.node_id, "Single node execution failed: {}", err);
                self.ledger.fail_node_run(node_run.id, err.to_string()).await?;
                self.ledger.finalize_run(run.id, RunStatus::Failed).await?;
                Err(EngineError::Node {
                    node_id: request.node_id,
                    source: err,
                })
            }
        }
    }

    /// Cooperative cancellation: marks the ledger row and trips the run's
    /// token. In-flight nodes finish; no new batch starts.
    pub async fn cancel_run(&self, run_id: RunId) -> canvascore::Result<()> {
        self.ledger
            .interrupt_run(run_id, RunStatus::Cancelled)
            .await?;
        if let Some(token) = self.active.read().await.get(&run_id) {
            token.cancel();
        }
        tracing::info!(run_id = %run_id, "Run cancellation requested");
        Ok(())
    }

    pub async fn run_details(&self, run_id: RunId) -> canvascore::Result<RunDetails> {
        self.ledger.get_run_details(run_id).await
    }

    pub async fn workflow_runs(
        &self,
        workflow_id: &str,
        limit: Option<usize>,
    ) -> Vec<WorkflowRun> {
        self.ledger
            .get_workflow_runs(workflow_id, limit.unwrap_or(DEFAULT_RUN_HISTORY))
            .await
    }

    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }
}
