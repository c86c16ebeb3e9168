use async_trait::async_trait;
use canvascore::{
    CropRect, Edge, EngineError, GenerationRequest, MediaRequest, MediaTransformer, Node,
    NodeError, NodeKind, NodeOutput, NodeRunStatus, RunScope, RunStatus, TargetHandle,
    TextGenerator, WorkflowGraph,
};
use canvasruntime::{CanvasRuntime, MemoryLedger, RunLedger, Scheduler, SingleNodeRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Generator that echoes the prompt and records every request.
#[derive(Default)]
struct StubGenerator {
    calls: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
    fail: bool,
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, NodeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if request.prompt.is_empty() {
            return Err(NodeError::EmptyPrompt);
        }
        let prompt = request.prompt.clone();
        self.calls.lock().await.push(request);
        if self.fail {
            return Err(NodeError::Generation("model unavailable".into()));
        }
        Ok(format!("generated: {}", prompt))
    }
}

#[derive(Default)]
struct StubMedia {
    calls: Mutex<Vec<MediaRequest>>,
}

#[async_trait]
impl MediaTransformer for StubMedia {
    async fn transform(&self, request: MediaRequest) -> Result<String, NodeError> {
        self.calls.lock().await.push(request);
        Ok("data:image/png;base64,c3R1Yg==".to_string())
    }
}

fn text_node(id: &str, text: &str) -> Node {
    Node {
        id: id.into(),
        kind: NodeKind::Text { text: text.into() },
    }
}

fn llm_node(id: &str, prompt: Option<&str>) -> Node {
    Node {
        id: id.into(),
        kind: NodeKind::Llm {
            prompt: prompt.map(str::to_string),
            temperature: None,
        },
    }
}

fn upload_image_node(id: &str, data: Option<&str>) -> Node {
    Node {
        id: id.into(),
        kind: NodeKind::UploadImage {
            image_data: data.map(str::to_string),
        },
    }
}

fn crop_node(id: &str) -> Node {
    Node {
        id: id.into(),
        kind: NodeKind::CropImage(CropRect {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 50.0,
        }),
    }
}

fn edge(id: &str, source: &str, target: &str, handle: TargetHandle) -> Edge {
    Edge {
        id: id.into(),
        source: source.into(),
        target: target.into(),
        source_handle: None,
        target_handle: handle,
    }
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    generator: Arc<StubGenerator>,
    media: Arc<StubMedia>,
    scheduler: Scheduler,
}

fn harness_with(generator: StubGenerator) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let generator = Arc::new(generator);
    let media = Arc::new(StubMedia::default());
    let scheduler = Scheduler::new(
        ledger.clone() as Arc<dyn RunLedger>,
        generator.clone() as Arc<dyn TextGenerator>,
        media.clone() as Arc<dyn MediaTransformer>,
    );
    Harness {
        ledger,
        generator,
        media,
        scheduler,
    }
}

fn harness() -> Harness {
    harness_with(StubGenerator::default())
}

async fn execute(
    h: &Harness,
    graph: WorkflowGraph,
) -> (
    canvascore::RunId,
    canvascore::Result<canvasruntime::ExecutionSummary>,
) {
    let run = h.ledger.create_run("wf-test", RunScope::Full).await;
    let result = h
        .scheduler
        .execute(&run, &graph, CancellationToken::new())
        .await;
    (run.id, result)
}

#[tokio::test]
async fn linear_graph_completes_with_generated_text() {
    let h = harness();
    let graph = WorkflowGraph::new(
        vec![text_node("a", "Hello"), llm_node("b", None)],
        vec![edge("e1", "a", "b", TargetHandle::UserMessage)],
    );

    let (run_id, result) = execute(&h, graph).await;
    let summary = result.unwrap();

    assert_eq!(summary.completed_nodes, 2);
    assert_eq!(summary.total_nodes, 2);
    assert_eq!(
        summary.outputs.get(&"b".into()),
        Some(&NodeOutput::text("generated: Hello"))
    );

    let details = h.ledger.get_run_details(run_id).await.unwrap();
    assert_eq!(details.run.status, RunStatus::Completed);
    assert!(details.run.duration.is_some());
    assert_eq!(details.node_runs.len(), 2);
    assert!(details
        .node_runs
        .iter()
        .all(|nr| nr.status == NodeRunStatus::Completed));
}

#[tokio::test]
async fn empty_graph_completes_immediately() {
    let h = harness();
    let (run_id, result) = execute(&h, WorkflowGraph::default()).await;

    let summary = result.unwrap();
    assert_eq!(summary.total_nodes, 0);

    let details = h.ledger.get_run_details(run_id).await.unwrap();
    assert_eq!(details.run.status, RunStatus::Completed);
}

#[tokio::test]
async fn images_are_aggregated_in_edge_order() {
    let h = harness();
    let graph = WorkflowGraph::new(
        vec![
            upload_image_node("img1", Some("data:image/png;base64,AA==")),
            upload_image_node("img2", Some("data:image/png;base64,BB==")),
            llm_node("llm", Some("describe these")),
        ],
        vec![
            edge("e1", "img1", "llm", TargetHandle::Images),
            edge("e2", "img2", "llm", TargetHandle::Images),
        ],
    );

    let (_, result) = execute(&h, graph).await;
    result.unwrap();

    let calls = h.generator.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].images,
        vec!["data:image/png;base64,AA==", "data:image/png;base64,BB=="]
    );
    assert_eq!(calls[0].temperature, 0.7);
}

#[tokio::test]
async fn cyclic_graph_fails_every_node_with_deadlock() {
    let h = harness();
    let graph = WorkflowGraph::new(
        vec![llm_node("a", Some("x")), llm_node("b", Some("y"))],
        vec![
            edge("e1", "a", "b", TargetHandle::UserMessage),
            edge("e2", "b", "a", TargetHandle::UserMessage),
        ],
    );

    let (run_id, result) = execute(&h, graph).await;
    assert!(matches!(
        result,
        Err(EngineError::Deadlock {
            completed: 0,
            total: 2
        })
    ));

    let details = h.ledger.get_run_details(run_id).await.unwrap();
    assert_eq!(details.run.status, RunStatus::Failed);
    assert_eq!(details.node_runs.len(), 2);
    for node_run in &details.node_runs {
        assert_eq!(node_run.status, NodeRunStatus::Failed);
        assert_eq!(
            node_run.error.as_deref(),
            Some("Workflow deadlock: dependency cycle or unreachable")
        );
    }
}

#[tokio::test]
async fn dangling_dependency_strands_only_downstream_nodes() {
    let h = harness();
    let graph = WorkflowGraph::new(
        vec![text_node("a", "fine"), llm_node("b", Some("x"))],
        vec![edge("e1", "ghost", "b", TargetHandle::UserMessage)],
    );

    let (run_id, result) = execute(&h, graph).await;
    assert!(matches!(
        result,
        Err(EngineError::Deadlock {
            completed: 1,
            total: 2
        })
    ));

    let details = h.ledger.get_run_details(run_id).await.unwrap();
    let a = details
        .node_runs
        .iter()
        .find(|nr| nr.node_id == "a".into())
        .unwrap();
    let b = details
        .node_runs
        .iter()
        .find(|nr| nr.node_id == "b".into())
        .unwrap();
    assert_eq!(a.status, NodeRunStatus::Completed);
    assert_eq!(b.status, NodeRunStatus::Failed);
}

#[tokio::test]
async fn crop_without_image_fails_run_but_keeps_upstream_complete() {
    let h = harness();
    let graph = WorkflowGraph::new(
        vec![upload_image_node("a", None), crop_node("b")],
        vec![edge("e1", "a", "b", TargetHandle::ImageUrl)],
    );

    let (run_id, result) = execute(&h, graph).await;
    match result {
        Err(EngineError::Node { node_id, source }) => {
            assert_eq!(node_id, "b".into());
            assert!(matches!(source, NodeError::MissingImageInput));
        }
        other => panic!("expected node failure, got {:?}", other.map(|s| s.completed_nodes)),
    }

    let details = h.ledger.get_run_details(run_id).await.unwrap();
    assert_eq!(details.run.status, RunStatus::Failed);
    let a = details
        .node_runs
        .iter()
        .find(|nr| nr.node_id == "a".into())
        .unwrap();
    let b = details
        .node_runs
        .iter()
        .find(|nr| nr.node_id == "b".into())
        .unwrap();
    assert_eq!(a.status, NodeRunStatus::Completed);
    assert_eq!(b.status, NodeRunStatus::Failed);
    assert_eq!(
        b.error.as_deref(),
        Some("No image input provided. Connect an image source.")
    );
    assert!(h.media.calls.lock().await.is_empty());
}

#[tokio::test]
async fn crop_receives_percentage_rect_from_upstream_image() {
    let h = harness();
    let graph = WorkflowGraph::new(
        vec![
            upload_image_node("a", Some("data:image/png;base64,AA==")),
            crop_node("b"),
        ],
        vec![edge("e1", "a", "b", TargetHandle::ImageUrl)],
    );

    let (_, result) = execute(&h, graph).await;
    let summary = result.unwrap();
    assert_eq!(
        summary.outputs.get(&"b".into()),
        Some(&NodeOutput::media("data:image/png;base64,c3R1Yg=="))
    );

    let calls = h.media.calls.lock().await;
    assert_eq!(
        calls[0],
        MediaRequest::Crop {
            input_url: "data:image/png;base64,AA==".into(),
            rect: CropRect {
                x: 10.0,
                y: 10.0,
                width: 50.0,
                height: 50.0
            },
        }
    );
}

#[tokio::test]
async fn generation_failure_fails_the_whole_run() {
    let h = harness_with(StubGenerator {
        fail: true,
        ..StubGenerator::default()
    });
    let graph = WorkflowGraph::new(
        vec![text_node("a", "Hello"), llm_node("b", None)],
        vec![edge("e1", "a", "b", TargetHandle::UserMessage)],
    );

    let (run_id, result) = execute(&h, graph).await;
    assert!(matches!(result, Err(EngineError::Node { .. })));

    let details = h.ledger.get_run_details(run_id).await.unwrap();
    assert_eq!(details.run.status, RunStatus::Failed);
}

fn runtime_with(generator: StubGenerator) -> (CanvasRuntime, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let runtime = CanvasRuntime::new(
        ledger.clone() as Arc<dyn RunLedger>,
        Arc::new(generator) as Arc<dyn TextGenerator>,
        Arc::new(StubMedia::default()) as Arc<dyn MediaTransformer>,
    );
    (runtime, ledger)
}

async fn wait_for_terminal(runtime: &CanvasRuntime, run_id: canvascore::RunId) -> RunStatus {
    for _ in 0..200 {
        let details = runtime.run_details(run_id).await.unwrap();
        // finished_at is only written by finalization, after the batch
        // loop has fully wound down.
        if details.run.finished_at.is_some() {
            return details.run.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} never reached a terminal status", run_id);
}

#[tokio::test]
async fn full_run_is_fire_and_forget() {
    let (runtime, _) = runtime_with(StubGenerator::default());
    let graph = WorkflowGraph::new(
        vec![text_node("a", "Hello"), llm_node("b", None)],
        vec![edge("e1", "a", "b", TargetHandle::UserMessage)],
    );

    let run_id = runtime.start_full_run("wf-1", graph).await.unwrap();
    let status = wait_for_terminal(&runtime, run_id).await;
    assert_eq!(status, RunStatus::Completed);

    let runs = runtime.workflow_runs("wf-1", None).await;
    assert_eq!(runs.len(), 1);
    // The id handed back to the caller is the one the ledger recorded.
    assert_eq!(runs[0].id, run_id);
    assert_eq!(runs[0].scope, RunScope::Full);
}

#[tokio::test]
async fn cancellation_stops_new_batches() {
    let (runtime, _) = runtime_with(StubGenerator {
        delay: Some(Duration::from_millis(300)),
        ..StubGenerator::default()
    });
    // Two llm nodes in sequence; the first is in flight when we cancel.
    let graph = WorkflowGraph::new(
        vec![llm_node("a", Some("first")), llm_node("b", Some("second"))],
        vec![edge("e1", "a", "b", TargetHandle::UserMessage)],
    );

    let run_id = runtime.start_full_run("wf-1", graph).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.cancel_run(run_id).await.unwrap();

    let status = wait_for_terminal(&runtime, run_id).await;
    assert_eq!(status, RunStatus::Cancelled);

    let details = runtime.run_details(run_id).await.unwrap();
    // The in-flight node ran to completion; the downstream one never started.
    assert_eq!(details.node_runs.len(), 1);
    assert_eq!(details.node_runs[0].node_id, "a".into());
    assert_eq!(details.node_runs[0].status, NodeRunStatus::Completed);
}

#[tokio::test]
async fn single_node_runs_are_independent() {
    let (runtime, _) = runtime_with(StubGenerator::default());

    let request = |msg: &str| SingleNodeRequest {
        workflow_id: "wf-1".to_string(),
        node_id: "llm-1".into(),
        system_prompt: Some("be brief".to_string()),
        user_message: msg.to_string(),
        images: vec![],
        temperature: None,
    };

    let first = runtime.run_single_node(request("one")).await.unwrap();
    let second = runtime.run_single_node(request("two")).await.unwrap();
    assert_eq!(first, "generated: one");
    assert_eq!(second, "generated: two");

    let runs = runtime.workflow_runs("wf-1", None).await;
    assert_eq!(runs.len(), 2);
    assert_ne!(runs[0].id, runs[1].id);
    assert!(runs.iter().all(|r| r.scope == RunScope::Single));
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));

    for run in &runs {
        let details = runtime.run_details(run.id).await.unwrap();
        assert_eq!(details.node_runs.len(), 1);
    }
}

#[tokio::test]
async fn single_node_failure_is_recorded_and_propagated() {
    let (runtime, _) = runtime_with(StubGenerator::default());

    let result = runtime
        .run_single_node(SingleNodeRequest {
            workflow_id: "wf-1".to_string(),
            node_id: "llm-1".into(),
            system_prompt: None,
            user_message: String::new(),
            images: vec![],
            temperature: None,
        })
        .await;

    match result {
        Err(EngineError::Node { source, .. }) => {
            assert!(matches!(source, NodeError::EmptyPrompt));
        }
        other => panic!("expected prompt error, got {:?}", other.is_ok()),
    }

    let runs = runtime.workflow_runs("wf-1", None).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);

    let details = runtime.run_details(runs[0].id).await.unwrap();
    assert_eq!(details.node_runs[0].status, NodeRunStatus::Failed);
    assert_eq!(details.node_runs[0].error.as_deref(), Some("Prompt is required"));
}
