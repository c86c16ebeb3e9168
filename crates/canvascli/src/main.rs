use anyhow::{Context, Result};
use canvascore::{Edge, Node, NodeKind, NodeRunStatus, RunStatus, TargetHandle, WorkflowGraph};
use canvasnodes::{FfmpegConfig, FfmpegTransformer, GeminiConfig, GeminiGenerator};
use canvasruntime::{CanvasRuntime, MemoryLedger};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "canvasflow")]
#[command(about = "Canvas workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

/// On-disk workflow file: the graph plus an optional workflow id used to
/// key the run history.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowFile {
    #[serde(default = "default_workflow_id")]
    workflow_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

fn default_workflow_id() -> String {
    "cli-workflow".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, verbose } => {
            let level = if verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            };
            tracing_subscriber::fmt().with_max_level(level).init();

            run_workflow(file).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &PathBuf) -> Result<WorkflowFile> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("could not parse {}", file.display()))
}

async fn run_workflow(file: PathBuf) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(&file)?;
    let graph = WorkflowGraph::new(workflow.nodes, workflow.edges);

    println!("📋 Workflow: {}", workflow.workflow_id);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!();

    let gemini = GeminiConfig::from_env();
    if gemini.api_key.is_empty() {
        println!("⚠️  GEMINI_API_KEY is not set; llm nodes will fail");
    }

    let runtime = CanvasRuntime::new(
        Arc::new(MemoryLedger::new()),
        Arc::new(GeminiGenerator::new(gemini)),
        Arc::new(FfmpegTransformer::new(FfmpegConfig::from_env())),
    );

    let run_id = runtime.start_full_run(&workflow.workflow_id, graph).await?;
    println!("▶️  Run started: {}", run_id);

    // Poll the ledger, announcing node results as they land.
    let mut reported: HashSet<String> = HashSet::new();
    let details = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let details = runtime.run_details(run_id).await?;

        for node_run in &details.node_runs {
            if node_run.finished_at.is_none() || !reported.insert(node_run.node_id.to_string()) {
                continue;
            }
            match node_run.status {
                NodeRunStatus::Completed => {
                    println!(
                        "  ✅ Node {} completed in {}ms",
                        node_run.node_id,
                        node_run.duration.unwrap_or(0)
                    );
                }
                NodeRunStatus::Failed => {
                    println!(
                        "  ❌ Node {} failed: {}",
                        node_run.node_id,
                        node_run.error.as_deref().unwrap_or("unknown error")
                    );
                }
                NodeRunStatus::Running => {}
            }
        }

        if details.run.finished_at.is_some() {
            break details;
        }
    };

    println!();
    match details.run.status {
        RunStatus::Completed => println!(
            "✨ Workflow completed in {}ms",
            details.run.duration.unwrap_or(0)
        ),
        RunStatus::Failed => println!("💥 Workflow failed"),
        RunStatus::Cancelled => println!("🛑 Workflow cancelled"),
        RunStatus::Running => {}
    }

    let outputs: Vec<_> = details
        .node_runs
        .iter()
        .filter_map(|nr| nr.outputs.as_ref().map(|o| (&nr.node_id, o)))
        .collect();
    if !outputs.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_id, output) in outputs {
            println!("   {}: {}", node_id, truncate(&output.to_string(), 200));
        }
    }

    if details.run.status == RunStatus::Failed {
        anyhow::bail!("run {} failed", run_id);
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(&file)?;
    let graph = WorkflowGraph::new(workflow.nodes, workflow.edges);
    graph.validate()?;

    println!("✅ Workflow is valid:");
    println!("   Id: {}", workflow.workflow_id);
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());

    if graph.has_cycle() {
        println!("⚠️  Dependency cycle detected: a run of this graph will deadlock");
    }
    let known: HashSet<_> = graph.nodes.iter().map(|n| &n.id).collect();
    for edge in &graph.edges {
        for end in [&edge.source, &edge.target] {
            if !known.contains(end) {
                println!("⚠️  Edge {} references missing node {}", edge.id, end);
            }
        }
    }

    Ok(())
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let workflow = WorkflowFile {
        workflow_id: "example-prompt-chain".to_string(),
        nodes: vec![
            Node {
                id: "text-1".into(),
                kind: NodeKind::Text {
                    text: "Write a haiku about rivers.".to_string(),
                },
            },
            Node {
                id: "llm-1".into(),
                kind: NodeKind::Llm {
                    prompt: None,
                    temperature: Some(0.7),
                },
            },
        ],
        edges: vec![Edge {
            id: "edge-1".to_string(),
            source: "text-1".into(),
            target: "llm-1".into(),
            source_handle: None,
            target_handle: TargetHandle::UserMessage,
        }],
    };

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  canvasflow run --file {}", output.display());

    Ok(())
}
