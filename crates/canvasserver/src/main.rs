use actix_cors::Cors;
use actix_web::{
    get, post, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult,
};
use canvascore::{Edge, EngineError, Node, RunId, WorkflowGraph};
use canvasnodes::{FfmpegConfig, FfmpegTransformer, GeminiConfig, GeminiGenerator};
use canvasruntime::{CanvasRuntime, MemoryLedger, SingleNodeRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Application state shared across handlers
struct AppState {
    runtime: Arc<CanvasRuntime>,
}

/// Request body for a full workflow run: the canvas ships its node and
/// edge arrays with every request, there is no stored definition.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    workflow_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

/// Response for starting a workflow run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    run_id: RunId,
    message: String,
}

/// Response for a single-node run
#[derive(Debug, Serialize)]
struct NodeOutputResponse {
    output: String,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: &EngineError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };
    match err {
        EngineError::RunNotFound(_) | EngineError::NodeRunNotFound(_) => {
            HttpResponse::NotFound().json(body)
        }
        EngineError::Graph(_) => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "canvasflow"
    }))
}

/// Start a full workflow run. Returns immediately with the run id; the
/// client polls the run endpoint for progress.
#[post("/api/workflows/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    req: web::Json<ExecuteRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    let graph = WorkflowGraph::new(req.nodes, req.edges);

    info!(
        "Executing workflow {}: {} nodes, {} edges",
        req.workflow_id,
        graph.nodes.len(),
        graph.edges.len()
    );

    match data.runtime.start_full_run(&req.workflow_id, graph).await {
        Ok(run_id) => Ok(HttpResponse::Ok().json(ExecuteResponse {
            run_id,
            message: "Workflow execution started".to_string(),
        })),
        Err(e) => {
            error!("Workflow {} rejected: {}", req.workflow_id, e);
            Ok(error_response(&e))
        }
    }
}

/// Run one llm node with caller-supplied inputs and wait for the text.
#[post("/api/nodes/execute")]
async fn execute_node(
    data: web::Data<AppState>,
    req: web::Json<SingleNodeRequest>,
) -> ActixResult<impl Responder> {
    let req = req.into_inner();
    info!("Executing single node {} of workflow {}", req.node_id, req.workflow_id);

    match data.runtime.run_single_node(req).await {
        Ok(output) => Ok(HttpResponse::Ok().json(NodeOutputResponse { output })),
        Err(e) => {
            error!("Single node execution failed: {}", e);
            Ok(error_response(&e))
        }
    }
}

/// Poll a run: the flattened run record plus its node runs.
#[get("/api/runs/{id}")]
async fn get_run(
    data: web::Data<AppState>,
    path: web::Path<RunId>,
) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();
    match data.runtime.run_details(run_id).await {
        Ok(details) => Ok(HttpResponse::Ok().json(details)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Cancel a running workflow. In-flight nodes finish; no new batch starts.
#[post("/api/runs/{id}/cancel")]
async fn cancel_run(
    data: web::Data<AppState>,
    path: web::Path<RunId>,
) -> ActixResult<impl Responder> {
    let run_id = path.into_inner();
    match data.runtime.cancel_run(run_id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": "Run cancellation requested"
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Run history for one workflow, newest first.
#[get("/api/workflows/{id}/runs")]
async fn list_runs(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> ActixResult<impl Responder> {
    let workflow_id = path.into_inner();
    let runs = data.runtime.workflow_runs(&workflow_id, query.limit).await;
    Ok(HttpResponse::Ok().json(runs))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("🚀 Starting Canvas Flow Server");

    let gemini = GeminiConfig::from_env();
    if gemini.api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY is not set; llm nodes will fail");
    }

    let runtime = CanvasRuntime::new(
        Arc::new(MemoryLedger::new()),
        Arc::new(GeminiGenerator::new(gemini)),
        Arc::new(FfmpegTransformer::new(FfmpegConfig::from_env())),
    );

    info!("✅ Runtime initialized");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });

    let bind_address =
        std::env::var("CANVASFLOW_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(execute_workflow)
            .service(execute_node)
            .service(get_run)
            .service(cancel_run)
            .service(list_runs)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
