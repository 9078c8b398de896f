use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{
    delete, get, patch, post, web, App, HttpResponse, HttpServer, Responder, ResponseError,
};
use actix_ws::Message;
use reconcore::{
    Connection, ExecutionId, FlowError, NodeCategory, Position, Value, WorkflowDocument,
    WorkflowError, WorkflowNode,
};
use reconruntime::{
    ExecutionHandle, ExecutionOutcome, FlowRuntime, GraphResolver, RuntimeConfig,
    WorkflowSession,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<FlowRuntime>,
    /// Serialises read-modify-write edits of stored workflows
    edits: Mutex<()>,
    /// Background runs started with `?background=true`
    runs: RwLock<HashMap<ExecutionId, ExecutionHandle>>,
}

impl AppState {
    fn new(runtime: FlowRuntime) -> Self {
        Self {
            runtime: Arc::new(runtime),
            edits: Mutex::new(()),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Apply an editing operation to a stored workflow and store the result.
    async fn edit<T>(
        &self,
        workflow_id: &str,
        apply: impl FnOnce(&mut WorkflowSession) -> Result<T, WorkflowError>,
    ) -> Result<T, ApiError> {
        let _guard = self.edits.lock().await;
        let graph = self
            .runtime
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        let mut session = self.runtime.session(graph);
        let value = apply(&mut session)?;
        self.runtime.register_workflow(session.into_graph()).await;
        Ok(value)
    }

    async fn document(&self, workflow_id: &str) -> Result<WorkflowDocument, ApiError> {
        self.runtime
            .get_workflow(workflow_id)
            .await
            .map(|graph| WorkflowDocument::export(&graph))
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()).into())
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

fn workflow_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::NotFound(_) | WorkflowError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::CyclicDependency(_) | WorkflowError::DuplicateNode(_) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Workflow(err) | Self::Flow(FlowError::Workflow(err)) => workflow_status(err),
            Self::Flow(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            Self::UnknownAction(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddNodeRequest {
    id: Option<String>,
    #[serde(rename = "type")]
    node_type: String,
    title: Option<String>,
    position: Option<Position>,
    #[serde(default)]
    config: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    source: String,
    target: String,
    #[serde(rename = "sourceHandle")]
    source_handle: Option<String>,
    #[serde(rename = "targetHandle")]
    target_handle: Option<String>,
}

/// Request body for workflow execution
#[derive(Debug, Default, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    variables: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteQuery {
    #[serde(default)]
    background: bool,
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    execution: Option<ExecutionId>,
}

#[derive(Debug, Default, Deserialize)]
struct NodesQuery {
    category: Option<NodeCategory>,
}

fn outcome_json(outcome: &ExecutionOutcome) -> Result<Value, ApiError> {
    let context = serde_json::to_value(&outcome.context).map_err(FlowError::from)?;
    Ok(json!({
        "executionId": outcome.context.execution_id,
        "status": outcome.graph.status,
        "durationMs": outcome.context.duration_ms(),
        "workflow": WorkflowDocument::export(&outcome.graph),
        "context": context,
    }))
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "reconflow"
    }))
}

/// List all workflows
#[get("/api/workflows")]
async fn list_workflows(data: web::Data<AppState>) -> impl Responder {
    let workflows: Vec<_> = data
        .runtime
        .list_workflows()
        .await
        .iter()
        .map(|w| {
            json!({
                "id": w.id,
                "name": w.name,
                "status": w.status,
                "nodes": w.nodes.len(),
                "connections": w.connections.len(),
            })
        })
        .collect();

    HttpResponse::Ok().json(workflows)
}

/// Import a workflow document
#[post("/api/workflows")]
async fn create_workflow(
    data: web::Data<AppState>,
    document: web::Json<WorkflowDocument>,
) -> Result<HttpResponse, ApiError> {
    let graph = document.into_inner().into_graph()?;
    GraphResolver::new().check_cycles(&graph)?;

    info!("Creating workflow: {} ({})", graph.name, graph.id);
    let id = graph.id.clone();
    data.runtime.register_workflow(graph).await;

    Ok(HttpResponse::Created().json(json!({
        "id": id,
        "message": "Workflow created successfully",
    })))
}

/// Export a workflow document
#[get("/api/workflows/{id}")]
async fn get_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let document = data.document(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(document))
}

/// Delete a workflow
#[delete("/api/workflows/{id}")]
async fn delete_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let workflow_id = path.into_inner();
    let _guard = data.edits.lock().await;
    data.runtime
        .remove_workflow(&workflow_id)
        .await
        .ok_or_else(|| WorkflowError::NotFound(workflow_id.clone()))?;

    info!("Deleted workflow: {}", workflow_id);
    Ok(HttpResponse::Ok().json(json!({
        "message": "Workflow deleted successfully"
    })))
}

#[post("/api/workflows/{id}/nodes")]
async fn add_node(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<AddNodeRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    let node_id = req.id.unwrap_or_else(|| {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}_{}", req.node_type, &suffix[..8])
    });

    let mut node = WorkflowNode::new(node_id, req.node_type);
    node.config = req.config;
    if let Some(title) = req.title {
        node.title = title;
    }
    if let Some(position) = req.position {
        node.position = position;
    }

    let node = data
        .edit(&path.into_inner(), |session| {
            let id = session.add_node(node)?;
            session
                .graph()
                .find_node(&id)
                .cloned()
                .ok_or(WorkflowError::NodeNotFound(id))
        })
        .await?;

    Ok(HttpResponse::Created().json(node))
}

#[delete("/api/workflows/{id}/nodes/{node_id}")]
async fn remove_node(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (workflow_id, node_id) = path.into_inner();
    let node = data
        .edit(&workflow_id, |session| session.remove_node(&node_id))
        .await?;
    Ok(HttpResponse::Ok().json(node))
}

#[patch("/api/workflows/{id}/nodes/{node_id}/config")]
async fn update_node_config(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    patch: web::Json<Map<String, Value>>,
) -> Result<HttpResponse, ApiError> {
    let (workflow_id, node_id) = path.into_inner();
    let validation = data
        .edit(&workflow_id, |session| {
            session.update_node_config(&node_id, patch.into_inner())
        })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "valid": validation.is_valid(),
        "violations": validation.violations,
    })))
}

#[post("/api/workflows/{id}/connections")]
async fn add_connection(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ConnectRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    let mut connection = Connection::new(req.source, req.target);
    connection.source_handle = req.source_handle;
    connection.target_handle = req.target_handle;

    let connection = data
        .edit(&path.into_inner(), |session| {
            session.add_connection(connection).cloned()
        })
        .await?;

    Ok(HttpResponse::Created().json(connection))
}

#[delete("/api/workflows/{id}/connections/{connection_id}")]
async fn remove_connection(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (workflow_id, connection_id) = path.into_inner();
    let connection = data
        .edit(&workflow_id, |session| session.remove_connection(&connection_id))
        .await?;
    Ok(HttpResponse::Ok().json(connection))
}

/// Execution phases and graph statistics
#[get("/api/workflows/{id}/plan")]
async fn plan_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let workflow_id = path.into_inner();
    let graph = data
        .runtime
        .get_workflow(&workflow_id)
        .await
        .ok_or_else(|| WorkflowError::NotFound(workflow_id.clone()))?;

    let session = data.runtime.session(graph);
    Ok(HttpResponse::Ok().json(json!({
        "phases": session.plan()?,
        "stats": session.stats()?,
    })))
}

/// Execute a workflow; with `?background=true` the run is detached
#[post("/api/workflows/{id}/execute")]
async fn execute_workflow(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ExecuteQuery>,
    req: Option<web::Json<ExecuteRequest>>,
) -> Result<HttpResponse, ApiError> {
    let workflow_id = path.into_inner();
    let variables = req.map(|r| r.into_inner().variables).unwrap_or_default();

    info!("Executing workflow: {}", workflow_id);

    if query.background {
        let graph = data
            .runtime
            .get_workflow(&workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.clone()))?;
        let handle = data.runtime.spawn(graph, variables, None);
        let execution_id = handle.execution_id;
        data.runs.write().await.insert(execution_id, handle);

        return Ok(HttpResponse::Accepted().json(json!({
            "executionId": execution_id,
            "status": "running",
        })));
    }

    match data.runtime.execute_workflow(&workflow_id, variables).await {
        Ok(outcome) => {
            info!(
                "Workflow {} finished with status {:?}",
                workflow_id, outcome.graph.status
            );
            Ok(HttpResponse::Ok().json(outcome_json(&outcome)?))
        }
        Err(e) => {
            error!("Workflow {} execution failed: {}", workflow_id, e);
            Err(e.into())
        }
    }
}

/// Status of a background run; the outcome once it has finished
#[get("/api/executions/{execution_id}")]
async fn get_execution(
    data: web::Data<AppState>,
    path: web::Path<ExecutionId>,
) -> Result<HttpResponse, ApiError> {
    let execution_id = path.into_inner();

    {
        let runs = data.runs.read().await;
        let handle = runs
            .get(&execution_id)
            .ok_or(ApiError::ExecutionNotFound(execution_id))?;
        if !handle.is_finished() {
            return Ok(HttpResponse::Ok().json(json!({
                "executionId": execution_id,
                "status": handle.status(),
                "finished": false,
            })));
        }
    }

    let handle = data
        .runs
        .write()
        .await
        .remove(&execution_id)
        .ok_or(ApiError::ExecutionNotFound(execution_id))?;
    let outcome = handle.join().await?;
    data.runtime.register_workflow(outcome.graph.clone()).await;

    let mut body = outcome_json(&outcome)?;
    body["finished"] = json!(true);
    Ok(HttpResponse::Ok().json(body))
}

/// Pause, resume or cancel a background run
#[post("/api/executions/{execution_id}/{action}")]
async fn control_execution(
    data: web::Data<AppState>,
    path: web::Path<(ExecutionId, String)>,
) -> Result<HttpResponse, ApiError> {
    let (execution_id, action) = path.into_inner();
    let runs = data.runs.read().await;
    let handle = runs
        .get(&execution_id)
        .ok_or(ApiError::ExecutionNotFound(execution_id))?;

    match action.as_str() {
        "pause" => handle.pause(),
        "resume" => handle.resume(),
        "cancel" => handle.cancel(),
        _ => return Err(ApiError::UnknownAction(action)),
    }

    info!("Execution {}: {}", execution_id, action);
    Ok(HttpResponse::Ok().json(json!({
        "executionId": execution_id,
        "status": handle.status(),
    })))
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    query: web::Query<EventsQuery>,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let only = query.execution;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("WebSocket client lagged, {} events dropped", skipped);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if only.is_some_and(|id| id != event.execution_id()) {
                        continue;
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        if session.text(json).await.is_err() {
                            break;
                        }
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}

/// List node definitions, optionally for one category
#[get("/api/nodes")]
async fn list_node_types(
    data: web::Data<AppState>,
    query: web::Query<NodesQuery>,
) -> impl Responder {
    let registry = data.runtime.registry();
    let definitions = match query.category {
        Some(category) => registry.definitions_by_category(category),
        None => registry.all_definitions(),
    };
    HttpResponse::Ok().json(definitions)
}

#[get("/api/nodes/{node_type}")]
async fn get_node_type(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let node_type = path.into_inner();
    let definition = data
        .runtime
        .registry()
        .get_definition(&node_type)
        .ok_or(WorkflowError::UnknownNodeType(node_type))?;
    Ok(HttpResponse::Ok().json(definition))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(list_workflows)
        .service(create_workflow)
        .service(get_workflow)
        .service(delete_workflow)
        .service(add_node)
        .service(remove_node)
        .service(update_node_config)
        .service(add_connection)
        .service(remove_connection)
        .service(plan_workflow)
        .service(execute_workflow)
        .service(get_execution)
        .service(control_execution)
        .service(websocket_events)
        .service(list_node_types)
        .service(get_node_type);
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 Starting reconflow server");

    let runtime = FlowRuntime::with_registry(reconnodes::builtin_registry(), RuntimeConfig::default());
    info!(
        "✅ Runtime initialized with {} node types",
        runtime.registry().list_node_types().len()
    );

    let app_state = web::Data::new(AppState::new(runtime));

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

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
            .configure(routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState::new(FlowRuntime::with_registry(
            reconnodes::builtin_registry(),
            RuntimeConfig::default(),
        )))
    }

    fn document(id: &str) -> Value {
        json!({
            "id": id,
            "name": "Recon",
            "nodes": [
                {"id": "enum", "type": "subfinder", "config": {"domain": "example.com"}},
                {"id": "gate", "type": "conditional", "config": {"condition": "count > 0"}},
            ],
            "connections": [{"source": "enum", "target": "gate"}],
        })
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(routes)).await
        };
    }

    #[actix_web::test]
    async fn test_create_and_export_workflow() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(document("wf-1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/api/workflows/wf-1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["version"], "1.0");
        assert_eq!(body["metadata"]["nodeCount"], 2);

        let req = test::TestRequest::get().uri("/api/workflows/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_editing_rejects_cycles() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(document("wf-2"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/wf-2/nodes")
            .set_json(json!({"id": "scan", "type": "nuclei"}))
            .to_request();
        let node: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(node["category"], "analysis");
        assert_eq!(node["config"]["rate_limit"], 150);

        let req = test::TestRequest::post()
            .uri("/api/workflows/wf-2/connections")
            .set_json(json!({"source": "gate", "target": "scan", "sourceHandle": "true"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/workflows/wf-2/connections")
            .set_json(json!({"source": "scan", "target": "enum"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/workflows/wf-2/nodes")
            .set_json(json!({"type": "portscan"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/workflows/wf-2/plan").to_request();
        let plan: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(plan["phases"], json!([["enum"], ["gate"], ["scan"]]));
        assert_eq!(plan["stats"]["max_parallelism"], 1);
    }

    #[actix_web::test]
    async fn test_config_patch_reports_violations() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(document("wf-3"))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::patch()
            .uri("/api/workflows/wf-3/nodes/enum/config")
            .set_json(json!({"threads": 500}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["valid"], false);
        assert_eq!(body["violations"][0]["field"], "threads");

        let req = test::TestRequest::patch()
            .uri("/api/workflows/wf-3/nodes/nope/config")
            .set_json(json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_execute_in_memory_workflow() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/workflows")
            .set_json(json!({
                "id": "wf-4",
                "name": "Static",
                "nodes": [{
                    "id": "loop",
                    "type": "iterator",
                    "config": {"source_type": "static", "static_items": "[1, 2, 3]"},
                }],
                "connections": [],
            }))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/workflows/wf-4/execute")
            .set_json(json!({"variables": {}}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(
            body["context"]["node_outputs"]["loop"]["data"]["totalItems"],
            3
        );
    }

    #[actix_web::test]
    async fn test_node_catalog() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/nodes?category=discovery")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let types: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|d| d["type"].as_str())
            .collect();
        assert!(types.contains(&"subfinder"));
        assert!(types.contains(&"amass"));

        let req = test::TestRequest::get().uri("/api/nodes/unknown").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
