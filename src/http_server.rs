//! HTTP server implementation using Axum.

use std::net::SocketAddr;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, Request, State,
    },
    http::{header, HeaderName, Method, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bootstrap::Bootstrap;
use crate::error::{GatewayError, Result};
use crate::exec::ExecutionBridge;
use crate::files::FileService;
use crate::path_guard::PathGuard;
use crate::sandbox::ExecutionResult;
use crate::state::{AppState, Instance, SANDBOX_ID_HEADER};
use crate::storage::{StorageAction, StorageManager};
use crate::zellij::{ZellijAction, ZellijManager};

const GET: &[&str] = &["GET"];
const POST: &[&str] = &["POST"];
const FILE_METHODS: &[&str] = &["GET", "POST", "DELETE"];

/// Every route with the methods it accepts, as reported by `/health`.
pub const ENDPOINTS: &[(&str, &[&str])] = &[
    ("/health", GET),
    ("/status", GET),
    ("/setup", POST),
    ("/exec", POST),
    ("/files", GET),
    ("/file", FILE_METHODS),
    ("/zellij", POST),
    ("/storage", POST),
];

// Request/Response types
#[derive(Deserialize)]
struct ExecRequest {
    command: Option<String>,
    cwd: Option<String>,
}

#[derive(Serialize)]
struct ExecResponse {
    success: bool,
    #[serde(flatten)]
    result: ExecutionResult,
}

#[derive(Deserialize)]
struct FilesQuery {
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

#[derive(Deserialize)]
struct FileQuery {
    path: Option<String>,
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct WriteFileRequest {
    path: Option<String>,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Serialize)]
struct FileContent {
    path: String,
    content: String,
    encoding: &'static str,
    success: bool,
}

#[derive(Serialize)]
struct FileWritten {
    success: bool,
    path: String,
    bytes: usize,
}

#[derive(Deserialize)]
struct ZellijRequest {
    action: Option<String>,
    session: Option<String>,
    layout: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorageRequest {
    action: Option<String>,
    bucket: Option<String>,
    mount_path: Option<String>,
    #[serde(default)]
    read_only: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Base64,
}

impl Encoding {
    fn parse(encoding: Option<&str>) -> Result<Self> {
        match encoding {
            None | Some("utf-8") | Some("utf8") => Ok(Encoding::Utf8),
            Some("base64") => Ok(Encoding::Base64),
            Some(other) => Err(GatewayError::validation(format!("Unsupported encoding: {}", other))
                .with_context("validEncodings", vec!["utf-8", "base64"])),
        }
    }
}

/// Build the application router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(SANDBOX_ID_HEADER)]);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %uuid::Uuid::new_v4(),
        )
    });

    Router::new()
        // Introspection
        .route("/health", get(health).fallback(|m: Method| not_allowed(m, GET)))
        .route("/status", get(status).fallback(|m: Method| not_allowed(m, GET)))
        .route("/setup", post(setup).fallback(|m: Method| not_allowed(m, POST)))
        // Commands and files
        .route("/exec", post(exec).fallback(|m: Method| not_allowed(m, POST)))
        .route("/files", get(list_files).fallback(|m: Method| not_allowed(m, GET)))
        .route(
            "/file",
            get(read_file)
                .post(write_file)
                .delete(delete_file)
                .fallback(|m: Method| not_allowed(m, FILE_METHODS)),
        )
        // Services
        .route("/zellij", post(zellij).fallback(|m: Method| not_allowed(m, POST)))
        .route("/storage", post(storage).fallback(|m: Method| not_allowed(m, POST)))
        .fallback(not_found)
        // Answers every OPTIONS request itself, before routing or instance
        // resolution.
        .layer(cors)
        .layer(trace)
        .with_state(state)
}

/// Run the HTTP server on the configured port.
pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}

async fn not_allowed(method: Method, allowed: &'static [&'static str]) -> GatewayError {
    GatewayError::method_not_allowed(method.as_str(), allowed)
}

async fn not_found(uri: Uri) -> GatewayError {
    GatewayError::not_found(format!("Not found: {}", uri.path())).with_context("path", uri.path())
}

fn workspace_guard(state: &AppState) -> PathGuard {
    PathGuard::new(&state.config.workspace_root)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let endpoints: Vec<_> = ENDPOINTS
        .iter()
        .map(|(path, methods)| json!({ "path": path, "methods": methods }))
        .collect();
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.config.backend.as_str(),
        "workspaceRoot": state.config.workspace_root,
        "endpoints": endpoints,
    }))
}

async fn status(State(state): State<AppState>, Instance(sandbox): Instance) -> Result<Response> {
    let bootstrap = Bootstrap::new(
        ExecutionBridge::new(sandbox),
        state.config.workspace_root.clone(),
        state.config.service.clone(),
    );
    Ok(Json(bootstrap.status().await?).into_response())
}

async fn setup(State(state): State<AppState>, Instance(sandbox): Instance) -> Response {
    let bootstrap = Bootstrap::new(
        ExecutionBridge::new(sandbox),
        state.config.workspace_root.clone(),
        state.config.service.clone(),
    );
    Json(bootstrap.setup().await).into_response()
}

async fn exec(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    body: std::result::Result<Json<ExecRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let command = req
        .command
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| GatewayError::validation("Missing required field: command"))?;
    let cwd = req
        .cwd
        .as_deref()
        .map(|cwd| workspace_guard(&state).check(cwd))
        .transpose()?;

    info!(sandbox = %sandbox.id(), cwd = ?cwd, "POST /exec");
    let result = ExecutionBridge::new(sandbox)
        .exec(&command, cwd.as_deref())
        .await?;
    info!(exit_code = result.exit_code, "POST /exec - finished");

    Ok(Json(ExecResponse {
        success: result.success(),
        result,
    })
    .into_response())
}

async fn list_files(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    query: std::result::Result<Query<FilesQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let files = FileService::new(ExecutionBridge::new(sandbox), workspace_guard(&state));
    let listing = files.list(query.path.as_deref(), query.recursive).await?;
    Ok(Json(listing).into_response())
}

async fn read_file(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    query: std::result::Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let path = required(query.path, "path")?;
    let requested = Encoding::parse(query.encoding.as_deref())?;

    let files = FileService::new(ExecutionBridge::new(sandbox), workspace_guard(&state));
    let (path, bytes) = files.read(&path).await?;

    // Content that is not valid UTF-8 falls back to base64.
    let (content, encoding) = match requested {
        Encoding::Base64 => (STANDARD.encode(&bytes), "base64"),
        Encoding::Utf8 => match String::from_utf8(bytes) {
            Ok(text) => (text, "utf-8"),
            Err(e) => (STANDARD.encode(e.as_bytes()), "base64"),
        },
    };
    Ok(Json(FileContent {
        path,
        content,
        encoding,
        success: true,
    })
    .into_response())
}

async fn write_file(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    body: std::result::Result<Json<WriteFileRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let path = required(req.path, "path")?;
    let content = req
        .content
        .ok_or_else(|| GatewayError::validation("Missing required field: content"))?;
    let bytes = match Encoding::parse(req.encoding.as_deref())? {
        Encoding::Utf8 => content.into_bytes(),
        Encoding::Base64 => STANDARD.decode(content.trim()).map_err(|e| {
            GatewayError::validation(format!("Invalid base64 content: {}", e))
        })?,
    };

    let files = FileService::new(ExecutionBridge::new(sandbox), workspace_guard(&state));
    let path = files.write(&path, &bytes).await?;
    Ok(Json(FileWritten {
        success: true,
        path,
        bytes: bytes.len(),
    })
    .into_response())
}

async fn delete_file(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    query: std::result::Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let path = required(query.path, "path")?;
    let files = FileService::new(ExecutionBridge::new(sandbox), workspace_guard(&state));
    Ok(Json(files.delete(&path).await?).into_response())
}

async fn zellij(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    body: std::result::Result<Json<ZellijRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let action = ZellijAction::parse(req.action.as_deref())?;
    info!(action = action.as_str(), sandbox = %sandbox.id(), "POST /zellij");

    let manager = ZellijManager::new(ExecutionBridge::new(sandbox), state.config.service.clone());
    let response = match action {
        ZellijAction::Version => Json(manager.version().await?).into_response(),
        ZellijAction::ListSessions => Json(manager.list_sessions().await?).into_response(),
        ZellijAction::Layouts => Json(manager.layouts().await?).into_response(),
        ZellijAction::SetupLayout => {
            Json(manager.setup_layout(req.layout.as_deref()).await?).into_response()
        }
        ZellijAction::StartWeb => Json(manager.start_web().await).into_response(),
        ZellijAction::CreateToken => Json(manager.create_token().await?).into_response(),
        ZellijAction::WebStatus => Json(manager.web_status().await?).into_response(),
        ZellijAction::GetUrl => Json(manager.get_url().await?).into_response(),
        ZellijAction::KillSession => {
            Json(manager.kill_session(req.session.as_deref()).await?).into_response()
        }
    };
    Ok(response)
}

async fn storage(
    State(state): State<AppState>,
    Instance(sandbox): Instance,
    body: std::result::Result<Json<StorageRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = body?;
    let action = StorageAction::parse(req.action.as_deref())?;
    info!(action = action.as_str(), sandbox = %sandbox.id(), "POST /storage");

    let manager = StorageManager::new(
        ExecutionBridge::new(sandbox),
        state.config.credentials.clone(),
        &state.config.mount_root,
    );
    let bucket = req.bucket.as_deref();
    let mount_path = req.mount_path.as_deref();
    let response = match action {
        StorageAction::Mount => {
            Json(manager.mount(bucket, mount_path, req.read_only).await?).into_response()
        }
        StorageAction::Unmount => Json(manager.unmount(mount_path).await?).into_response(),
        StorageAction::Status => Json(manager.status(mount_path).await?).into_response(),
        StorageAction::List => Json(manager.list().await?).into_response(),
    };
    Ok(response)
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::validation(format!("Missing required field: {}", field)))
}
