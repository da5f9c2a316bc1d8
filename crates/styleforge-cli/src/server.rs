use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use styleforge_contracts::api::{CreateProjectRequest, GenerateRequest};
use styleforge_contracts::config::ForgeConfig;
use styleforge_contracts::events::EventWriter;
use styleforge_engine::handlers::{self, ApiResponse};
use styleforge_engine::pipeline::UploadFile;
use styleforge_engine::{ForgeError, StyleForge};
use tracing::info;

const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Per-process state. Each request builds its own engine from the shared
/// config, so nothing mutable is shared between requests.
#[derive(Clone)]
struct AppState {
    config: Arc<ForgeConfig>,
    events: Option<EventWriter>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    #[serde(default)]
    skip_caption: bool,
}

pub fn serve(bind: SocketAddr, config: ForgeConfig, events: Option<EventWriter>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let state = AppState {
        config: Arc::new(config),
        events,
    };
    runtime.block_on(run_server(bind, state))
}

async fn run_server(bind: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "styleforge listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server stopped with an error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", get(project_detail))
        .route("/api/projects/:id/upload", post(upload))
        .route("/api/projects/:id/caption", post(caption))
        .route("/api/projects/:id/train", post(train))
        .route("/api/projects/:id/training-status", get(training_status))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .with_state(state)
}

fn to_response(response: ApiResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

fn rejected(operation: &str, generic: &str, message: String) -> Response {
    to_response(ApiResponse::failure(
        operation,
        generic,
        ForgeError::InvalidRequest(message).into(),
    ))
}

/// Runs one engine call on the blocking pool; the engine's HTTP client is
/// blocking and must not live on an async worker.
async fn run_blocking<F>(
    state: AppState,
    operation: &'static str,
    generic: &'static str,
    call: F,
) -> Response
where
    F: FnOnce(&StyleForge) -> ApiResponse + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        match StyleForge::from_config(&state.config) {
            Ok(forge) => call(&forge.with_events(state.events)),
            Err(err) => ApiResponse::failure(operation, generic, err),
        }
    })
    .await;
    let response = joined.unwrap_or_else(|err| {
        ApiResponse::failure(operation, generic, anyhow!("request task failed: {err}"))
    });
    to_response(response)
}

async fn health() -> Json<Value> {
    Json(json!({"success": true, "status": "ok"}))
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return rejected("generate", handlers::GENERATE_FAILED, rejection.body_text())
        }
    };
    run_blocking(state, "generate", handlers::GENERATE_FAILED, move |forge| {
        handlers::generate(forge, &request)
    })
    .await
}

async fn list_projects(State(state): State<AppState>) -> Response {
    run_blocking(
        state,
        "list_projects",
        handlers::LIST_PROJECTS_FAILED,
        handlers::list_projects,
    )
    .await
}

async fn create_project(
    State(state): State<AppState>,
    body: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return rejected(
                "create_project",
                handlers::CREATE_PROJECT_FAILED,
                rejection.body_text(),
            )
        }
    };
    run_blocking(
        state,
        "create_project",
        handlers::CREATE_PROJECT_FAILED,
        move |forge| handlers::create_project(forge, &request),
    )
    .await
}

async fn project_detail(State(state): State<AppState>, Path(project_id): Path<String>) -> Response {
    run_blocking(
        state,
        "project_detail",
        handlers::PROJECT_DETAIL_FAILED,
        move |forge| handlers::project_detail(forge, &project_id),
    )
    .await
}

async fn upload(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Response {
    let mut files = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return rejected("upload", handlers::UPLOAD_FAILED, err.body_text()),
        };
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        match field.bytes().await {
            Ok(bytes) => files.push(UploadFile {
                filename,
                bytes: bytes.to_vec(),
            }),
            Err(err) => return rejected("upload", handlers::UPLOAD_FAILED, err.body_text()),
        }
    }
    run_blocking(state, "upload", handlers::UPLOAD_FAILED, move |forge| {
        handlers::upload(forge, &project_id, &files, !params.skip_caption)
    })
    .await
}

async fn caption(State(state): State<AppState>, Path(project_id): Path<String>) -> Response {
    run_blocking(state, "caption", handlers::CAPTION_FAILED, move |forge| {
        handlers::caption(forge, &project_id)
    })
    .await
}

async fn train(State(state): State<AppState>, Path(project_id): Path<String>) -> Response {
    run_blocking(state, "train", handlers::TRAIN_FAILED, move |forge| {
        handlers::submit_training(forge, &project_id)
    })
    .await
}

async fn training_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Response {
    run_blocking(
        state,
        "training_status",
        handlers::TRAIN_STATUS_FAILED,
        move |forge| handlers::training_status(forge, &project_id),
    )
    .await
}
