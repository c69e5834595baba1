//! HTTP server for mdexec
//!
//! One stateless endpoint runs a submission through the sandbox service;
//! the response shape is what the document viewer expects.

use anyhow::Result;
use axum::{
    Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::sandbox::{ExecutionOutcome, SandboxError, SandboxService, timeout_message};

const MISSING_CODE: &str = "Code is required and must be a string";
const INTERNAL_FAILURE: &str = "Failed to process request";

pub struct Server {
    config: Config,
}

pub(crate) struct AppState {
    sandbox: SandboxService,
}

impl Server {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let service = SandboxService::new(self.config.execution_policy());
        info!(
            "Sandbox: interpreter={}, scratch={}, deadline={:?}",
            service.policy().interpreter,
            service.policy().scratch_dir.display(),
            service.policy().deadlines.outer()
        );

        let state = Arc::new(AppState { sandbox: service });
        let app = router(state, self.config.server.max_body_bytes);

        let addr: SocketAddr =
            format!("{}:{}", self.config.server.bind, self.config.server.port).parse()?;

        info!("Starting HTTP server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down HTTP server");
            })
            .await?;

        Ok(())
    }
}

pub(crate) fn router(state: Arc<AppState>, body_limit: usize) -> Router {
    // The document viewer is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(status))
        .route("/api/execute-python", post(execute_python))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// Error response type
#[derive(Debug)]
struct AppError(StatusCode, ErrorBody);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    timed_out: Option<bool>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self(
            status,
            ErrorBody {
                error: message.into(),
                timed_out: None,
            },
        )
    }

    fn timed_out(message: &str) -> Self {
        Self(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorBody {
                error: message.to_string(),
                timed_out: Some(true),
            },
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

impl From<SandboxError> for AppError {
    fn from(e: SandboxError) -> Self {
        match e {
            busy @ SandboxError::Busy { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, busy.to_string())
            }
            // Paths and OS errors stay in the log
            other => {
                error!("Execution failed: {}", other);
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_FAILURE)
            }
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    interpreter: String,
    watchdog_secs: u64,
    timeout_secs: u64,
    max_code_chars: usize,
    rewrite: bool,
    max_concurrent: usize,
    in_flight: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let policy = state.sandbox.policy();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        interpreter: policy.interpreter.clone(),
        watchdog_secs: policy.deadlines.watchdog().as_secs(),
        timeout_secs: policy.deadlines.outer().as_secs(),
        max_code_chars: policy.max_code_chars,
        rewrite: policy.rewrite,
        max_concurrent: policy.max_concurrent,
        in_flight: state.sandbox.in_flight(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    output: String,
    was_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn execute_python(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, AppError> {
    let Json(body) = payload.map_err(|rejection| {
        debug!("Rejected request body: {}", rejection.body_text());
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, rejection.body_text())
            }
            _ => AppError::new(StatusCode::BAD_REQUEST, rejection.body_text()),
        }
    })?;

    let code = body
        .get("code")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, MISSING_CODE))?;

    let execution = state.sandbox.execute(code).await?;

    match execution.outcome {
        ExecutionOutcome::Success(result) => Ok(Json(ExecuteResponse {
            output: result.combined_output(),
            was_modified: execution.modified,
            message: execution.note,
        })),
        ExecutionOutcome::TimedOut => Err(AppError::timed_out(timeout_message(&execution.hazards))),
        ExecutionOutcome::RuntimeError(message) => {
            Err(AppError::new(StatusCode::INTERNAL_SERVER_ERROR, message))
        }
        ExecutionOutcome::ValidationError(message) => {
            Err(AppError::new(StatusCode::BAD_REQUEST, message))
        }
    }
}
