use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use code_exec::{ExecutionOutcome, ExecutionResult};
use code_exec_rpc::JobProducer;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Message returned for failures that are not the caller's fault
pub const GENERIC_ERROR: &str = "Something Went Wrong";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Rpc(#[from] code_exec_rpc::Error),
    #[error("Listener error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Rpc(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.to_string()),
            ServerError::Rpc(e @ code_exec_rpc::Error::ReplyTimeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, e.to_string())
            }
            _ => {
                error!("Submission failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    GENERIC_ERROR.to_string(),
                )
            }
        };

        (status, Json(json!({ "err": message }))).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Submission {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmissionRequest {
    pub submission: Submission,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub result: String,
    pub success: bool,
    pub outcome: ExecutionOutcome,
}

impl From<ExecutionResult> for SubmissionResponse {
    fn from(result: ExecutionResult) -> Self {
        Self {
            success: result.is_success(),
            result: result.output,
            outcome: result.outcome,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    producer: Arc<JobProducer>,
}

pub fn create_app(producer: JobProducer) -> Router {
    let state = AppState {
        producer: Arc::new(producer),
    };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/submissions", post(submit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` so that several worker processes can accept on it at once.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

pub async fn run_server(app: Router, listener: TcpListener) -> Result<(), ServerError> {
    info!("Accepting submissions on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn submit(
    State(state): State<AppState>,
    Json(payload): Json<SubmissionRequest>,
) -> Result<Json<SubmissionResponse>, ServerError> {
    let Submission { code, language } = payload.submission;
    let result = state.producer.submit(&code, &language).await?;
    Ok(Json(result.into()))
}
