//! HTTP API for the grading pipeline.
//!
//! # Endpoints
//!
//! - `POST /api/analysis` - Grade a submission
//! - `POST /api/submissions/analyze` - Same operation, alternate path
//! - `GET /api/health` - Liveness probe
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! use rubric_grading::{ClientConfig, OpenAiCompatClient};
//! use rubric_pipeline::{create_router, AppState, Config, MemoryStore, Pipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let client = OpenAiCompatClient::new(config.grading.client_config())?;
//! let pipeline = Pipeline::new(&config, Arc::new(MemoryStore::new()), Arc::new(client))?;
//!
//! let router = create_router(AppState::new(pipeline));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rubric_grading::AnalysisResult;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::auth::bearer_token;
use crate::error::RubricError;
use crate::pipeline::{GradingRequest, Pipeline};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the analysis endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Submission to grade.
    pub submission_id: String,
}

/// Response body for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The grading pipeline.
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Wraps a pipeline for sharing across handlers.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

impl IntoResponse for RubricError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_rejection() {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        } else {
            error!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = Json(ErrorResponse {
            error: self.public_message().to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// The client key used for rate limiting is read from the connection, so
/// serve the router with `into_make_service_with_connect_info::<SocketAddr>()`.
/// Without connection info, forwarding headers are used and unknown
/// clients share one window.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/analysis", post(handle_analyze))
        .route("/submissions/analyze", post(handle_analyze))
        .route("/health", get(handle_health));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

/// Client network identity: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the peer address.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/analysis` and `POST /api/submissions/analyze`.
async fn handle_analyze(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisResult>, RubricError> {
    let request = GradingRequest {
        token: bearer_token(&headers),
        client_key: client_key(&headers, peer.map(|ConnectInfo(addr)| addr)),
        submission_id: body.submission_id,
    };

    let outcome = state.pipeline.analyze(&request).await?;
    info!(
        submission_id = %request.submission_id,
        cached = outcome.cached,
        overall_score = outcome.result.overall_score(),
        remaining_credits = outcome.remaining_credits,
        "analysis served"
    );
    Ok(Json(outcome.result))
}

/// Handler for `GET /api/health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
