//! REST API for the task scheduler
//!
//! This module provides the HTTP endpoints users call to enroll and delete
//! recurring tasks. Every `/tasks` route goes through the API-key middleware,
//! which resolves the key to a user id and attaches it to the request.
// This module uses the `axum` web framework. Each public endpoint is a
// handler function returning `Result<_, ApiError>`; the `ApiError` enum
// carries the status code and the `{"error": ...}` body.

use axum::{
    extract::{DefaultBodyLimit, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use shared::{
    api::{endpoints, headers, CreateTaskRequest, CreateTaskResponse, DeleteTaskResponse},
    config::SchedulerConfig,
    task::{mint_task_id, task_is_owned_by, Task, SUPPORTED_METHODS},
    utils::{parse_start_from, validate_url},
};

use crate::database::{QuotaSlot, TaskStore};
use crate::scheduler::Scheduler;

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<SchedulerConfig>,
    /// Durable store for tasks, users, and API keys
    pub store: Arc<Mutex<TaskStore>>,
    /// Handle to the queue, wake channel, and tombstone set
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<Mutex<TaskStore>>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            scheduler,
        }
    }
}

/// The user id resolved from the API key, attached to the request by the
/// auth middleware.
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

/// Creates the main API router and defines all the application's routes.
/// This function is called once at server startup to build the routing tree.
pub fn create_router(state: AppState) -> Router {
    // Task bodies are small JSON objects; anything near this limit is abuse.
    const MAX_REQUEST_SIZE: usize = 1024 * 1024;

    let protected = Router::new()
        .route(endpoints::TASKS, post(create_task))
        .route(endpoints::TASK_BY_ID, delete(delete_task))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        // Unauthenticated health check for load balancers and orchestrators.
        .route(endpoints::HEALTH, get(health_check))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

/// Middleware resolving the `X-API-KEY` header to a user id.
async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get(headers::API_KEY)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();

    if api_key.is_empty() {
        warn!("Missing API key header");
        return Err(ApiError::Unauthorized("API key required".to_string()));
    }

    let resolved = {
        let mut store = state.store.lock().await;
        store.resolve_api_key(&api_key).await
    };

    match resolved {
        Ok(Some(user_id)) => {
            request.extensions_mut().insert(AuthedUser(user_id));
            Ok(next.run(request).await)
        }
        Ok(None) => {
            warn!("Unknown API key");
            Err(ApiError::Unauthorized("Invalid API key".to_string()))
        }
        Err(e) => {
            error!(error = %e, "API key lookup failed");
            Err(ApiError::Database("Failed to resolve API key".to_string()))
        }
    }
}

/// The handler for the `/health` endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "job-scheduler",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// The handler for task enrollment: POST /tasks.
///
/// Validates the input, claims a quota slot (which also mints the task id),
/// persists the record, and seeds the first firing.
async fn create_task(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    let missing = request.missing_fields();
    let (Some(api_method), Some(api_url), Some(start_from), Some(frequency), Some(api_body)) = (
        request.api_method,
        request.api_url,
        request.start_from,
        request.frequency,
        request.api_body,
    ) else {
        return Err(ApiError::BadRequest(format!(
            "{} are required fields",
            missing.join(", ")
        )));
    };

    if !SUPPORTED_METHODS.contains(&api_method.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported apiMethod '{}'; supported methods: {}",
            api_method,
            SUPPORTED_METHODS.join(", ")
        )));
    }

    if frequency == 0 {
        return Err(ApiError::BadRequest(
            "frequency must be a positive number of seconds".to_string(),
        ));
    }

    let first_fire =
        parse_start_from(&start_from).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    validate_url(&api_url).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    // Quota check and counter bump are one atomic operation in the store.
    let slot = {
        let mut store = state.store.lock().await;
        store.allocate_task_slot(&user_id).await
    };
    let job_count = match slot {
        Ok(QuotaSlot::Allocated { job_count }) => job_count,
        Ok(QuotaSlot::QuotaExceeded { job_limit }) => {
            info!(user_id = %user_id, job_limit, "Rejected enrollment over quota");
            return Err(ApiError::QuotaExceeded { limit: job_limit });
        }
        Ok(QuotaSlot::UnknownUser) => {
            error!(user_id = %user_id, "User record missing for authenticated user");
            return Err(ApiError::Internal("User record not found".to_string()));
        }
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Quota allocation failed");
            return Err(ApiError::Database("Failed to check job quota".to_string()));
        }
    };

    let task_id = mint_task_id(&user_id, job_count);
    let task = Task::enroll(
        task_id.clone(),
        user_id.clone(),
        api_method,
        api_url,
        api_body,
        start_from,
        first_fire,
        frequency,
        request.time_out_after.unwrap_or(0),
    );

    let stored = {
        let mut store = state.store.lock().await;
        store.put_task(&task).await
    };
    if let Err(e) = stored {
        error!(task_id = %task_id, error = %e, "Failed to persist task");
        return Err(ApiError::Database("Failed to insert task".to_string()));
    }

    // Seed the first firing; this wakes the dispatcher if it is asleep.
    state
        .scheduler
        .enqueue(task_id.clone(), first_fire.timestamp())
        .await;

    info!(
        task_id = %task_id,
        user_id = %user_id,
        fire_at = first_fire.timestamp(),
        frequency,
        "Task enrolled"
    );

    Ok(Json(CreateTaskResponse { task_id }))
}

/// The handler for task deletion: DELETE /tasks/{taskID}.
///
/// Already-queued firings stay in the heap; the tombstone makes the
/// executor skip them.
async fn delete_task(
    State(state): State<AppState>,
    Extension(AuthedUser(user_id)): Extension<AuthedUser>,
    Path(task_id): Path<String>,
) -> Result<Json<DeleteTaskResponse>, ApiError> {
    if task_id.is_empty() {
        return Err(ApiError::BadRequest("Task ID is required".to_string()));
    }

    if !task_is_owned_by(&task_id, &user_id) {
        warn!(task_id = %task_id, user_id = %user_id, "Rejected delete of foreign task");
        return Err(ApiError::Forbidden(
            "You do not have permission to delete this task".to_string(),
        ));
    }

    let deleted = {
        let mut store = state.store.lock().await;
        store.delete_task(&task_id).await
    };

    // Tombstone regardless of the store outcome so that a queued firing is
    // skipped even when the record was already gone.
    state.scheduler.mark_deleted(&task_id).await;

    if let Err(e) = deleted {
        error!(task_id = %task_id, error = %e, "Failed to delete task");
        return Err(ApiError::Database("Failed to delete the task".to_string()));
    }

    info!(task_id = %task_id, user_id = %user_id, "Task deleted");

    Ok(Json(DeleteTaskResponse {
        message: "Task deleted successfully".to_string(),
    }))
}

/// Custom error types for the API.
/// Using a dedicated enum for API errors allows for consistent error
/// handling and response formatting.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("Maximum job limit ({limit}) has been reached")]
    QuotaExceeded { limit: i64 },
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Database(String),
}

/// Converts an `ApiError` into an HTTP response with an `{"error": ...}`
/// body. `axum` calls this automatically when a handler returns `Err`.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) | ApiError::QuotaExceeded { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
