//! Route handlers for the rate limit and configuration APIs.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::QuotaSpec;
use crate::error::TurnstileError;
use crate::ratelimit::{GlobalLimits, Quota, RateLimiter, RejectReason, Verdict};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check_and_consume", post(check_and_consume))
        .route("/status/:tenant_id/:client_id/:action_type", get(status))
        .route("/health", get(health))
        .route("/config", get(get_config))
        .route("/config/global", get(get_global).put(put_global))
        .route("/config/tenants/:tenant_id", get(get_tenant))
        .route(
            "/config/tenants/:tenant_id/actions/:action_type",
            put(put_action_limit).delete(delete_action_limit),
        )
        .route(
            "/config/tenants/:tenant_id/clients/:client_id/actions/:action_type",
            put(put_client_limit).delete(delete_client_limit),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error payload returned for all failed requests.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Wrapper translating engine errors into HTTP responses.
struct ApiError(TurnstileError);

impl From<TurnstileError> for ApiError {
    fn from(err: TurnstileError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            TurnstileError::InvalidInput(_)
            | TurnstileError::NoQuota
            | TurnstileError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            TurnstileError::Io(_) | TurnstileError::Internal(_) => {
                warn!(error = %self.0, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            code,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Combine optional quota hints into a fallback quota.
///
/// Hints must be supplied together; a lone field is an input error.
fn quota_hint(
    max_requests: Option<u32>,
    window_duration_seconds: Option<f64>,
) -> Result<Option<Quota>, TurnstileError> {
    match (max_requests, window_duration_seconds) {
        (None, None) => Ok(None),
        (Some(max), Some(window)) => Quota::new(max, window)
            .map(Some)
            .map_err(|e| TurnstileError::InvalidInput(e.to_string())),
        _ => Err(TurnstileError::InvalidInput(
            "max_requests and window_duration_seconds must be provided together".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    tenant_id: String,
    client_id: String,
    action_type: String,
    #[serde(default)]
    max_requests: Option<u32>,
    #[serde(default)]
    window_duration_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    remaining_requests: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_time_seconds: Option<f64>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

fn verdict_response(verdict: Verdict) -> Response {
    match verdict {
        Verdict::Processed {
            allowed,
            remaining,
            reset_at,
        } => {
            let code = if allowed {
                StatusCode::OK
            } else {
                StatusCode::TOO_MANY_REQUESTS
            };
            (
                code,
                Json(CheckResponse {
                    allowed,
                    remaining_requests: remaining,
                    reset_time_seconds: Some(reset_at),
                    status: verdict.status_label(),
                    reason: None,
                }),
            )
                .into_response()
        }
        Verdict::Queued => (
            StatusCode::ACCEPTED,
            Json(CheckResponse {
                allowed: false,
                remaining_requests: 0,
                reset_time_seconds: None,
                status: verdict.status_label(),
                reason: None,
            }),
        )
            .into_response(),
        Verdict::Rejected { reason } => {
            let code = match reason {
                RejectReason::QueueFull => StatusCode::TOO_MANY_REQUESTS,
                RejectReason::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                RejectReason::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                code,
                Json(CheckResponse {
                    allowed: false,
                    remaining_requests: 0,
                    reset_time_seconds: None,
                    status: verdict.status_label(),
                    reason: Some(reason.as_str()),
                }),
            )
                .into_response()
        }
    }
}

/// Main rate limiting endpoint.
///
/// Callers that end up queued receive their final verdict in this
/// response once the dispatcher schedules them.
async fn check_and_consume(
    State(state): State<AppState>,
    Json(body): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    let fallback = quota_hint(body.max_requests, body.window_duration_seconds)?;

    debug!(
        tenant = %body.tenant_id,
        client = %body.client_id,
        action = %body.action_type,
        "Processing rate limit request"
    );

    let verdict = state
        .limiter
        .check_and_consume(&body.tenant_id, &body.client_id, &body.action_type, fallback)
        .await?;

    Ok(verdict_response(verdict))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    #[serde(default)]
    max_requests: Option<u32>,
    #[serde(default)]
    window_duration_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
struct QueueStatus {
    queue_length: usize,
    max_queue_size: usize,
    global_in_flight: usize,
    max_global_concurrent: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    remaining_requests: u32,
    reset_time_seconds: f64,
    current_usage: u32,
    queue: QueueStatus,
}

/// Read-only rate and queue status for one key.
async fn status(
    State(state): State<AppState>,
    Path((tenant_id, client_id, action_type)): Path<(String, String, String)>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let fallback = quota_hint(query.max_requests, query.window_duration_seconds)?;
    let rate = state
        .limiter
        .status(&tenant_id, &client_id, &action_type, fallback)?;

    let limits = state.limiter.store().global_limits();
    Ok(Json(StatusResponse {
        remaining_requests: rate.remaining,
        reset_time_seconds: rate.reset_at,
        current_usage: rate.current_usage,
        queue: QueueStatus {
            queue_length: state.limiter.load().queue_depth(&tenant_id),
            max_queue_size: limits.max_tenant_queue_size,
            global_in_flight: state.limiter.load().in_flight(),
            max_global_concurrent: limits.max_global_concurrent,
        },
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    dispatcher_running: bool,
    global_in_flight: usize,
}

/// Liveness probe.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let running = !state.limiter.load().is_shutting_down();
    Json(HealthResponse {
        status: if running { "healthy" } else { "shutting_down" },
        service: "turnstile",
        dispatcher_running: running,
        global_in_flight: state.limiter.load().in_flight(),
    })
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Full configuration snapshot.
async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.limiter.store().snapshot())
}

async fn get_global(State(state): State<AppState>) -> Json<GlobalLimits> {
    Json(state.limiter.store().global_limits())
}

async fn put_global(
    State(state): State<AppState>,
    Json(body): Json<GlobalLimits>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.limiter.store().set_global(body)?;
    Ok(Json(MessageResponse {
        message: "Global configuration updated",
    }))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    Json(state.limiter.store().tenant_snapshot(&tenant_id))
}

fn quota_from_spec(spec: QuotaSpec) -> Result<Quota, TurnstileError> {
    Quota::new(spec.max_requests, spec.window_duration_seconds)
        .map_err(|e| TurnstileError::InvalidConfig(e.to_string()))
}

async fn put_action_limit(
    State(state): State<AppState>,
    Path((tenant_id, action_type)): Path<(String, String)>,
    Json(body): Json<QuotaSpec>,
) -> Result<Json<MessageResponse>, ApiError> {
    let quota = quota_from_spec(body)?;
    state
        .limiter
        .store()
        .set_action_limit(&tenant_id, &action_type, quota);
    Ok(Json(MessageResponse {
        message: "Action limit updated",
    }))
}

async fn delete_action_limit(
    State(state): State<AppState>,
    Path((tenant_id, action_type)): Path<(String, String)>,
) -> Json<MessageResponse> {
    state
        .limiter
        .store()
        .remove_action_limit(&tenant_id, &action_type);
    Json(MessageResponse {
        message: "Action limit removed",
    })
}

async fn put_client_limit(
    State(state): State<AppState>,
    Path((tenant_id, client_id, action_type)): Path<(String, String, String)>,
    Json(body): Json<QuotaSpec>,
) -> Result<Json<MessageResponse>, ApiError> {
    let quota = quota_from_spec(body)?;
    state
        .limiter
        .store()
        .set_client_limit(&tenant_id, &client_id, &action_type, quota);
    Ok(Json(MessageResponse {
        message: "Client limit updated",
    }))
}

async fn delete_client_limit(
    State(state): State<AppState>,
    Path((tenant_id, client_id, action_type)): Path<(String, String, String)>,
) -> Json<MessageResponse> {
    state
        .limiter
        .store()
        .remove_client_limit(&tenant_id, &client_id, &action_type);
    Json(MessageResponse {
        message: "Client limit removed",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ConfigStore, ManualClock};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let store = Arc::new(ConfigStore::new());
        let clock = Arc::new(ManualClock::new(0.0));
        let limiter = Arc::new(RateLimiter::with_clock(store, clock));
        router(AppState { limiter })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn put_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_check_and_consume_allows() {
        let app = test_router();
        let body = json!({
            "tenant_id": "t1",
            "client_id": "c1",
            "action_type": "login",
            "max_requests": 5,
            "window_duration_seconds": 60.0,
        });

        let (status, body) = send(app, post_json("/check_and_consume", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], json!(true));
        assert_eq!(body["remaining_requests"], json!(4));
        assert_eq!(body["status"], json!("processed"));
        assert_eq!(body["reset_time_seconds"], json!(60.0));
    }

    #[tokio::test]
    async fn test_check_and_consume_denies_with_429() {
        let app = test_router();
        let body = json!({
            "tenant_id": "t1",
            "client_id": "c1",
            "action_type": "login",
            "max_requests": 1,
            "window_duration_seconds": 60.0,
        });

        let (status, _) = send(app.clone(), post_json("/check_and_consume", body.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, post_json("/check_and_consume", body)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["allowed"], json!(false));
        assert_eq!(body["status"], json!("processed"));
    }

    #[tokio::test]
    async fn test_lone_quota_hint_rejected() {
        let app = test_router();
        let body = json!({
            "tenant_id": "t1",
            "client_id": "c1",
            "action_type": "login",
            "max_requests": 5,
        });

        let (status, body) = send(app, post_json("/check_and_consume", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("together"));
    }

    #[tokio::test]
    async fn test_no_quota_is_bad_request() {
        let app = test_router();
        let body = json!({
            "tenant_id": "t1",
            "client_id": "c1",
            "action_type": "login",
        });

        let (status, _) = send(app, post_json("/check_and_consume", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_config_round_trip() {
        let app = test_router();

        let (status, _) = send(
            app.clone(),
            put_json(
                "/config/tenants/t1/actions/login",
                json!({ "max_requests": 5, "window_duration_seconds": 60.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            app.clone(),
            put_json(
                "/config/tenants/t1/clients/c1/actions/login",
                json!({ "max_requests": 1, "window_duration_seconds": 60.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app.clone(), get_req("/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["tenants"]["t1"]["action_limits"]["login"]["max_requests"],
            json!(5)
        );
        assert_eq!(
            body["tenants"]["t1"]["client_limits"]["c1"]["login"]["max_requests"],
            json!(1)
        );

        // The configured limit now applies without hints.
        let check = json!({
            "tenant_id": "t1",
            "client_id": "c1",
            "action_type": "login",
        });
        let (status, _) = send(app.clone(), post_json("/check_and_consume", check.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(app, post_json("/check_and_consume", check)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let app = test_router();

        let (status, body) = send(
            app.clone(),
            put_json(
                "/config/tenants/t1/actions/login",
                json!({ "max_requests": 0, "window_duration_seconds": 60.0 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("positive"));

        let (status, _) = send(
            app,
            put_json(
                "/config/global",
                json!({ "max_global_concurrent": 0, "max_tenant_queue_size": 5 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_global_config_round_trip() {
        let app = test_router();

        let (status, _) = send(
            app.clone(),
            put_json(
                "/config/global",
                json!({ "max_global_concurrent": 7, "max_tenant_queue_size": 3 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, get_req("/config/global")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["max_global_concurrent"], json!(7));
        assert_eq!(body["max_tenant_queue_size"], json!(3));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let app = test_router();

        let check = json!({
            "tenant_id": "t1",
            "client_id": "c1",
            "action_type": "login",
            "max_requests": 3,
            "window_duration_seconds": 60.0,
        });
        let (status, _) = send(app.clone(), post_json("/check_and_consume", check)).await;
        assert_eq!(status, StatusCode::OK);

        let uri = "/status/t1/c1/login?max_requests=3&window_duration_seconds=60";
        let (status, body) = send(app, get_req(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remaining_requests"], json!(2));
        assert_eq!(body["current_usage"], json!(1));
        assert_eq!(body["queue"]["queue_length"], json!(0));
        assert_eq!(body["queue"]["global_in_flight"], json!(0));
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_router();

        let (status, body) = send(app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["service"], json!("turnstile"));
        assert_eq!(body["dispatcher_running"], json!(true));
    }
}
