//! HTTP surface
//!
//! Thin axum layer over [`Handlers`]: each route answers with the handler's
//! status code and JSON body.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{HandlerResponse, Handlers, InvocationContext};

const JIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AppState {
    handlers: Handlers,
}

impl IntoResponse for HandlerResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

fn context(headers: &HeaderMap) -> InvocationContext {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(InvocationContext::with_id)
        .unwrap_or_default()
}

/// Parse an optional JSON body; an empty body is `null`
fn json_body(body: &Bytes) -> Result<Value, HandlerResponse> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| {
        HandlerResponse::error(400, "validation_error", format!("Body is not valid JSON: {}", e))
    })
}

pub fn router(handlers: Handlers) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events/finding", post(finding_event))
        .route("/events/schedule/credential-scan", post(credential_scan))
        .route("/jit/requests", post(jit_submit))
        .route("/jit/requests/:id", get(jit_get))
        .route("/jit/requests/:id/approve", post(jit_approve))
        .route("/jit/requests/:id/cancel", post(jit_cancel))
        .route("/jit/requests/:id/revoke", post(jit_revoke))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { handlers })
}

pub async fn serve(handlers: Handlers, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("IAM Guard listening on {}", addr);
    serve_with_shutdown(handlers, listener, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await
}

/// Serve until `signal` resolves. JIT requests left granted by an earlier
/// process are resumed first; on the way out every running JIT execution
/// revokes and is waited for before this returns.
pub async fn serve_with_shutdown(
    handlers: Handlers,
    listener: TcpListener,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let jit = handlers.jit().cloned();
    let pruner = match &jit {
        Some(jit) => {
            jit.resume().await;
            Some(jit.spawn_pruner(JIT_PRUNE_INTERVAL))
        }
        None => None,
    };

    let served = axum::serve(listener, router(handlers))
        .with_graceful_shutdown(signal)
        .await;

    if let Some(pruner) = pruner {
        pruner.abort();
    }
    if let Some(jit) = jit {
        let stopped = jit.shutdown().await;
        info!(executions = %stopped, "JIT executions stopped");
    }

    served?;
    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "iam-guard",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn finding_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResponse {
    let event = match json_body(&body) {
        Ok(event) => event,
        Err(response) => return response,
    };
    state.handlers.finding_event(&event, &context(&headers)).await
}

async fn credential_scan(State(state): State<AppState>, headers: HeaderMap) -> HandlerResponse {
    state.handlers.credential_scan(&context(&headers)).await
}

async fn jit_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResponse {
    let input = match json_body(&body) {
        Ok(input) => input,
        Err(response) => return response,
    };
    state.handlers.jit_submit(&input, &context(&headers)).await
}

async fn jit_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> HandlerResponse {
    state.handlers.jit_get(&id, &context(&headers)).await
}

async fn jit_approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResponse {
    let input = match json_body(&body) {
        Ok(input) => input,
        Err(response) => return response,
    };
    state.handlers.jit_approve(&id, &input, &context(&headers)).await
}

async fn jit_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> HandlerResponse {
    state.handlers.jit_cancel(&id, &context(&headers)).await
}

async fn jit_revoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> HandlerResponse {
    state.handlers.jit_revoke(&id, &context(&headers)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::credential_hygiene::iam::testing::FakeIam;
    use crate::agents::findings::analyzer::testing::StaticFindingSource;
    use crate::agents::jit_access::provisioner::testing::FakeProvisioner;
    use crate::agents::jit_access::{JitState, RevocationReason};
    use crate::handlers::testing::{fake_handlers, fake_handlers_with};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        router(fake_handlers(
            StaticFindingSource::default(),
            Arc::new(FakeIam::default()),
        ))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "iam-guard");
    }

    #[tokio::test]
    async fn test_finding_without_identifiers_is_400() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events/finding")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"detail":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_invalid_json_is_400() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events/finding")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_credential_scan_needs_no_body() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events/schedule/credential-scan")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["usersScanned"], 0);
        assert_eq!(body["thresholdDays"], 90);
    }

    #[tokio::test]
    async fn test_jit_submit_and_get() {
        let app = app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jit/requests")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"requester":"u-alice","targetPermissionSet":"ps-admin","justification":"oncall"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["requestId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/jit/requests/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["request"]["state"], "REQUESTED");
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn test_unknown_jit_request_is_404() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jit/requests/{}/cancel", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shutdown_revokes_held_access() {
        let provisioner = Arc::new(FakeProvisioner::default());
        let handlers = fake_handlers_with(
            StaticFindingSource::default(),
            Arc::new(FakeIam::default()),
            provisioner.clone(),
        );
        let jit = handlers.jit().cloned().unwrap();
        let req = jit
            .workflow()
            .submit("u-alice", "ps-admin", "oncall")
            .await
            .unwrap();
        jit.workflow().approve(&req.request_id, "u-manager").await.unwrap();
        jit.start(req.request_id).await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::spawn(serve_with_shutdown(handlers, listener, async {
            let _ = stop_rx.await;
        }));

        // wait for the grant, then stop the server
        while provisioner.assign_count() == 0 {
            tokio::task::yield_now().await;
        }
        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        assert!(!jit.is_running(&req.request_id).await);
        assert!(!provisioner.assigned(&req));
        let saved = jit.workflow().get(&req.request_id).await.unwrap();
        assert_eq!(saved.state, JitState::Revoked);
        assert_eq!(saved.revocation_reason, Some(RevocationReason::Shutdown));
    }
}
