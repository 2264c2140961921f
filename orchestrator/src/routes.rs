//! Demo HTTP routes mounted on every configured service.
//!
//! `/`, `/health` and `/sleep/{millis}`. The last one holds a request open so
//! the drain stage can be observed from outside.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

/// Longest sleep `/sleep/{millis}` honours.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Requests served across every service.
#[derive(Debug, Clone, Default)]
pub struct RequestCounter(Arc<AtomicU64>);

impl RequestCounter {
    /// Number of requests that reached a handler.
    pub fn served(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Creates the router for the service called `service`.
pub fn routes(service: &str, counter: RequestCounter) -> Router {
    let service: Arc<str> = Arc::from(service);
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/sleep/{millis}", get(get_sleep))
        .with_state(service)
        .layer(middleware::from_fn_with_state(counter, count_request))
}

async fn count_request(State(counter): State<RequestCounter>, request: Request, next: Next) -> Response {
    counter.0.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}

/// `GET /`: greeting naming the service.
async fn get_root(State(service): State<Arc<str>>) -> impl IntoResponse {
    (StatusCode::OK, format!("Hello from {service}!"))
}

/// `GET /health`: liveness check.
async fn get_health(State(service): State<Arc<str>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": &*service })),
    )
}

/// `GET /sleep/{millis}`: responds after the given delay.
async fn get_sleep(Path(millis): Path<u64>) -> impl IntoResponse {
    let delay = Duration::from_millis(millis).min(MAX_SLEEP);
    tokio::time::sleep(delay).await;
    (StatusCode::OK, format!("slept {}ms", delay.as_millis()))
}

#[cfg(test)]
mod tests {
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn root_names_the_service() {
        let (status, body) = get_body(routes("admin", RequestCounter::default()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Hello from admin!");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = get_body(routes("public", RequestCounter::default()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body, json!({ "status": "ok", "service": "public" }));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_capped() {
        let (status, body) =
            get_body(routes("public", RequestCounter::default()), "/sleep/600000").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "slept 60000ms");
    }

    #[tokio::test]
    async fn counter_sees_every_request() {
        let counter = RequestCounter::default();
        let router = routes("public", counter.clone());
        get_body(router.clone(), "/").await;
        get_body(router, "/health").await;
        assert_eq!(counter.served(), 2);
    }
}
