//! Axum-backed [`Service`] implementation.
//!
//! Every request passes through an availability gate reading the service's
//! atomic `accepting` flag. Once the flag is cleared, requests get
//! `503 Service Unavailable` instead of reaching the registered handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Service, ServiceError, ServiceFuture};

/// Body sent with every rejected request.
pub const UNAVAILABLE_BODY: &str = "service unavailable";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ServeState {
    Idle,
    Binding,
    Listening(SocketAddr),
    Stopped,
    // Bind failed; there is no listener to close.
    Unbound,
    Failed(String),
}

/// HTTP service bound to one address.
///
/// Handlers are registered with [`HttpService::route`] / [`HttpService::merge`]
/// before the service is handed to the orchestrator.
#[allow(missing_debug_implementations)]
pub struct HttpService {
    name: String,
    addr: SocketAddr,
    router: Router,
    accepting: Arc<AtomicBool>,
    shutdown: CancellationToken,
    state: watch::Sender<ServeState>,
}

impl HttpService {
    /// Creates a service that will listen on `addr` once started.
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            router: Router::new(),
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
            state: watch::Sender::new(ServeState::Idle),
        }
    }

    /// Registers a handler for `path`.
    #[must_use]
    pub fn route(mut self, path: &str, method_router: MethodRouter) -> Self {
        self.router = self.router.route(path, method_router);
        self
    }

    /// Merges every route of `router` into this service.
    #[must_use]
    pub fn merge(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// Whether new requests are still routed to handlers.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Waits until [`Service::start`] has bound the listener.
    ///
    /// Returns the bound address, or `None` if binding failed or the service
    /// was stopped first.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        let settled = state
            .wait_for(|state| !matches!(state, ServeState::Idle | ServeState::Binding))
            .await
            .ok()?;
        match &*settled {
            ServeState::Listening(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Registered routes wrapped in the availability gate.
    pub(crate) fn app(&self) -> Router {
        self.router.clone().layer(middleware::from_fn_with_state(
            Arc::clone(&self.accepting),
            reject_when_unavailable,
        ))
    }

    async fn serve(&self) -> Result<(), ServiceError> {
        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.send_replace(ServeState::Unbound);
                return Err(ServiceError::Bind {
                    name: self.name.clone(),
                    addr: self.addr,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().unwrap_or(self.addr);
        self.state.send_replace(ServeState::Listening(local_addr));
        tracing::info!(service = %self.name, addr = %local_addr, "service listening");

        let served = axum::serve(listener, self.app())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await;
        match served {
            Ok(()) => {
                self.state.send_replace(ServeState::Stopped);
                Ok(())
            }
            Err(source) => {
                self.state.send_replace(ServeState::Failed(source.to_string()));
                Err(ServiceError::Serve {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }
}

impl Service for HttpService {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> ServiceFuture<'_> {
        Box::pin(async move {
            let mut previous = None;
            self.state.send_if_modified(|state| {
                if *state == ServeState::Idle {
                    *state = ServeState::Binding;
                    true
                } else {
                    previous = Some(state.clone());
                    false
                }
            });
            match previous {
                None => self.serve().await,
                Some(ServeState::Stopped | ServeState::Unbound | ServeState::Failed(_)) => {
                    Err(ServiceError::Closed {
                        name: self.name.clone(),
                    })
                }
                Some(_) => Err(ServiceError::AlreadyStarted {
                    name: self.name.clone(),
                }),
            }
        })
    }

    fn mark_unavailable(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            tracing::info!(service = %self.name, "service no longer accepting requests");
        }
    }

    fn stop(&self) -> ServiceFuture<'_> {
        Box::pin(async move {
            tracing::info!(service = %self.name, "stopping service");
            self.shutdown.cancel();

            let never_started = self.state.send_if_modified(|state| {
                if *state == ServeState::Idle {
                    *state = ServeState::Stopped;
                    true
                } else {
                    false
                }
            });
            if never_started {
                return Ok(());
            }

            let mut state = self.state.subscribe();
            let closed = state
                .wait_for(|state| {
                    matches!(
                        state,
                        ServeState::Stopped | ServeState::Unbound | ServeState::Failed(_)
                    )
                })
                .await
                .map(|state| (*state).clone());
            match closed {
                Ok(ServeState::Failed(reason)) => Err(ServiceError::Stop {
                    name: self.name.clone(),
                    reason,
                }),
                Ok(_) => Ok(()),
                Err(_) => Err(ServiceError::Stop {
                    name: self.name.clone(),
                    reason: "lifecycle channel closed".to_owned(),
                }),
            }
        })
    }
}

async fn reject_when_unavailable(
    State(accepting): State<Arc<AtomicBool>>,
    request: Request,
    next: Next,
) -> Response {
    if accepting.load(Ordering::Acquire) {
        next.run(request).await
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{self, Body};
    use axum::routing::get;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn hello(name: &str) -> HttpService {
        HttpService::new(name, loopback()).route("/", get(|| async { "hello" }))
    }

    async fn call(service: &HttpService, path: &str) -> (StatusCode, String) {
        let request = axum::http::Request::builder()
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = service.app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn accepting_service_routes_to_handler() {
        let service = hello("api");
        assert!(service.is_accepting());
        assert_eq!(call(&service, "/").await, (StatusCode::OK, "hello".to_owned()));
    }

    #[tokio::test]
    async fn unavailable_service_answers_503() {
        let service = hello("api");
        service.mark_unavailable();
        assert!(!service.is_accepting());
        assert_eq!(
            call(&service, "/").await,
            (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_BODY.to_owned())
        );
    }

    #[tokio::test]
    async fn mark_unavailable_is_idempotent() {
        let once = hello("once");
        once.mark_unavailable();
        let twice = hello("twice");
        twice.mark_unavailable();
        twice.mark_unavailable();
        assert_eq!(once.is_accepting(), twice.is_accepting());
        assert_eq!(call(&once, "/").await, call(&twice, "/").await);
    }

    #[tokio::test]
    async fn start_returns_cleanly_after_stop() {
        let service = Arc::new(hello("api"));
        let running = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.start().await }
        });
        let addr = service.listening().await.unwrap();

        assert!(raw_get(addr, "/").await.starts_with("HTTP/1.1 200"));
        service.mark_unavailable();
        let rejected = raw_get(addr, "/").await;
        assert!(rejected.starts_with("HTTP/1.1 503"));
        assert!(rejected.ends_with(UNAVAILABLE_BODY));

        service.stop().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_waits_for_admitted_request() {
        let service = Arc::new(HttpService::new("slow", loopback()).route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                "done"
            }),
        ));
        let running = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.start().await }
        });
        let addr = service.listening().await.unwrap();

        let in_flight = tokio::spawn(async move { raw_get(addr, "/slow").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop().await.unwrap();

        let response = in_flight.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("done"));
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_before_start_closes_the_service() {
        let service = hello("api");
        service.stop().await.unwrap();
        assert!(matches!(service.start().await, Err(ServiceError::Closed { .. })));
        assert_eq!(service.listening().await, None);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let service = Arc::new(hello("api"));
        let running = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.start().await }
        });
        service.listening().await.unwrap();

        assert!(matches!(
            service.start().await,
            Err(ServiceError::AlreadyStarted { .. })
        ));
        service.stop().await.unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_reported_once() {
        let taken = std::net::TcpListener::bind(loopback()).unwrap();
        let service = HttpService::new("clash", taken.local_addr().unwrap());

        assert!(matches!(service.start().await, Err(ServiceError::Bind { .. })));
        assert_eq!(service.listening().await, None);
        service.stop().await.unwrap();
        assert!(matches!(service.start().await, Err(ServiceError::Closed { .. })));
    }
}
