//! Logging and `OpenTelemetry` tracing setup.
//!
//! [`Telemetry`] always installs a `tracing` fmt subscriber filtered by
//! `RUST_LOG`. With the `telemetry` feature, spans are also exported over
//! OTLP when `OTEL_EXPORTER_OTLP_*` variables are present.

use std::sync::Arc;

use axum::http::Request;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnResponse, MakeSpan, TraceLayer};
use tracing::{Level, Span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "telemetry")]
use otlp::OtlpProtocol;

/// Service identity for the process.
///
/// The identity can be overridden via `OTEL_SERVICE_NAME` and
/// `OTEL_SERVICE_VERSION`.
#[derive(Debug, Default)]
#[cfg_attr(not(feature = "telemetry"), allow(dead_code))]
pub struct Telemetry {
    name: Option<String>,
    version: Option<String>,
}

impl Telemetry {
    /// Creates a new, empty [`Telemetry`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the service name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the service version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    fn filter() -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
    }

    /// Installs the global subscriber.
    ///
    /// Returns a [`TelemetryGuard`] that flushes exporters on drop.
    #[cfg(feature = "telemetry")]
    pub fn register(self) -> TelemetryGuard {
        use opentelemetry::trace::TracerProvider;
        use tracing_opentelemetry::OpenTelemetryLayer;

        let protocol = OtlpProtocol::detect();
        let tracer_provider = protocol.and_then(|p| {
            otlp::tracer_provider(p, self.name.as_deref(), self.version.as_deref())
        });
        let otel_layer = tracer_provider
            .as_ref()
            .map(|tp| OpenTelemetryLayer::new(tp.tracer("orchestrator")));

        tracing_subscriber::registry()
            .with(Self::filter())
            .with(tracing_subscriber::fmt::layer())
            .with(otel_layer)
            .init();

        if tracer_provider.is_some() {
            tracing::info!(?protocol, "OpenTelemetry span exporter registered");
        } else {
            tracing::info!("OpenTelemetry is not configured, console logging only");
        }

        TelemetryGuard { tracer_provider }
    }

    /// Installs the global subscriber.
    #[cfg(not(feature = "telemetry"))]
    pub fn register(self) -> TelemetryGuard {
        tracing_subscriber::registry()
            .with(Self::filter())
            .with(tracing_subscriber::fmt::layer())
            .init();
        TelemetryGuard {}
    }
}

/// Owns the span exporter; shuts it down on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        if let Some(ref tp) = self.tracer_provider
            && let Err(err) = tp.shutdown()
        {
            tracing::error!(?err, "tracer provider shutdown error");
        }
    }
}

impl TelemetryGuard {
    /// Creates an HTTP tracing layer for the service called `service`.
    #[must_use]
    #[allow(clippy::unused_self)]
    pub fn http_tracing(
        &self,
        service: &str,
    ) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, HttpMakeSpan> {
        TraceLayer::new_for_http()
            .make_span_with(HttpMakeSpan {
                service: Arc::from(service),
            })
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}

/// Span maker tagging each HTTP request with its service.
#[derive(Clone, Debug)]
pub struct HttpMakeSpan {
    service: Arc<str>,
}

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "http_request",
            otel.kind = "server",
            otel.name = %format!("{} {}", request.method(), request.uri().path()),
            service = %self.service,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

#[cfg(feature = "telemetry")]
mod otlp {
    use std::env;

    use opentelemetry::KeyValue;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::{SCHEMA_URL, attribute::SERVICE_VERSION};

    /// Supported OTLP transport protocols.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) enum OtlpProtocol {
        Http,
        Grpc,
    }

    impl OtlpProtocol {
        /// Returns `None` if OTLP export is not configured.
        pub(super) fn detect() -> Option<Self> {
            let is_enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
            is_enabled.then(|| match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => Self::Grpc,
                _ => Self::Http,
            })
        }
    }

    fn resolve(env_key: &str, fallback: Option<&str>) -> Option<String> {
        env::var(env_key)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| fallback.map(str::to_owned))
    }

    pub(super) fn tracer_provider(
        protocol: OtlpProtocol,
        name: Option<&str>,
        version: Option<&str>,
    ) -> Option<SdkTracerProvider> {
        let exporter = match protocol {
            OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .build(),
            OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .build(),
        };
        let exporter = exporter.ok()?;

        let mut resource = Resource::builder();
        if let Some(name) = resolve("OTEL_SERVICE_NAME", name) {
            resource = resource.with_service_name(name);
        }
        if let Some(version) = resolve("OTEL_SERVICE_VERSION", version) {
            resource =
                resource.with_schema_url([KeyValue::new(SERVICE_VERSION, version)], SCHEMA_URL);
        }

        Some(
            SdkTracerProvider::builder()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource.build())
                .with_batch_exporter(exporter)
                .build(),
        )
    }
}
