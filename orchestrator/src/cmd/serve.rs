//! `orchestrator serve` command: host the configured services.
//!
//! Reads TOML configuration, builds one [`HttpService`] per entry, installs
//! the signal trigger source and hands everything to an [`Orchestrator`].

use std::path::Path;
use std::sync::Arc;

use dotenvy::dotenv;
use orchestrator::config::load_config;
use orchestrator::{
    BoxError, CallbackContext, HttpService, Orchestrator, Service, ServiceRegistry, ShutdownCallback,
    SigDown, trigger,
};

use crate::routes::{self, RequestCounter};
use crate::telemetry::Telemetry;

/// Execute the `serve` command.
///
/// Returns the process exit code: `0` once every shutdown stage completed,
/// non-zero when the shutdown was forced.
///
/// # Errors
///
/// Returns an error if configuration loading, registry construction or
/// signal registration fails.
pub async fn run(config_path: &Path) -> Result<i32, Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = load_config(config_path)?;

    let counter = RequestCounter::default();
    let services = config
        .services
        .iter()
        .map(|service| {
            let router = routes::routes(&service.name, counter.clone())
                .layer(telemetry.http_tracing(&service.name));
            tracing::info!(service = %service.name, addr = %service.addr, "registering service");
            Arc::new(HttpService::new(service.name.clone(), service.addr).merge(router))
                as Arc<dyn Service>
        })
        .collect();
    let registry = ServiceRegistry::new(services)?;

    let (handle, triggers) = trigger::channel();
    let _sig_down = SigDown::try_new(handle)?;

    let summary = ShutdownCallback::new("request-summary", move |ctx: CallbackContext| {
        let counter = counter.clone();
        async move {
            tracing::info!(
                served = counter.served(),
                remaining = ?ctx.remaining(),
                "requests served before shutdown"
            );
            Ok::<(), BoxError>(())
        }
    });

    let outcome = Orchestrator::new(registry)
        .with_config(config.shutdown)
        .with_callback(summary)
        .with_release(move || async move {
            // Exporter shutdown blocks on the OTLP endpoint.
            if let Err(error) = tokio::task::spawn_blocking(move || drop(telemetry)).await {
                tracing::error!(%error, "telemetry shutdown failed");
            }
        })
        .start_and_serve(triggers)
        .await;

    Ok(outcome.exit_code())
}
