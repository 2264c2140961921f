//! Staged graceful shutdown for a process hosting several HTTP services.
//!
//! An [`Orchestrator`] owns a fixed [`ServiceRegistry`] and a set of
//! [`ShutdownCallback`]s. [`Orchestrator::start_and_serve`] starts every
//! service, waits for the first [`Trigger`], and then walks the shutdown
//! stages: reject new requests, drain, stop every service, run callbacks,
//! release resources. A hard deadline and a second trigger both abandon the
//! sequence with a forced [`Outcome`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use axum::routing::get;
//! use orchestrator::{HttpService, Orchestrator, ServiceRegistry, SigDown, ShutdownCallback};
//!
//! # async fn run() -> Result<(), orchestrator::Error> {
//! let api = HttpService::new("api", "0.0.0.0:8080".parse().unwrap())
//!     .route("/", get(|| async { "hello" }));
//! let registry = ServiceRegistry::new(vec![Arc::new(api)])?;
//!
//! let (handle, triggers) = orchestrator::trigger::channel();
//! let _signals = SigDown::try_new(handle)?;
//!
//! let outcome = Orchestrator::new(registry)
//!     .with_wait_time(Duration::from_secs(5))
//!     .with_callback(ShutdownCallback::new("flush", |ctx| async move {
//!         ctx.cancelled().await;
//!         Ok::<_, orchestrator::BoxError>(())
//!     }))
//!     .start_and_serve(triggers)
//!     .await;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod service;
pub mod signal;
pub mod trigger;

pub use callback::{BoxError, CallbackContext, CallbackFailure, ShutdownCallback};
pub use error::Error;
pub use orchestrator::{
    FailedCallback, Orchestrator, Outcome, Phase, ShutdownConfig, ShutdownReport, Stage,
};
pub use service::{HttpService, Service, ServiceError, ServiceRegistry};
pub use signal::SigDown;
pub use trigger::{Trigger, TriggerHandle, Triggers};
