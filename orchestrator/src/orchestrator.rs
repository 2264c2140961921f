//! Startup fan-out and the staged shutdown state machine.
//!
//! Shutdown runs five stages in strict order, each one a barrier:
//!
//! 1. **Reject**: every service is marked unavailable, in registry order.
//! 2. **Drain**: a fixed `wait_time` pause for already-admitted requests.
//! 3. **Stop**: every service is stopped concurrently; the stage waits for all.
//! 4. **Callbacks**: every callback runs concurrently with a deadline-bound
//!    context; the stage waits for all of them to actually return.
//! 5. **Release**: the release hook tears down process-wide resources.
//!
//! [`Orchestrator::run_shutdown`] runs the stages in their own task and races
//! that task against a hard deadline and a second trigger. Either of those
//! abandons the sequence and yields a forced [`Outcome`]. On a multi-threaded
//! runtime the deadline fires even while a stage blocks its worker thread.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::callback::{CallbackFailure, ShutdownCallback, panic_message};
use crate::service::{Service, ServiceError, ServiceRegistry};
use crate::trigger::Triggers;

type ReleaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ReleaseFn = Box<dyn FnOnce() -> ReleaseFuture + Send>;

/// Timing configuration for the shutdown sequence.
///
/// Nothing enforces that `wait_time` plus the stop and callback stages fit
/// within `timeout`; the hard deadline simply fires wherever the sequence is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Hard ceiling for the whole sequence, measured from the first trigger.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Grace period for in-flight requests after new ones are rejected.
    #[serde(with = "humantime_serde")]
    pub wait_time: Duration,
    /// Deadline handed to each callback, measured from the start of the
    /// callback stage.
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_time: Duration::from_secs(10),
            callback_timeout: Duration::from_secs(3),
        }
    }
}

/// One stage of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Services are marked unavailable.
    Reject,
    /// Fixed grace period for in-flight work.
    Drain,
    /// Services are stopped concurrently.
    Stop,
    /// Shutdown callbacks run concurrently.
    Callbacks,
    /// Process-wide resources are released.
    Release,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reject => "reject",
            Self::Drain => "drain",
            Self::Stop => "stop",
            Self::Callbacks => "callbacks",
            Self::Release => "release",
        })
    }
}

/// Observable lifecycle position of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Services are running; no trigger has been consumed yet.
    Serving,
    /// Shutdown is executing the given stage.
    Stage(Stage),
    /// All five stages completed.
    Finished,
}

/// A callback that did not complete successfully.
#[derive(Debug)]
pub struct FailedCallback {
    /// Callback name.
    pub name: String,
    /// What went wrong.
    pub failure: CallbackFailure,
}

/// Failures collected while running the shutdown stages.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Services whose `stop` returned an error.
    pub stop_failures: Vec<ServiceError>,
    /// Callbacks that errored or panicked.
    pub callback_failures: Vec<FailedCallback>,
}

impl ShutdownReport {
    /// Whether every stop and callback succeeded.
    pub fn is_clean(&self) -> bool {
        self.stop_failures.is_empty() && self.callback_failures.is_empty()
    }
}

/// How a shutdown ended.
#[derive(Debug)]
pub enum Outcome {
    /// All five stages ran to completion.
    Completed(ShutdownReport),
    /// The hard deadline fired while `stage` was in progress.
    DeadlineExceeded {
        /// Stage that was abandoned.
        stage: Option<Stage>,
    },
    /// A second trigger arrived while `stage` was in progress.
    Interrupted {
        /// Stage that was abandoned.
        stage: Option<Stage>,
    },
}

impl Outcome {
    /// Process exit status for this outcome.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(_) => 0,
            Self::DeadlineExceeded { .. } => 1,
            Self::Interrupted { .. } => 130,
        }
    }

    /// Whether the sequence was abandoned.
    pub const fn is_forced(&self) -> bool {
        !matches!(self, Self::Completed(_))
    }
}

/// Owns the hosted services and drives their startup and shutdown.
#[allow(missing_debug_implementations)]
pub struct Orchestrator {
    services: ServiceRegistry,
    callbacks: Vec<ShutdownCallback>,
    config: ShutdownConfig,
    release: Mutex<Option<ReleaseFn>>,
    base: CancellationToken,
    phase: watch::Sender<Phase>,
}

impl Orchestrator {
    /// Creates an orchestrator with default timings and no callbacks.
    pub fn new(services: ServiceRegistry) -> Self {
        Self {
            services,
            callbacks: Vec::new(),
            config: ShutdownConfig::default(),
            release: Mutex::new(None),
            base: CancellationToken::new(),
            phase: watch::Sender::new(Phase::Serving),
        }
    }

    /// Replaces all timings at once.
    #[must_use]
    pub fn with_config(mut self, config: ShutdownConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the hard ceiling for the whole shutdown sequence.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the drain grace period.
    #[must_use]
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.config.wait_time = wait_time;
        self
    }

    /// Sets the per-callback deadline.
    #[must_use]
    pub fn with_callback_timeout(mut self, callback_timeout: Duration) -> Self {
        self.config.callback_timeout = callback_timeout;
        self
    }

    /// Registers one shutdown callback.
    #[must_use]
    pub fn with_callback(mut self, callback: ShutdownCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Registers several shutdown callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = ShutdownCallback>) -> Self {
        self.callbacks.extend(callbacks);
        self
    }

    /// Sets the hook run by the release stage.
    #[must_use]
    pub fn with_release<F, Fut>(self, release: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let release: ReleaseFn = Box::new(move || -> ReleaseFuture { Box::pin(release()) });
        Self {
            release: Mutex::new(Some(release)),
            ..self
        }
    }

    /// Current timings.
    pub const fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Watches the lifecycle phase.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Starts every service, waits for the first trigger, then shuts down.
    pub async fn start_and_serve(self, mut triggers: Triggers) -> Outcome {
        self.launch();
        let trigger = triggers.first().await;
        tracing::info!(%trigger, "shutdown triggered");
        self.run_shutdown(triggers).await
    }

    /// Runs the shutdown stages under the hard deadline and second-trigger
    /// watch. The deadline is armed when this is called.
    ///
    /// The stages run in a spawned task that is aborted when the outcome is
    /// forced. A panic inside the sequence itself is resumed on the caller.
    pub async fn run_shutdown(self, mut triggers: Triggers) -> Outcome {
        let timeout = self.config.timeout;
        if self.config.wait_time + self.config.callback_timeout >= timeout {
            tracing::warn!(
                ?timeout,
                wait_time = ?self.config.wait_time,
                callback_timeout = ?self.config.callback_timeout,
                "drain and callback budgets exceed the shutdown timeout"
            );
        }

        let deadline = tokio::time::sleep(timeout);
        let this = Arc::new(self);
        let mut sequence = AbortOnDropHandle::new(tokio::spawn({
            let this = Arc::clone(&this);
            async move { this.stages().await }
        }));

        let outcome = tokio::select! {
            biased;
            trigger = triggers.next() => {
                let stage = this.current_stage();
                tracing::error!(%trigger, stage = ?stage, "second trigger received, forcing exit");
                Outcome::Interrupted { stage }
            }
            () = deadline => {
                let stage = this.current_stage();
                tracing::error!(?timeout, stage = ?stage, "shutdown timeout exceeded, forcing exit");
                Outcome::DeadlineExceeded { stage }
            }
            joined = &mut sequence => match joined {
                Ok(report) => Outcome::Completed(report),
                Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                Err(join) => {
                    let stage = this.current_stage();
                    tracing::error!(error = %join, stage = ?stage, "shutdown sequence cancelled");
                    Outcome::Interrupted { stage }
                }
            },
        };

        if outcome.is_forced() {
            this.base.cancel();
        }
        outcome
    }

    /// Runs the five shutdown stages to completion, without a deadline.
    pub async fn shutdown(self) -> ShutdownReport {
        self.stages().await
    }

    fn launch(&self) {
        for service in self.services.iter() {
            let service = Arc::clone(service);
            tokio::spawn(async move {
                match service.start().await {
                    Ok(()) => tracing::info!(service = service.name(), "service closed"),
                    Err(error) => tracing::error!(service = service.name(), %error, "service exited"),
                }
            });
        }
        tracing::info!(services = self.services.len(), "all services launched");
    }

    fn current_stage(&self) -> Option<Stage> {
        match *self.phase.borrow() {
            Phase::Stage(stage) => Some(stage),
            Phase::Serving | Phase::Finished => None,
        }
    }

    fn enter(&self, stage: Stage) {
        self.phase.send_replace(Phase::Stage(stage));
        tracing::info!(%stage, "entering shutdown stage");
    }

    async fn stages(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        self.enter(Stage::Reject);
        for service in self.services.iter() {
            service.mark_unavailable();
        }

        self.enter(Stage::Drain);
        tracing::info!(wait_time = ?self.config.wait_time, "waiting for in-flight requests");
        tokio::time::sleep(self.config.wait_time).await;

        self.enter(Stage::Stop);
        report.stop_failures = self.stop_services().await;

        self.enter(Stage::Callbacks);
        report.callback_failures = self.run_callbacks().await;

        self.enter(Stage::Release);
        self.release().await;

        self.phase.send_replace(Phase::Finished);
        tracing::info!(
            stop_failures = report.stop_failures.len(),
            callback_failures = report.callback_failures.len(),
            "shutdown complete"
        );
        report
    }

    async fn stop_services(&self) -> Vec<ServiceError> {
        let mut stage = JoinSet::new();
        for service in self.services.iter() {
            let service = Arc::clone(service);
            stage.spawn(stop_one(service));
        }

        let mut failures = Vec::new();
        while let Some(joined) = stage.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(%error, "service stop failed");
                    failures.push(error);
                }
                Err(error) => tracing::error!(%error, "service stop task failed"),
            }
        }
        failures
    }

    async fn run_callbacks(&self) -> Vec<FailedCallback> {
        let deadline = Instant::now() + self.config.callback_timeout;
        let mut stage = JoinSet::new();
        for callback in &self.callbacks {
            let callback = callback.clone();
            let base = self.base.clone();
            stage.spawn(async move {
                let result = callback.invoke(&base, deadline).await;
                (callback, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = stage.join_next().await {
            match joined {
                Ok((callback, Ok(()))) => {
                    tracing::debug!(callback = callback.name(), "callback finished");
                }
                Ok((callback, Err(failure))) => {
                    tracing::warn!(callback = callback.name(), %failure, "callback failed");
                    failures.push(FailedCallback {
                        name: callback.name().to_owned(),
                        failure,
                    });
                }
                Err(error) => tracing::error!(%error, "callback task failed"),
            }
        }
        failures
    }

    async fn release(&self) {
        let release = self.release.lock().ok().and_then(|mut slot| slot.take());
        if let Some(release) = release
            && let Err(error) = tokio::spawn(release()).await
        {
            tracing::error!(%error, "release hook failed");
        }
        tracing::info!("resources released");
    }
}

/// Stops one service in its own task so a panic is reported against it.
async fn stop_one(service: Arc<dyn Service>) -> Result<(), ServiceError> {
    let name = service.name().to_owned();
    let stopping = Arc::clone(&service);
    match tokio::spawn(async move { stopping.stop().await }).await {
        Ok(Ok(())) => {
            tracing::info!(service = %name, "service stopped");
            Ok(())
        }
        Ok(Err(error)) => Err(error),
        Err(join) if join.is_panic() => Err(ServiceError::Stop {
            name,
            reason: format!("stop panicked: {}", panic_message(&*join.into_panic())),
        }),
        Err(join) => Err(ServiceError::Stop {
            name,
            reason: join.to_string(),
        }),
    }
}
