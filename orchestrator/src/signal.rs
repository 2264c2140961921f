//! OS signal trigger source.
//!
//! [`SigDown`] listens for shutdown signals (SIGTERM/SIGINT on Unix, Ctrl+C on
//! Windows) and forwards every delivery into a [`TriggerHandle`]. The first
//! delivery starts graceful shutdown; any later one forces exit.

#[cfg(unix)]
use tokio::signal::unix::SignalKind;
#[cfg(unix)]
use tokio::signal::unix::signal;
use tokio_util::task::TaskTracker;

use crate::trigger::{Trigger, TriggerHandle};

/// Forwards SIGTERM / SIGINT / Ctrl+C to the orchestrator.
#[allow(missing_debug_implementations)]
pub struct SigDown {
    task_tracker: TaskTracker,
}

impl SigDown {
    /// Registers the signal handlers and spawns the forwarding task.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if signal registration fails.
    #[allow(clippy::unnecessary_wraps)]
    pub fn try_new(handle: TriggerHandle) -> Result<Self, std::io::Error> {
        let task_tracker = TaskTracker::new();

        #[cfg(unix)]
        {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            task_tracker.spawn(async move {
                loop {
                    let trigger = tokio::select! {
                        received = sigterm.recv() => received.map(|()| Trigger::Signal("SIGTERM")),
                        received = sigint.recv() => received.map(|()| Trigger::Signal("SIGINT")),
                    };
                    let Some(trigger) = trigger else { break };
                    tracing::info!(%trigger, "shutdown signal received");
                    handle.fire(trigger);
                }
            });
        }

        #[cfg(windows)]
        {
            task_tracker.spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl+C received");
                    handle.fire(Trigger::Signal("CTRL_C"));
                }
            });
        }

        task_tracker.close();
        Ok(Self { task_tracker })
    }

    /// Whether the forwarding task has exited.
    pub fn is_finished(&self) -> bool {
        self.task_tracker.is_empty()
    }
}
