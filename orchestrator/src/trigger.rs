//! Shutdown triggers.
//!
//! Every trigger source (OS signals, programmatic requests) feeds the same
//! channel. The orchestrator consumes the first trigger to begin shutdown and
//! treats any later one as a demand to abandon grace.

use std::fmt;

use tokio::sync::mpsc;

/// What initiated (or escalated) shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An OS signal, by name.
    Signal(&'static str),
    /// A call to [`TriggerHandle::request`].
    Requested,
    /// Every trigger source went away before any trigger fired.
    SourcesClosed,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Requested => f.write_str("programmatic request"),
            Self::SourcesClosed => f.write_str("all trigger sources closed"),
        }
    }
}

/// Creates a connected trigger handle and receiver.
#[must_use]
pub fn channel() -> (TriggerHandle, Triggers) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TriggerHandle { tx }, Triggers { rx })
}

/// Sending side of the trigger channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<Trigger>,
}

impl TriggerHandle {
    /// Requests shutdown. A second request escalates to forced exit.
    pub fn request(&self) {
        self.fire(Trigger::Requested);
    }

    pub(crate) fn fire(&self, trigger: Trigger) {
        if self.tx.send(trigger).is_err() {
            tracing::debug!(%trigger, "trigger dropped, orchestrator no longer listening");
        }
    }
}

/// Receiving side of the trigger channel, owned by the orchestrator.
#[derive(Debug)]
pub struct Triggers {
    rx: mpsc::UnboundedReceiver<Trigger>,
}

impl Triggers {
    /// Waits for the first trigger.
    ///
    /// Resolves to [`Trigger::SourcesClosed`] if every handle was dropped.
    pub async fn first(&mut self) -> Trigger {
        self.rx.recv().await.unwrap_or(Trigger::SourcesClosed)
    }

    /// Waits for a follow-up trigger.
    ///
    /// Never resolves once every handle was dropped, so a closed channel can
    /// not escalate an ongoing shutdown.
    pub async fn next(&mut self) -> Trigger {
        match self.rx.recv().await {
            Some(trigger) => trigger,
            None => std::future::pending().await,
        }
    }
}
