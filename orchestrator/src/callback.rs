//! Caller-supplied cleanup actions run during shutdown.
//!
//! Every callback receives a [`CallbackContext`] whose token is cancelled when
//! the callback stage's deadline passes. The deadline is advisory: the stage
//! still waits for the callback to return, so callbacks are expected to watch
//! [`CallbackContext::cancelled`] and wrap up.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

/// Error type callbacks may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;
type CallbackFn = dyn Fn(CallbackContext) -> CallbackFuture + Send + Sync;

/// Deadline-bound cancellation handle handed to one callback invocation.
#[derive(Debug, Clone)]
pub struct CallbackContext {
    token: CancellationToken,
    deadline: Instant,
}

impl CallbackContext {
    /// Token cancelled once the deadline passes.
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Instant by which the callback should have returned.
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has been signalled.
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the deadline has been signalled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// A named cleanup action.
#[derive(Clone)]
pub struct ShutdownCallback {
    name: Arc<str>,
    run: Arc<CallbackFn>,
}

impl fmt::Debug for ShutdownCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCallback")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ShutdownCallback {
    /// Wraps an async closure as a shutdown callback.
    pub fn new<F, Fut>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(move |context: CallbackContext| -> CallbackFuture {
                Box::pin(f(context))
            }),
        }
    }

    /// Label used in logs and reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the callback in its own task with a fresh child of `base`
    /// that is cancelled at `deadline`.
    ///
    /// The deadline timer is released as soon as the callback returns.
    pub(crate) async fn invoke(
        &self,
        base: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), CallbackFailure> {
        let token = base.child_token();
        let _timer = AbortOnDropHandle::new(tokio::spawn(expire_at(token.clone(), deadline)));
        let context = CallbackContext { token, deadline };

        match tokio::spawn((self.run)(context)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(CallbackFailure::Failed(error)),
            Err(join) if join.is_panic() => {
                Err(CallbackFailure::Panicked(panic_message(&*join.into_panic())))
            }
            Err(join) => Err(CallbackFailure::Aborted(join.to_string())),
        }
    }
}

/// Why a callback did not complete successfully.
#[derive(Debug, Error)]
pub enum CallbackFailure {
    /// The callback returned an error.
    #[error("callback failed: {0}")]
    Failed(BoxError),

    /// The callback panicked.
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// The callback's task was cancelled by the runtime.
    #[error("callback aborted: {0}")]
    Aborted(String),
}

async fn expire_at(token: CancellationToken, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
    token.cancel();
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;

    fn deadline_in(millis: u64) -> Instant {
        Instant::now() + Duration::from_millis(millis)
    }

    fn done() -> Result<(), BoxError> {
        Ok(())
    }

    async fn waits_for_deadline(ctx: CallbackContext) -> Result<(), BoxError> {
        assert!(!ctx.is_expired());
        ctx.cancelled().await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
        done()
    }

    async fn ignores_deadline(_ctx: CallbackContext) -> Result<(), BoxError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        done()
    }

    async fn fails(_ctx: CallbackContext) -> Result<(), BoxError> {
        Err("disk full".into())
    }

    async fn explodes(_ctx: CallbackContext) -> Result<(), BoxError> {
        panic!("boom")
    }

    #[tokio::test(start_paused = true)]
    async fn context_is_cancelled_at_deadline() {
        let callback = ShutdownCallback::new("waits", waits_for_deadline);
        let started = Instant::now();
        callback
            .invoke(&CancellationToken::new(), deadline_in(3_000))
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3_100));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_advisory() {
        let callback = ShutdownCallback::new("stubborn", ignores_deadline);
        let started = Instant::now();
        callback
            .invoke(&CancellationToken::new(), deadline_in(1_000))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_released_when_callback_returns() {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let callback = ShutdownCallback::new("quick", move |ctx: CallbackContext| {
            if let Some(sender) = tx.lock().unwrap().take() {
                let _ = sender.send(ctx.token().clone());
            }
            async { done() }
        });

        callback
            .invoke(&CancellationToken::new(), deadline_in(500))
            .await
            .unwrap();
        let token = rx.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn base_cancellation_reaches_callback() {
        let base = CancellationToken::new();
        base.cancel();
        let callback = ShutdownCallback::new("child", |ctx: CallbackContext| async move {
            assert!(ctx.is_expired());
            done()
        });
        callback.invoke(&base, deadline_in(60_000)).await.unwrap();
    }

    #[tokio::test]
    async fn errors_are_reported() {
        let failure = ShutdownCallback::new("fails", fails)
            .invoke(&CancellationToken::new(), deadline_in(1_000))
            .await
            .unwrap_err();
        assert_eq!(failure.to_string(), "callback failed: disk full");
    }

    #[tokio::test]
    async fn panics_are_isolated() {
        let failure = ShutdownCallback::new("panics", explodes)
            .invoke(&CancellationToken::new(), deadline_in(1_000))
            .await
            .unwrap_err();
        assert!(matches!(failure, CallbackFailure::Panicked(ref message) if message == "boom"));
    }
}
