//! Hosted services and the registry that owns them.
//!
//! A [`Service`] wraps one network listener. The orchestrator only ever talks
//! to services through this trait, so it can drive real listeners
//! ([`HttpService`]) and test doubles alike.

use std::collections::HashSet;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::error::Error;

pub mod http;

pub use http::HttpService;

/// Boxed future returned by [`Service`] operations.
pub type ServiceFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>>;

/// One network-facing service hosted by the process.
pub trait Service: Send + Sync {
    /// Name of the service, unique within a [`ServiceRegistry`].
    fn name(&self) -> &str;

    /// Accepts connections for the lifetime of the service.
    ///
    /// Resolves to `Ok(())` once [`Service::stop`] closed the listener, and to
    /// an error for any other termination cause.
    fn start(&self) -> ServiceFuture<'_>;

    /// Makes every subsequent request receive an "unavailable" response.
    ///
    /// Never blocks and is idempotent.
    fn mark_unavailable(&self);

    /// Gracefully closes the listener, letting admitted requests complete.
    fn stop(&self) -> ServiceFuture<'_>;
}

/// Errors reported by a single service. Never fatal for its siblings.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `start` was called on a service that is already running.
    #[error("service '{name}' was already started")]
    AlreadyStarted {
        /// Service name.
        name: String,
    },

    /// `start` was called after the service had been stopped.
    #[error("service '{name}' is closed")]
    Closed {
        /// Service name.
        name: String,
    },

    /// The listener could not be bound.
    #[error("service '{name}' failed to bind {addr}: {source}")]
    Bind {
        /// Service name.
        name: String,
        /// Address that could not be bound.
        addr: std::net::SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The serve loop terminated with an I/O error.
    #[error("service '{name}' terminated: {source}")]
    Serve {
        /// Service name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The listener did not close cleanly.
    #[error("service '{name}' did not stop cleanly: {reason}")]
    Stop {
        /// Service name.
        name: String,
        /// Why the close was not clean.
        reason: String,
    },
}

/// The fixed, ordered set of services owned by an orchestrator.
#[derive(Clone, Default)]
#[allow(missing_debug_implementations)]
pub struct ServiceRegistry(Vec<Arc<dyn Service>>);

impl ServiceRegistry {
    /// Builds a registry, keeping registration order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateService`] if two services share a name.
    pub fn new(services: Vec<Arc<dyn Service>>) -> Result<Self, Error> {
        let mut seen = HashSet::with_capacity(services.len());
        for service in &services {
            if !seen.insert(service.name()) {
                return Err(Error::DuplicateService(service.name().to_owned()));
            }
        }
        Ok(Self(services))
    }

    /// Names of the registered services, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|service| service.name())
    }
}

impl Deref for ServiceRegistry {
    type Target = [Arc<dyn Service>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Service for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn start(&self) -> ServiceFuture<'_> {
            Box::pin(async { Ok(()) })
        }

        fn mark_unavailable(&self) {}

        fn stop(&self) -> ServiceFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = ServiceRegistry::new(vec![
            Arc::new(Named("b")),
            Arc::new(Named("a")),
            Arc::new(Named("c")),
        ])
        .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["b", "a", "c"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let err = ServiceRegistry::new(vec![Arc::new(Named("api")), Arc::new(Named("api"))])
            .err()
            .unwrap();
        assert!(matches!(err, Error::DuplicateService(ref name) if name == "api"));
    }

    #[test]
    fn empty_registry_is_valid() {
        let registry = ServiceRegistry::new(Vec::new()).unwrap();
        assert!(registry.is_empty());
    }
}
