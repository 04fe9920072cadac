//! Namespace registry and message dispatch.
//!
//! Every inbound message that the lifecycle controller does not consume
//! itself goes through [`MessageRouter::dispatch`]. A namespace maps to
//! exactly one [`Route`]: either one of the controller's own handlers or an
//! externally registered [`MessageHandler`].

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::message::Envelope;
use crate::models::namespace;
use crate::{AppError, Result};

/// Namespaces the lifecycle controller handles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalNamespace {
    /// `display`
    Display,
    /// `heartbeat`
    Heartbeat,
    /// `browser`
    Browser,
    /// `system`
    System,
    /// `clipboard`
    Clipboard,
    /// `childProcess`
    ChildProcess,
    /// `mediaStream`
    Media,
}

impl InternalNamespace {
    /// Every internal namespace, in registration order.
    pub const ALL: [Self; 7] = [
        Self::Display,
        Self::Heartbeat,
        Self::Browser,
        Self::System,
        Self::Clipboard,
        Self::ChildProcess,
        Self::Media,
    ];

    /// Wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Display => namespace::DISPLAY,
            Self::Heartbeat => namespace::HEARTBEAT,
            Self::Browser => namespace::BROWSER,
            Self::System => namespace::SYSTEM,
            Self::Clipboard => namespace::CLIPBOARD,
            Self::ChildProcess => namespace::CHILD_PROCESS,
            Self::Media => namespace::MEDIA,
        }
    }
}

/// Handler for an externally registered namespace.
///
/// Returned envelopes are posted back to the primary worker.
pub trait MessageHandler: Send {
    /// Handle one message.
    fn handle(&mut self, envelope: Envelope) -> Vec<Envelope>;
}

/// Forward every message to a channel; never replies.
impl MessageHandler for mpsc::UnboundedSender<Envelope> {
    fn handle(&mut self, envelope: Envelope) -> Vec<Envelope> {
        if self.send(envelope).is_err() {
            debug!("namespace forwarder closed, dropping message");
        }
        Vec::new()
    }
}

/// Destination of a registered namespace.
pub enum Route {
    /// Handled by the lifecycle controller.
    Internal(InternalNamespace),
    /// Handled by an external subsystem.
    External(Box<dyn MessageHandler>),
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal(ns) => f.debug_tuple("Internal").field(ns).finish(),
            Self::External(_) => f.write_str("External(..)"),
        }
    }
}

/// Outcome of [`MessageRouter::dispatch`].
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// The controller must handle this itself.
    Internal(InternalNamespace, Envelope),
    /// An external handler ran; post these replies.
    Replies(Vec<Envelope>),
    /// Nobody is registered for the namespace.
    Unrouted,
}

/// Namespace string → exactly one route.
#[derive(Debug, Default)]
pub struct MessageRouter {
    routes: HashMap<String, Route>,
    order: Vec<String>,
}

impl MessageRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router with every internal namespace registered.
    #[must_use]
    pub fn with_internal() -> Self {
        let mut router = Self::new();
        for ns in InternalNamespace::ALL {
            router.routes.insert(ns.name().to_owned(), Route::Internal(ns));
            router.order.push(ns.name().to_owned());
        }
        router
    }

    /// Register `route` for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AlreadyRegistered`] if the namespace already has a
    /// route; the existing route stays in place.
    pub fn register(&mut self, namespace: &str, route: Route) -> Result<()> {
        if self.routes.contains_key(namespace) {
            warn!(namespace, "namespace handler already registered");
            return Err(AppError::AlreadyRegistered(namespace.to_owned()));
        }
        self.routes.insert(namespace.to_owned(), route);
        self.order.push(namespace.to_owned());
        Ok(())
    }

    /// Whether `namespace` has a route.
    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.routes.contains_key(namespace)
    }

    /// Registered namespaces in registration order.
    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.order
    }

    /// Route one message.
    pub fn dispatch(&mut self, envelope: Envelope) -> Dispatch {
        match self.routes.get_mut(&envelope.namespace) {
            Some(Route::Internal(ns)) => Dispatch::Internal(*ns, envelope),
            Some(Route::External(handler)) => Dispatch::Replies(handler.handle(envelope)),
            None => {
                warn!(
                    namespace = envelope.namespace,
                    command = envelope.command,
                    "no handler for namespace, dropping message"
                );
                Dispatch::Unrouted
            }
        }
    }
}
