//! Host collaborators.
//!
//! The lifecycle controller never talks to a windowing system or to host
//! services directly. It drives a [`WindowHost`] for geometry and window
//! state, and a [`HostServices`] implementation for anything that may block
//! (opening URLs, clipboard, capture devices, relaunching).
//!
//! [`HeadlessWindow`] and [`LocalHostServices`] are the implementations the
//! binary uses when no real window system is attached; both keep their
//! state behind an `Arc` so clones observe the same window.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tracing::info;

use crate::layout::Size;
use crate::models::message::{Envelope, MediaKind};
use crate::models::namespace;
use crate::{AppError, Result};

/// Boxed future returned by [`HostServices`] calls.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// The window hosting the primary worker's surface.
pub trait WindowHost: Send {
    /// Inner bounds of the window in host DIPs.
    fn bounds(&self) -> Size;
    /// Resize the window.
    fn resize(&mut self, size: Size);
    /// Constrain how small the user may make the window.
    fn set_minimum_size(&mut self, size: Size);
    /// Make the window visible.
    fn show(&mut self);
    /// Close the window.
    fn close(&mut self);
    /// Whether the window is maximized.
    fn is_maximized(&self) -> bool;
    /// Whether the window is minimized.
    fn is_minimized(&self) -> bool;
    /// Whether the window is fullscreen.
    fn is_fullscreen(&self) -> bool;
    /// Current page zoom.
    fn zoom(&self) -> f64;
}

/// Asynchronous host services.
///
/// Every call may take arbitrarily long; the controller runs them on
/// separate tasks and posts the results back into its event loop.
pub trait HostServices: Send + Sync {
    /// Open `url` in the host browser.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] if the URL cannot be opened.
    fn open_url(&self, url: String) -> HostFuture<'_, ()>;

    /// Run a `clipboard/pushhost` or `clipboard/pullhost` request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] if the clipboard is unavailable.
    fn clipboard(&self, request: Envelope) -> HostFuture<'_, Envelope>;

    /// Open a capture track; the value describes the track.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] if the device cannot be opened.
    fn open_media(&self, kind: MediaKind) -> HostFuture<'_, Value>;

    /// Stop a capture track.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] on failure.
    fn close_media(&self, kind: MediaKind) -> HostFuture<'_, ()>;

    /// Start the app again after a crash.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] on failure.
    fn relaunch(&self) -> HostFuture<'_, ()>;

    /// Reload the whole bridge.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Service`] on failure.
    fn reload(&self) -> HostFuture<'_, ()>;

    /// Whether this is a production install.
    fn is_production_install(&self) -> bool;
}

// ── Headless window ──────────────────────────────────────────────────────────

/// Observable state of a [`HeadlessWindow`].
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    /// Inner bounds.
    pub bounds: Size,
    /// Last minimum size requested.
    pub minimum_size: Option<Size>,
    /// Number of resize requests.
    pub resize_count: usize,
    /// Shown at least once.
    pub visible: bool,
    /// Closed.
    pub closed: bool,
    /// Maximized flag.
    pub maximized: bool,
    /// Minimized flag.
    pub minimized: bool,
    /// Fullscreen flag.
    pub fullscreen: bool,
    /// Page zoom.
    pub zoom: f64,
}

/// Window stand-in without a display.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    state: Arc<Mutex<WindowState>>,
}

impl HeadlessWindow {
    /// Create a window with the given inner bounds.
    #[must_use]
    pub fn new(bounds: Size) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                bounds,
                minimum_size: None,
                resize_count: 0,
                visible: false,
                closed: false,
                maximized: false,
                minimized: false,
                fullscreen: false,
                zoom: 1.0,
            })),
        }
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> WindowState {
        lock(&self.state).clone()
    }

    /// Simulate the user resizing the window.
    pub fn set_bounds(&self, bounds: Size) {
        lock(&self.state).bounds = bounds;
    }

    /// Simulate a zoom change.
    pub fn set_zoom(&self, zoom: f64) {
        lock(&self.state).zoom = zoom;
    }

    /// Simulate maximizing or restoring.
    pub fn set_maximized(&self, maximized: bool) {
        lock(&self.state).maximized = maximized;
    }
}

impl WindowHost for HeadlessWindow {
    fn bounds(&self) -> Size {
        lock(&self.state).bounds
    }

    fn resize(&mut self, size: Size) {
        let mut state = lock(&self.state);
        state.bounds = size;
        state.resize_count += 1;
    }

    fn set_minimum_size(&mut self, size: Size) {
        lock(&self.state).minimum_size = Some(size);
    }

    fn show(&mut self) {
        lock(&self.state).visible = true;
    }

    fn close(&mut self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.visible = false;
    }

    fn is_maximized(&self) -> bool {
        lock(&self.state).maximized
    }

    fn is_minimized(&self) -> bool {
        lock(&self.state).minimized
    }

    fn is_fullscreen(&self) -> bool {
        lock(&self.state).fullscreen
    }

    fn zoom(&self) -> f64 {
        lock(&self.state).zoom
    }
}

// ── Local services ───────────────────────────────────────────────────────────

/// Host services backed by process-local state.
///
/// URLs and lifecycle requests are logged; the clipboard is an in-memory
/// string; capture devices are unavailable.
#[derive(Debug, Default)]
pub struct LocalHostServices {
    production: bool,
    clipboard: Mutex<Value>,
}

impl LocalHostServices {
    /// Create local services; `production` controls crash handling.
    #[must_use]
    pub fn new(production: bool) -> Self {
        Self {
            production,
            clipboard: Mutex::new(Value::Null),
        }
    }
}

impl HostServices for LocalHostServices {
    fn open_url(&self, url: String) -> HostFuture<'_, ()> {
        Box::pin(async move {
            info!(url, "open url requested");
            Ok(())
        })
    }

    fn clipboard(&self, request: Envelope) -> HostFuture<'_, Envelope> {
        Box::pin(async move {
            match request.command.as_str() {
                "pushhost" => {
                    *lock(&self.clipboard) = request.data;
                    Ok(Envelope::new(namespace::CLIPBOARD, "pushhostResponse", json!({})))
                }
                "pullhost" => {
                    let data = lock(&self.clipboard).clone();
                    Ok(Envelope::new(namespace::CLIPBOARD, "pullhostResponse", data))
                }
                other => Err(AppError::Service(format!("unknown clipboard command {other}"))),
            }
        })
    }

    fn open_media(&self, kind: MediaKind) -> HostFuture<'_, Value> {
        Box::pin(async move {
            Err(AppError::Service(format!(
                "no {} capture device available",
                kind.prefix()
            )))
        })
    }

    fn close_media(&self, _kind: MediaKind) -> HostFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn relaunch(&self) -> HostFuture<'_, ()> {
        Box::pin(async {
            info!("relaunch requested");
            Ok(())
        })
    }

    fn reload(&self) -> HostFuture<'_, ()> {
        Box::pin(async {
            info!("reload requested");
            Ok(())
        })
    }

    fn is_production_install(&self) -> bool {
        self.production
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
