//! Handlers for the namespaces the controller owns.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{AfterClose, ControllerEvent, LifecycleController, MediaSlot, ViewState};
use crate::layout::{minimum_window_size, Rotation};
use crate::models::message::{
    BrowserCommand, ChildProcessCommand, ClipboardCommand, DisplayCommand, Envelope,
    HeartbeatCommand, MediaCommand, MediaKind, MediaRequest, SystemCommand,
};
use crate::models::namespace;
use crate::router::InternalNamespace;
use crate::supervisor::{Relay, Relays};
use crate::Result;

/// Unwrap a parsed command, logging unknown or malformed ones.
fn typed<T>(envelope: &Envelope, parsed: Result<Option<T>>) -> Option<T> {
    match parsed {
        Ok(Some(cmd)) => Some(cmd),
        Ok(None) => {
            info!(
                namespace = envelope.namespace,
                command = envelope.command,
                "unknown command"
            );
            None
        }
        Err(e) => {
            warn!(
                namespace = envelope.namespace,
                command = envelope.command,
                error = %e,
                "malformed message"
            );
            None
        }
    }
}

impl LifecycleController {
    pub(super) fn handle_internal(&mut self, ns: InternalNamespace, envelope: Envelope) {
        match ns {
            InternalNamespace::Display => {
                if let Some(cmd) = typed(&envelope, DisplayCommand::parse(&envelope)) {
                    self.handle_display(cmd);
                }
            }
            InternalNamespace::Heartbeat => {
                if let Some(HeartbeatCommand::Pong) =
                    typed(&envelope, HeartbeatCommand::parse(&envelope))
                {
                    self.heartbeat.on_pong();
                }
            }
            InternalNamespace::Browser => {
                if let Some(BrowserCommand::OpenUrl { url }) =
                    typed(&envelope, BrowserCommand::parse(&envelope))
                {
                    self.open_url(url);
                }
            }
            InternalNamespace::System => {
                if let Some(cmd) = typed(&envelope, SystemCommand::parse(&envelope)) {
                    self.handle_system(cmd);
                }
            }
            InternalNamespace::Clipboard => {
                if typed(&envelope, ClipboardCommand::parse(&envelope)).is_some() {
                    self.run_clipboard(envelope);
                }
            }
            InternalNamespace::ChildProcess => {
                match typed(&envelope, ChildProcessCommand::parse(&envelope)) {
                    Some(ChildProcessCommand::Spawn(request)) => {
                        let actions = self
                            .supervisor
                            .spawn_request(request, Relays::all(Relay::Primary));
                        self.apply(actions);
                    }
                    Some(other) => {
                        info!(?other, "child process message from primary ignored");
                    }
                    None => {}
                }
            }
            InternalNamespace::Media => {
                if let Some(cmd) = typed(&envelope, MediaCommand::parse(&envelope)) {
                    self.handle_media(cmd);
                }
            }
        }
    }

    // ── display ──────────────────────────────────────────────────────────────

    fn handle_display(&mut self, cmd: DisplayCommand) {
        match cmd {
            DisplayCommand::Config { rotation } => self.set_rotation(rotation),
            DisplayCommand::SetBackButtonUiEnabled { enable } => {
                if self.metadata.disable_auto_back_button {
                    debug!(enable, "back button managed by metadata");
                } else {
                    self.back_button_enabled = enable;
                }
            }
            DisplayCommand::ShowNoGpu => self.show_not_supported(),
        }
    }

    fn set_rotation(&mut self, degrees: i64) {
        if self.layout.rotation.degrees() == degrees {
            return;
        }
        let rotation = match Rotation::try_from(degrees) {
            Ok(rotation) => rotation,
            Err(e) => {
                info!(error = %e, "ignoring rotation request");
                return;
            }
        };
        info!(degrees, "rotating display");
        let minimum = minimum_window_size(
            self.target_size(),
            rotation,
            self.chrome_height(),
            self.window.zoom(),
        );
        self.window.set_minimum_size(minimum);
        self.layout.rotation = rotation;
        self.relayout(false);
    }

    fn show_not_supported(&mut self) {
        error!("host has no usable GPU");
        self.remove_primary();
        self.initialize_window();
        self.view = ViewState::NotSupported;
    }

    // ── system ───────────────────────────────────────────────────────────────

    fn handle_system(&mut self, cmd: SystemCommand) {
        match cmd {
            SystemCommand::Reboot => {
                info!("worker requested reboot");
                self.close_window();
                self.after_close = Some(AfterClose::Reload);
            }
            SystemCommand::ShutDown => {
                info!("worker requested shutdown");
                self.close_window();
            }
            SystemCommand::ActivityStackEmpty => {
                if self.metadata.allow_empty_activity_stack {
                    debug!("activity stack empty, staying open");
                } else {
                    info!("activity stack empty, closing");
                    self.close_window();
                }
            }
            SystemCommand::EnableCrashReporting { enabled } => {
                info!(enabled, "crash reporting setting received");
                self.crash_queue.set_enabled(enabled);
            }
        }
    }

    // ── browser / clipboard ──────────────────────────────────────────────────

    fn open_url(&self, url: String) {
        let services = Arc::clone(&self.services);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = services.open_url(url).await {
                warn!(error = %e, "open url failed");
                let reply = Envelope::service_error(namespace::BROWSER, "openUrl", &e.to_string());
                let _ = tx.send(ControllerEvent::ServiceReply(reply)).await;
            }
        });
    }

    fn run_clipboard(&self, request: Envelope) {
        let services = Arc::clone(&self.services);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let command = request.command.clone();
            let reply = match services.clipboard(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(command, error = %e, "clipboard request failed");
                    Envelope::service_error(namespace::CLIPBOARD, &command, &e.to_string())
                }
            };
            let _ = tx.send(ControllerEvent::ServiceReply(reply)).await;
        });
    }

    // ── mediaStream ──────────────────────────────────────────────────────────

    fn handle_media(&mut self, cmd: MediaCommand) {
        match cmd {
            MediaCommand::Open(kind, request) => {
                if self.media.contains_key(&kind) {
                    info!(kind = kind.prefix(), "capture track already open");
                    self.reply_media(kind, true, &request, Value::Null);
                    return;
                }
                self.media_generation += 1;
                let generation = self.media_generation;
                self.media.insert(kind, MediaSlot::Opening(generation));
                let services = Arc::clone(&self.services);
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let track = match services.open_media(kind).await {
                        Ok(track) => Some(track),
                        Err(e) => {
                            warn!(kind = kind.prefix(), error = %e, "failed to open capture track");
                            None
                        }
                    };
                    let _ = tx
                        .send(ControllerEvent::MediaOpened {
                            kind,
                            generation,
                            request,
                            track,
                        })
                        .await;
                });
            }
            MediaCommand::Close(kind, request) => {
                // An open still in flight is stopped when it completes.
                if self.media.remove(&kind) == Some(MediaSlot::Open) {
                    self.stop_media(kind);
                }
                self.reply_media(kind, false, &request, Value::Bool(true));
            }
        }
    }

    pub(super) fn on_media_opened(
        &mut self,
        kind: MediaKind,
        generation: u64,
        request: &MediaRequest,
        track: Option<Value>,
    ) {
        let current = self.media.get(&kind) == Some(&MediaSlot::Opening(generation));
        match track {
            Some(track) if current => {
                self.media.insert(kind, MediaSlot::Open);
                self.reply_media(kind, true, request, track);
            }
            Some(_) => {
                // Closed while opening, possibly reopened since.
                debug!(kind = kind.prefix(), generation, "stale capture track stopped");
                self.stop_media(kind);
                self.reply_media(kind, true, request, Value::Null);
            }
            None => {
                if current {
                    self.media.remove(&kind);
                }
                self.reply_media(kind, true, request, Value::Null);
            }
        }
    }

    fn stop_media(&self, kind: MediaKind) {
        let services = Arc::clone(&self.services);
        tokio::spawn(async move {
            if let Err(e) = services.close_media(kind).await {
                warn!(kind = kind.prefix(), error = %e, "failed to stop capture track");
            }
        });
    }

    fn reply_media(&self, kind: MediaKind, opened: bool, request: &MediaRequest, result: Value) {
        self.forward_to_worker(MediaCommand::reply(kind, opened, request, result));
    }
}
