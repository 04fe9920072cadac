//! Lifecycle controller.
//!
//! Root component of the bridge. The controller owns the primary worker's
//! transport, the [`MessageRouter`], the [`Supervisor`] and every piece of
//! lifecycle state (boot progress, heartbeat, crash bookkeeping, layout).
//! [`LifecycleController::run`] is a single task: transports, timers and
//! host-service calls only ever send events into its channels, so all
//! mutation happens here and every handler runs to completion.

pub mod boot;
pub mod crash;
mod handlers;
pub mod heartbeat;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GlobalConfig;
use crate::crash_queue::CrashQueue;
use crate::host::{HostServices, WindowHost};
use crate::layout::{minimum_window_size, Layout, LayoutState, Size};
use crate::metadata::AppMetadata;
use crate::models::descriptor::WorkerDescriptor;
use crate::models::message::{Envelope, MediaKind, MediaRequest, RuntimeCommand};
use crate::models::namespace;
use crate::router::{Dispatch, MessageHandler, MessageRouter, Route};
use crate::supervisor::{Relays, Supervisor, SupervisorAction, SupervisorInbox};
use crate::transport::{
    Delivery, Transport, TransportEvent, TransportFactory, TransportSink, WorkerKey,
    DELIVERY_CHANNEL_CAPACITY,
};
use crate::{AppError, Result};

use self::boot::{BootProgress, BootStep};
use self::crash::{window_diagnostics, CrashExtras, ShutdownLatch, ShutdownReport};
use self::heartbeat::{HeartbeatAction, HeartbeatMonitor};

/// Worker id reserved for the primary worker; supervised ids start at 1.
pub const PRIMARY_WORKER_ID: u64 = 0;

/// What the window currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewState {
    /// The worker surface.
    #[default]
    Running,
    /// The crash placeholder.
    Crashed,
    /// The "not supported" placeholder.
    NotSupported,
}

/// Host action performed once the window is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterClose {
    /// Start the app again.
    Relaunch,
    /// Reload the whole bridge.
    Reload,
}

/// Events posted into the controller from its own tasks and timers.
#[derive(Debug, Clone)]
pub(crate) enum ControllerEvent {
    HeartbeatTick,
    ServiceReply(Envelope),
    MediaOpened {
        kind: MediaKind,
        generation: u64,
        request: MediaRequest,
        track: Option<Value>,
    },
}

/// Requests from the embedding host.
pub enum HostEvent {
    /// The window was resized or zoomed.
    Resized,
    /// The user closed the window.
    CloseRequested,
    /// Post a message to the primary worker.
    Post(Envelope),
    /// Register an external namespace handler.
    RegisterNamespace {
        /// Namespace to claim.
        namespace: String,
        /// Handler receiving its messages.
        handler: Box<dyn MessageHandler>,
    },
    /// Spawn a worker on behalf of the host.
    Spawn {
        /// What to launch.
        descriptor: WorkerDescriptor,
        /// Where its output goes.
        relays: Relays,
    },
}

impl std::fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resized => f.write_str("Resized"),
            Self::CloseRequested => f.write_str("CloseRequested"),
            Self::Post(env) => f.debug_tuple("Post").field(env).finish(),
            Self::RegisterNamespace { namespace, .. } => f
                .debug_struct("RegisterNamespace")
                .field("namespace", namespace)
                .finish_non_exhaustive(),
            Self::Spawn { descriptor, .. } => f
                .debug_struct("Spawn")
                .field("descriptor", descriptor)
                .finish_non_exhaustive(),
        }
    }
}

/// Cloneable sender for [`HostEvent`]s into a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<HostEvent>,
}

impl ControllerHandle {
    /// Send one host event.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotReady`] once the controller has stopped.
    pub async fn send(&self, event: HostEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AppError::NotReady("controller stopped".into()))
    }

    /// Notify the controller that the window geometry changed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotReady`] once the controller has stopped.
    pub async fn resized(&self) -> Result<()> {
        self.send(HostEvent::Resized).await
    }

    /// Ask the controller to close the window.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotReady`] once the controller has stopped.
    pub async fn close(&self) -> Result<()> {
        self.send(HostEvent::CloseRequested).await
    }

    /// Post `envelope` to the primary worker.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotReady`] once the controller has stopped.
    pub async fn post(&self, envelope: Envelope) -> Result<()> {
        self.send(HostEvent::Post(envelope)).await
    }

    /// Register an external namespace handler.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotReady`] once the controller has stopped.
    pub async fn register_namespace(
        &self,
        namespace: impl Into<String>,
        handler: Box<dyn MessageHandler>,
    ) -> Result<()> {
        self.send(HostEvent::RegisterNamespace {
            namespace: namespace.into(),
            handler,
        })
        .await
    }
}

/// Collaborators injected into the controller.
pub struct ControllerDeps {
    /// Launches the primary worker and every child worker.
    pub transports: Arc<dyn TransportFactory>,
    /// Window hosting the worker surface.
    pub window: Box<dyn WindowHost>,
    /// Asynchronous host services.
    pub services: Arc<dyn HostServices>,
    /// Crash-report queue.
    pub crash_queue: CrashQueue,
}

struct PrimaryWorker {
    key: WorkerKey,
    transport: Box<dyn Transport>,
    ready: bool,
}

struct Channels {
    primary: mpsc::Receiver<Delivery>,
    controller: mpsc::Receiver<ControllerEvent>,
    host: mpsc::Receiver<HostEvent>,
    supervisor: SupervisorInbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaSlot {
    /// Waiting on the open call tagged with this generation.
    Opening(u64),
    Open,
}

/// Root lifecycle component; see the module docs.
pub struct LifecycleController {
    config: GlobalConfig,
    metadata: AppMetadata,
    router: MessageRouter,
    supervisor: Supervisor,
    transports: Arc<dyn TransportFactory>,
    window: Box<dyn WindowHost>,
    services: Arc<dyn HostServices>,
    crash_queue: CrashQueue,

    primary: Option<PrimaryWorker>,
    primary_attempt: u32,
    primary_tx: mpsc::Sender<Delivery>,
    events_tx: mpsc::Sender<ControllerEvent>,
    host_tx: mpsc::Sender<HostEvent>,
    channels: Option<Channels>,

    boot: BootProgress,
    heartbeat: HeartbeatMonitor,
    crash_extras: CrashExtras,
    shutdown: ShutdownLatch,
    crash_report_received: bool,
    layout: LayoutState,
    view: ViewState,
    back_button_enabled: bool,
    media: HashMap<MediaKind, MediaSlot>,
    media_generation: u64,
    started_at: Instant,
    started: bool,
    window_initialized: bool,
    closed: bool,
    after_close: Option<AfterClose>,
}

impl LifecycleController {
    /// Build a controller with every internal namespace registered.
    ///
    /// Nothing is launched until [`start`](Self::start) or
    /// [`run`](Self::run).
    #[must_use]
    pub fn new(config: GlobalConfig, metadata: AppMetadata, deps: ControllerDeps) -> Self {
        let (supervisor, supervisor_inbox) =
            Supervisor::new(Arc::clone(&deps.transports), &config.supervisor);
        let (primary_tx, primary_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let (host_tx, host_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let heartbeat = HeartbeatMonitor::new(config.heartbeat.period());

        Self {
            metadata,
            router: MessageRouter::with_internal(),
            supervisor,
            transports: deps.transports,
            window: deps.window,
            services: deps.services,
            crash_queue: deps.crash_queue,
            primary: None,
            primary_attempt: 0,
            primary_tx,
            events_tx,
            host_tx,
            channels: Some(Channels {
                primary: primary_rx,
                controller: events_rx,
                host: host_rx,
                supervisor: supervisor_inbox,
            }),
            boot: BootProgress::default(),
            heartbeat,
            crash_extras: CrashExtras::default(),
            shutdown: ShutdownLatch::default(),
            crash_report_received: false,
            layout: LayoutState::default(),
            view: ViewState::Running,
            back_button_enabled: false,
            media: HashMap::new(),
            media_generation: 0,
            started_at: Instant::now(),
            started: false,
            window_initialized: false,
            closed: false,
            after_close: None,
            config,
        }
    }

    /// Handle for sending host events once the controller runs.
    #[must_use]
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.host_tx.clone(),
        }
    }

    /// Load the crash queue, launch the primary worker and show the window.
    ///
    /// Idempotent; [`run`](Self::run) calls it.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.started_at = Instant::now();

        if let Err(e) = self.crash_queue.init() {
            warn!(error = %e, "failed to load pending crash reports");
        }

        self.launch_primary();
        self.boot.set(BootStep::ScriptsInitialized.value());
        self.initialize_window();
    }

    /// Drive the controller until the window closes or `cancel` fires.
    ///
    /// Returns the controller so its final state can be inspected.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        let Some(mut channels) = self.channels.take() else {
            error!("controller event loop already ran");
            return self;
        };
        self.start();

        while !self.closed {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                Some(event) = channels.host.recv() => self.handle_host_event(event),
                Some(delivery) = channels.primary.recv() => self.handle_primary_delivery(delivery),
                Some(delivery) = channels.supervisor.deliveries.recv() => {
                    let actions = self.supervisor.handle_delivery(delivery);
                    self.apply(actions);
                }
                Some(key) = channels.supervisor.timeouts.recv() => {
                    let actions = self.supervisor.handle_timeout(key);
                    self.apply(actions);
                }
                Some(event) = channels.controller.recv() => self.handle_event(event),
            }
        }

        self.close_window();
        self.supervisor.shutdown();

        if let Some(action) = self.after_close {
            let services = Arc::clone(&self.services);
            let outcome = match action {
                AfterClose::Relaunch => services.relaunch().await,
                AfterClose::Reload => services.reload().await,
            };
            if let Err(e) = outcome {
                error!(?action, error = %e, "post-close action failed");
            }
        }
        info!("controller stopped");
        self
    }

    // ── Public operations ────────────────────────────────────────────────────

    /// Register an external handler for `namespace`.
    ///
    /// If the primary worker is already ready, the namespace is announced to
    /// it right away.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AlreadyRegistered`] if the namespace is taken.
    pub fn register_namespace(
        &mut self,
        namespace: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<()> {
        self.router.register(namespace, Route::External(handler))?;
        info!(namespace, "namespace registered");
        if self.is_primary_ready() {
            self.post_to_worker(Envelope::register_namespaces(&[namespace.to_owned()]))?;
        }
        Ok(())
    }

    /// Send `envelope` to the primary worker.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotReady`] if the worker has not reported a
    /// successful load (the message is dropped), or the transport's error.
    pub fn post_to_worker(&self, envelope: Envelope) -> Result<()> {
        match &self.primary {
            Some(primary) if primary.ready => primary.transport.send(envelope),
            _ => {
                error!(
                    namespace = envelope.namespace,
                    command = envelope.command,
                    "worker not ready, dropping message"
                );
                Err(AppError::NotReady(format!(
                    "{}/{}",
                    envelope.namespace, envelope.command
                )))
            }
        }
    }

    /// Best-effort [`post_to_worker`](Self::post_to_worker) for replies and
    /// relayed traffic; a broken worker pipe is logged and the message dropped.
    pub(crate) fn forward_to_worker(&self, envelope: Envelope) {
        let (namespace, command) = (envelope.namespace.clone(), envelope.command.clone());
        match self.post_to_worker(envelope) {
            Ok(()) | Err(AppError::NotReady(_)) => {}
            Err(e) => warn!(namespace, command, error = %e, "send to primary worker failed"),
        }
    }

    /// Single crash path: report shutdown, file the crash report and, on
    /// production installs, close the window and maybe relaunch.
    pub fn report_crash(&mut self, message: &str, minidump: Option<Vec<u8>>) {
        self.report_shutdown(true);

        let mut extra = window_diagnostics(self.window.as_ref());
        extra.extend(self.crash_extras.take());
        self.crash_queue.report(message, minidump, extra);

        if self.services.is_production_install() {
            self.close_window();
            let uptime = self.started_at.elapsed();
            if uptime > self.config.crash.restart_threshold() {
                info!(uptime_ms = uptime.as_millis(), "relaunching after crash");
                self.after_close = Some(AfterClose::Relaunch);
            }
        }
    }

    /// Close the window and stop everything. Idempotent.
    pub fn close_window(&mut self) {
        if self.closed {
            return;
        }
        self.report_shutdown(false);
        self.remove_primary();
        if let Err(e) = self.crash_queue.shut_down() {
            warn!(error = %e, "failed to persist crash queue");
        }
        self.window.close();
        self.closed = true;
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Current boot step.
    #[must_use]
    pub fn boot_step(&self) -> BootStep {
        self.boot.step()
    }

    /// Boot progress details.
    #[must_use]
    pub fn boot_progress(&self) -> &BootProgress {
        &self.boot
    }

    /// What the window shows.
    #[must_use]
    pub fn view_state(&self) -> ViewState {
        self.view
    }

    /// Whether the back button is shown.
    #[must_use]
    pub fn back_button_enabled(&self) -> bool {
        self.back_button_enabled
    }

    /// Whether the primary worker reported a successful load.
    #[must_use]
    pub fn is_primary_ready(&self) -> bool {
        self.primary.as_ref().is_some_and(|p| p.ready)
    }

    /// Whether the primary worker is still attached.
    #[must_use]
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Whether the heartbeat timer runs.
    #[must_use]
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// The recorded shutdown report.
    #[must_use]
    pub fn shutdown_report(&self) -> Option<ShutdownReport> {
        self.shutdown.recorded()
    }

    /// Whether the window was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Host action scheduled for after the window closed.
    #[must_use]
    pub fn after_close(&self) -> Option<AfterClose> {
        self.after_close
    }

    /// Accumulated crash extra fields.
    #[must_use]
    pub fn crash_extras(&self) -> &CrashExtras {
        &self.crash_extras
    }

    /// The crash-report queue.
    #[must_use]
    pub fn crash_queue(&self) -> &CrashQueue {
        &self.crash_queue
    }

    /// The process supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// The namespace registry.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Layout bookkeeping.
    #[must_use]
    pub fn layout(&self) -> &LayoutState {
        &self.layout
    }

    /// Merged application metadata.
    #[must_use]
    pub fn metadata(&self) -> &AppMetadata {
        &self.metadata
    }

    // ── Event handling ───────────────────────────────────────────────────────

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Resized => {
                self.relayout(false);
            }
            HostEvent::CloseRequested => self.close_window(),
            HostEvent::Post(envelope) => {
                self.forward_to_worker(envelope);
            }
            HostEvent::RegisterNamespace { namespace, handler } => {
                if let Err(e) = self.register_namespace(&namespace, handler) {
                    warn!(namespace, error = %e, "namespace registration failed");
                }
            }
            HostEvent::Spawn { descriptor, relays } => {
                self.supervisor.spawn(descriptor, relays);
            }
        }
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::HeartbeatTick => self.on_heartbeat_tick(),
            ControllerEvent::ServiceReply(envelope) => {
                self.forward_to_worker(envelope);
            }
            ControllerEvent::MediaOpened {
                kind,
                generation,
                request,
                track,
            } => self.on_media_opened(kind, generation, &request, track),
        }
    }

    fn handle_primary_delivery(&mut self, delivery: Delivery) {
        let Some(primary) = &self.primary else {
            debug!(attempt = delivery.key.attempt, "event for detached primary ignored");
            return;
        };
        if primary.key != delivery.key {
            debug!(
                stale = delivery.key.attempt,
                current = primary.key.attempt,
                "event from stale primary attempt ignored"
            );
            return;
        }

        match delivery.event {
            TransportEvent::Binary(minidump) => {
                self.crash_report_received = true;
                self.show_crash("captured minidump");
                self.report_crash("captured minidump", Some(minidump));
            }
            TransportEvent::Crash { reason } => {
                self.show_crash(&format!("worker crashed: {reason}"));
                if !self.crash_report_received {
                    self.report_crash("worker crash without minidump", None);
                }
            }
            TransportEvent::Message(envelope) if envelope.namespace == namespace::RUNTIME => {
                self.handle_runtime(&envelope);
            }
            TransportEvent::Message(envelope) => self.dispatch(envelope),
        }
    }

    fn handle_runtime(&mut self, envelope: &Envelope) {
        match RuntimeCommand::parse(envelope) {
            Ok(Some(RuntimeCommand::LoadResult { result: true })) => self.on_primary_ready(),
            Ok(Some(RuntimeCommand::LoadResult { result: false })) => {
                self.show_crash("worker failed to load");
                self.report_crash("loadfailure", None);
            }
            Ok(Some(RuntimeCommand::LogPerfMessage {
                message,
                suppression,
            })) => {
                if !suppression {
                    info!(message, "worker perf");
                }
                let uptime = self.started_at.elapsed();
                if let Some(step) = self.boot.observe(&message, uptime) {
                    debug!(step = step.value(), "boot progress");
                }
            }
            Ok(Some(RuntimeCommand::CrashExtraInformation(fields))) => {
                self.crash_extras.merge(fields);
            }
            Ok(Some(RuntimeCommand::ReportCrash)) => {
                self.report_crash("unhandled worker exception", None);
            }
            Ok(Some(RuntimeCommand::CrashLogMessage)) => {
                error!(data = %envelope.data, "worker crash log");
            }
            Ok(None) => {
                info!(command = envelope.command, "unknown runtime message");
            }
            Err(e) => warn!(error = %e, "malformed runtime message"),
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        debug!(
            namespace = envelope.namespace,
            command = envelope.command,
            "dispatching worker message"
        );
        match self.router.dispatch(envelope) {
            Dispatch::Internal(ns, envelope) => self.handle_internal(ns, envelope),
            Dispatch::Replies(replies) => {
                for reply in replies {
                    self.forward_to_worker(reply);
                }
            }
            Dispatch::Unrouted => {}
        }
    }

    fn apply(&mut self, actions: Vec<SupervisorAction>) {
        for action in actions {
            match action {
                SupervisorAction::ToPrimary(envelope) => {
                    self.forward_to_worker(envelope);
                }
                SupervisorAction::CrashDump { reason, minidump } => {
                    self.crash_queue.report(&reason, Some(minidump), BTreeMap::new());
                }
            }
        }
    }

    // ── Primary worker ───────────────────────────────────────────────────────

    fn launch_primary(&mut self) {
        let key = WorkerKey {
            id: PRIMARY_WORKER_ID,
            attempt: self.primary_attempt,
        };
        let descriptor = self.metadata.primary_descriptor();
        let sink = TransportSink::new(key, self.primary_tx.clone());
        match self.transports.launch(&descriptor, sink) {
            Ok(transport) => {
                info!(label = descriptor.label(), "primary worker launched");
                self.primary = Some(PrimaryWorker {
                    key,
                    transport,
                    ready: false,
                });
            }
            Err(e) => {
                error!(error = %e, "failed to launch primary worker");
                self.show_crash("worker launch failed");
                self.report_crash("worker crash without minidump", None);
            }
        }
    }

    fn on_primary_ready(&mut self) {
        let Some(primary) = &mut self.primary else {
            return;
        };
        if primary.ready {
            debug!("duplicate load result ignored");
            return;
        }
        primary.ready = true;
        info!("primary worker ready");

        let announce = Envelope::register_namespaces(self.router.namespaces());
        if let Err(e) = self.post_to_worker(announce) {
            warn!(error = %e, "failed to announce namespaces");
        }
        self.back_button_enabled = self.metadata.disable_auto_back_button;
        if self.metadata.is_slow_debug_run {
            info!("slow debug run, heartbeat disabled");
        } else {
            self.heartbeat
                .start(self.events_tx.clone(), ControllerEvent::HeartbeatTick);
        }
    }

    fn on_heartbeat_tick(&mut self) {
        match self.heartbeat.on_tick() {
            HeartbeatAction::SendPing => {
                if let Err(e) = self.post_to_worker(Envelope::ping()) {
                    warn!(error = %e, "failed to send heartbeat ping");
                }
            }
            HeartbeatAction::Timeout => {
                error!("heartbeat ping timeout");
                self.show_crash("heartbeat ping timeout");
                self.report_crash("heartbeat ping timeout", None);
            }
            HeartbeatAction::Idle => {}
        }
    }

    fn remove_primary(&mut self) {
        self.heartbeat.stop();
        if let Some(mut primary) = self.primary.take() {
            primary.transport.close();
            self.primary_attempt += 1;
            info!("primary worker removed");
        }
    }

    // ── Crash and shutdown ───────────────────────────────────────────────────

    fn show_crash(&mut self, cause: &str) {
        error!(cause, "worker crashed");
        if self.services.is_production_install() {
            return;
        }
        self.remove_primary();
        self.view = ViewState::Crashed;
    }

    fn report_shutdown(&mut self, is_crash: bool) {
        self.heartbeat.stop();
        let uptime = self.started_at.elapsed();
        self.shutdown.report(is_crash, uptime, self.boot.step());
    }

    // ── Window ───────────────────────────────────────────────────────────────

    fn target_size(&self) -> Size {
        Size::new(
            f64::from(self.metadata.width),
            f64::from(self.metadata.height),
        )
    }

    fn chrome_height(&self) -> f64 {
        f64::from(self.config.window.chrome_height)
    }

    fn initialize_window(&mut self) {
        if self.window_initialized {
            return;
        }
        self.relayout(true);
        self.window.show();
        self.window_initialized = true;
    }

    fn relayout(&mut self, initial: bool) -> Layout {
        let target = self.target_size();
        let chrome = self.chrome_height();
        let zoom = self.window.zoom();
        let layout = self.layout.relayout(
            target,
            chrome,
            self.window.bounds(),
            zoom,
            self.window.is_maximized(),
            initial,
        );
        if initial || layout.zoom_changed {
            self.window.set_minimum_size(minimum_window_size(
                target,
                self.layout.rotation,
                chrome,
                zoom,
            ));
        }
        if layout.resize_window {
            self.window.resize(layout.window_size);
        }
        debug!(surface = ?layout.surface, resize = layout.resize_window, "layout");
        layout
    }
}
