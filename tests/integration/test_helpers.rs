//! Shared helpers for controller and supervisor integration tests.
//!
//! Controllers run against the in-memory transport factory, a headless
//! window and [`RecordingServices`], so tests can play the worker's side
//! and observe every host-side effect.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use worker_bridge::config::GlobalConfig;
use worker_bridge::controller::{ControllerDeps, ControllerHandle, LifecycleController};
use worker_bridge::crash_queue::{CrashQueue, CrashQueueOptions, LoggingUploader};
use worker_bridge::host::{HeadlessWindow, HostFuture, HostServices, LocalHostServices};
use worker_bridge::layout::Size;
use worker_bridge::metadata::AppMetadata;
use worker_bridge::models::descriptor::WorkerDescriptor;
use worker_bridge::models::message::{Envelope, MediaKind};
use worker_bridge::transport::memory::{MemoryTransportFactory, MemoryWorker};
use worker_bridge::AppError;

/// Everything [`RecordingServices`] was asked to do.
#[derive(Debug, Default, Clone)]
pub struct ServiceLog {
    pub urls: Vec<String>,
    pub opened_media: Vec<MediaKind>,
    pub closed_media: Vec<MediaKind>,
    pub relaunches: usize,
    pub reloads: usize,
}

/// Host services that record calls; URLs containing `fail` are rejected.
pub struct RecordingServices {
    production: bool,
    media_track: Option<Value>,
    media_gate: Option<Arc<Semaphore>>,
    clipboard: LocalHostServices,
    log: Mutex<ServiceLog>,
}

impl RecordingServices {
    pub fn new(production: bool) -> Self {
        Self {
            production,
            media_track: Some(json!({ "id": "track-1" })),
            media_gate: None,
            clipboard: LocalHostServices::new(production),
            log: Mutex::new(ServiceLog::default()),
        }
    }

    pub fn without_media(mut self) -> Self {
        self.media_track = None;
        self
    }

    /// Hold every `open_media` call until [`Self::release_media`] lets it through.
    pub fn gated_media(mut self) -> Self {
        self.media_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release_media(&self, calls: usize) {
        if let Some(gate) = &self.media_gate {
            gate.add_permits(calls);
        }
    }

    pub fn log(&self) -> ServiceLog {
        self.log.lock().unwrap().clone()
    }
}

impl HostServices for RecordingServices {
    fn open_url(&self, url: String) -> HostFuture<'_, ()> {
        Box::pin(async move {
            let failing = url.contains("fail");
            self.log.lock().unwrap().urls.push(url);
            if failing {
                return Err(AppError::Service("no browser".into()));
            }
            Ok(())
        })
    }

    fn clipboard(&self, request: Envelope) -> HostFuture<'_, Envelope> {
        self.clipboard.clipboard(request)
    }

    fn open_media(&self, kind: MediaKind) -> HostFuture<'_, Value> {
        Box::pin(async move {
            self.log.lock().unwrap().opened_media.push(kind);
            if let Some(gate) = &self.media_gate {
                gate.acquire().await.unwrap().forget();
            }
            self.media_track
                .clone()
                .ok_or_else(|| AppError::Service("no capture device".into()))
        })
    }

    fn close_media(&self, kind: MediaKind) -> HostFuture<'_, ()> {
        Box::pin(async move {
            self.log.lock().unwrap().closed_media.push(kind);
            Ok(())
        })
    }

    fn relaunch(&self) -> HostFuture<'_, ()> {
        Box::pin(async move {
            self.log.lock().unwrap().relaunches += 1;
            Ok(())
        })
    }

    fn reload(&self) -> HostFuture<'_, ()> {
        Box::pin(async move {
            self.log.lock().unwrap().reloads += 1;
            Ok(())
        })
    }

    fn is_production_install(&self) -> bool {
        self.production
    }
}

/// Log output captured from the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Capture everything logged on this thread until the guard drops.
    ///
    /// Tasks spawned on a current-thread runtime log through the same
    /// subscriber.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn contains(&self, needle: &str) -> bool {
        String::from_utf8_lossy(&self.0.lock().unwrap()).contains(needle)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Default test configuration, optionally patched with extra TOML.
pub fn test_config(extra: &str) -> GlobalConfig {
    GlobalConfig::from_toml_str(extra).expect("valid test config")
}

/// Test crash queue that never touches the disk.
pub fn test_crash_queue(production: bool) -> CrashQueue {
    CrashQueue::new(
        CrashQueueOptions {
            path: None,
            max_age: chrono::Duration::days(5),
            production,
            app_name: "Notes".into(),
            package_name: "com.example.notes".into(),
        },
        Box::new(LoggingUploader),
    )
}

/// A controller running on its own task.
pub struct Running {
    pub factory: MemoryTransportFactory,
    pub window: HeadlessWindow,
    pub services: Arc<RecordingServices>,
    pub handle: ControllerHandle,
    pub cancel: CancellationToken,
    task: JoinHandle<LifecycleController>,
}

/// Build a controller over test doubles without starting it.
pub fn build_controller(
    config: GlobalConfig,
    metadata: AppMetadata,
    services: RecordingServices,
) -> (
    LifecycleController,
    MemoryTransportFactory,
    HeadlessWindow,
    Arc<RecordingServices>,
) {
    let factory = MemoryTransportFactory::new();
    let window = HeadlessWindow::new(Size::new(
        f64::from(metadata.width),
        f64::from(metadata.height + config.window.chrome_height),
    ));
    let services = Arc::new(services);
    let production = services.is_production_install();
    let controller = LifecycleController::new(
        config,
        metadata,
        ControllerDeps {
            transports: Arc::new(factory.clone()),
            window: Box::new(window.clone()),
            services: Arc::clone(&services) as Arc<dyn HostServices>,
            crash_queue: test_crash_queue(production),
        },
    );
    (controller, factory, window, services)
}

/// Start a controller with default metadata on its own task.
pub fn spawn_controller(config: GlobalConfig, services: RecordingServices) -> Running {
    spawn_controller_with(config, AppMetadata::default(), services)
}

/// Start a controller with explicit metadata on its own task.
pub fn spawn_controller_with(
    config: GlobalConfig,
    metadata: AppMetadata,
    services: RecordingServices,
) -> Running {
    let (controller, factory, window, services) = build_controller(config, metadata, services);
    let handle = controller.handle();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(controller.run(cancel.clone()));
    Running {
        factory,
        window,
        services,
        handle,
        cancel,
        task,
    }
}

impl Running {
    /// The primary worker's memory transport, once launched.
    pub async fn primary(&self) -> MemoryWorker {
        let factory = self.factory.clone();
        wait_until(move || factory.latest("app").is_some()).await;
        self.factory.latest("app").expect("primary launched")
    }

    /// Launch the primary and report a successful load.
    pub async fn ready_primary(&self) -> MemoryWorker {
        let primary = self.primary().await;
        primary
            .inject_message(runtime("loadResult", json!({ "result": true })))
            .await;
        let watched = primary.clone();
        wait_until(move || {
            watched
                .sent()
                .iter()
                .any(|e| e.command == "registerNamespaces")
        })
        .await;
        primary
    }

    /// Wait for the controller to stop by itself.
    pub async fn join(self) -> LifecycleController {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("controller stopped in time")
            .expect("controller task")
    }

    /// Ask the controller to stop and wait for it.
    pub async fn finish(self) -> LifecycleController {
        self.cancel.cancel();
        self.join().await
    }
}

/// Poll `cond` until it holds, yielding 1 ms between checks.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

/// Envelopes `worker` received in `namespace` with `command`.
pub fn sent_matching(worker: &MemoryWorker, namespace: &str, command: &str) -> Vec<Envelope> {
    worker
        .sent()
        .into_iter()
        .filter(|e| e.namespace == namespace && e.command == command)
        .collect()
}

/// Build a `runtime` envelope.
pub fn runtime(command: &str, data: Value) -> Envelope {
    Envelope::new("runtime", command, data)
}

/// Descriptor for a child worker requested by `requester`.
pub fn child_descriptor(plugin: &str, requester: &str, request_id: i64) -> WorkerDescriptor {
    WorkerDescriptor {
        plugin: plugin.into(),
        args: vec![plugin.into()],
        envs: None,
        cwd: None,
        preopened: None,
        requester: requester.into(),
        request_id,
    }
}
