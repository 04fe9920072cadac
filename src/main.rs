#![forbid(unsafe_code)]

//! `worker-bridge` binary.
//!
//! Loads configuration, merges application metadata, then runs the
//! lifecycle controller with child-process workers, a headless window and
//! local host services until the window closes or a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use worker_bridge::config::GlobalConfig;
use worker_bridge::controller::{ControllerDeps, LifecycleController};
use worker_bridge::crash_queue::{CrashQueue, CrashQueueOptions, LoggingUploader};
use worker_bridge::host::{HeadlessWindow, LocalHostServices};
use worker_bridge::layout::Size;
use worker_bridge::metadata::AppMetadata;
use worker_bridge::transport::process::ProcessTransportFactory;
use worker_bridge::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "worker-bridge", about = "Sandboxed runtime worker bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the initial window width.
    #[arg(long)]
    window_width: Option<u32>,

    /// Override the initial window height.
    #[arg(long)]
    window_height: Option<u32>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("worker-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(width) = args.window_width {
        config.window.width = Some(width);
    }
    if let Some(height) = args.window_height {
        config.window.height = Some(height);
    }
    config.validate()?;
    info!("configuration loaded");

    let (metadata, diagnostics) =
        AppMetadata::merge(&config.metadata, config.window.device_pixel_ratio);
    info!(
        package = metadata.package_name,
        width = metadata.width,
        height = metadata.height,
        density_dpi = metadata.density_dpi,
        diagnostics = diagnostics.len(),
        "metadata merged"
    );

    // ── Collaborators ───────────────────────────────────
    let transports = Arc::new(ProcessTransportFactory::new(
        &config.worker,
        metadata.shared_attributes(),
    ));
    let window = HeadlessWindow::new(Size::new(
        f64::from(config.window.width.unwrap_or(metadata.width)),
        f64::from(
            config
                .window
                .height
                .unwrap_or(metadata.height + config.window.chrome_height),
        ),
    ));
    let services = Arc::new(LocalHostServices::new(config.window.production));
    let crash_queue = CrashQueue::new(
        CrashQueueOptions {
            path: config.crash.queue_path.clone(),
            max_age: config.crash.max_report_age(),
            production: config.window.production,
            app_name: metadata.name.clone(),
            package_name: metadata.package_name.clone(),
        },
        Box::new(LoggingUploader),
    );

    let controller = LifecycleController::new(
        config,
        metadata,
        ControllerDeps {
            transports,
            window: Box::new(window),
            services,
            crash_queue,
        },
    );

    // ── Run until closed or signalled ───────────────────
    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    let signal_handle = tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let controller = controller.run(ct).await;
    signal_handle.abort();

    info!(
        boot_step = controller.boot_step().value(),
        view = ?controller.view_state(),
        "worker-bridge shut down"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
