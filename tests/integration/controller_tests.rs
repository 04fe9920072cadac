//! Integration tests for the lifecycle controller, driven from the worker's
//! side through in-memory transports.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use worker_bridge::controller::boot::BootStep;
use worker_bridge::controller::{AfterClose, ViewState};
use worker_bridge::crash_queue::ReportingSetting;
use worker_bridge::layout::{Rotation, Size};
use worker_bridge::metadata::AppMetadata;
use worker_bridge::models::message::{Envelope, MediaKind};
use worker_bridge::models::namespace;
use worker_bridge::transport::memory::MemoryWorker;
use worker_bridge::transport::TransportEvent;
use worker_bridge::AppError;

use super::test_helpers::{
    build_controller, runtime, sent_matching, spawn_controller, spawn_controller_with,
    test_config, wait_until, LogCapture, RecordingServices,
};

/// Round-trip a clipboard pull so everything the worker sent before it has
/// been handled.
async fn sync_with(primary: &MemoryWorker) {
    let before = sent_matching(primary, "clipboard", "pullhostResponse").len();
    primary
        .inject_message(Envelope::new("clipboard", "pullhost", json!({})))
        .await;
    let watched = primary.clone();
    wait_until(move || sent_matching(&watched, "clipboard", "pullhostResponse").len() > before)
        .await;
}

async fn wait_for_command(worker: &MemoryWorker, namespace: &str, command: &str, count: usize) {
    let watched = worker.clone();
    let (ns, cmd) = (namespace.to_owned(), command.to_owned());
    wait_until(move || sent_matching(&watched, &ns, &cmd).len() >= count).await;
}

// ── Readiness and routing ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ready_primary_receives_namespace_announcement() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let window = running.window.clone();
    let primary = running.ready_primary().await;

    let announced = sent_matching(&primary, "messageProxy", "registerNamespaces");
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].data, json!({ "namespaces": namespace::INTERNAL }));
    assert!(window.snapshot().visible);

    let controller = running.finish().await;
    assert_eq!(controller.boot_step(), BootStep::ScriptsInitialized);
    assert!(!controller.back_button_enabled());
    assert!(primary.is_closed());
    assert!(window.snapshot().closed);
}

#[tokio::test]
async fn messages_before_ready_are_dropped() {
    let (mut controller, factory, _window, _services) = build_controller(
        test_config(""),
        AppMetadata::default(),
        RecordingServices::new(false),
    );
    controller.start();
    assert!(controller.has_primary());
    assert!(!controller.is_primary_ready());

    let result = controller.post_to_worker(Envelope::ping());
    assert!(matches!(result, Err(AppError::NotReady(_))));
    assert!(factory.latest("app").expect("primary").sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn external_namespaces_are_announced_and_routed() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new("geolocation", "get", json!({ "id": 1 })))
        .await;
    sync_with(&primary).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    running
        .handle
        .register_namespace("geolocation", Box::new(tx))
        .await
        .expect("registered");
    wait_for_command(&primary, "messageProxy", "registerNamespaces", 2).await;
    let announced = sent_matching(&primary, "messageProxy", "registerNamespaces");
    assert_eq!(announced[1].data, json!({ "namespaces": ["geolocation"] }));

    let (dup_tx, _dup_rx) = mpsc::unbounded_channel();
    running
        .handle
        .register_namespace("display", Box::new(dup_tx))
        .await
        .expect("sent");

    primary
        .inject_message(Envelope::new("geolocation", "get", json!({ "id": 2 })))
        .await;
    let routed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("routed in time")
        .expect("message");
    assert_eq!(routed.data["id"], 2, "message before registration was dropped");

    let controller = running.finish().await;
    assert_eq!(controller.router().namespaces().len(), 8);
    assert_eq!(
        sent_matching(&primary, "messageProxy", "registerNamespaces").len(),
        2,
        "duplicate registration is not announced"
    );
}

#[tokio::test(start_paused = true)]
async fn host_posts_reach_the_ready_primary() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    running
        .handle
        .post(Envelope::new("intent", "view", json!({ "uri": "notes://1" })))
        .await
        .expect("posted");
    wait_for_command(&primary, "intent", "view", 1).await;

    running.finish().await;
}

#[tokio::test(start_paused = true)]
async fn broken_primary_pipe_is_logged_and_the_controller_keeps_running() {
    let (logs, _guard) = LogCapture::install();
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary.hang_up();
    running
        .handle
        .post(Envelope::new("intent", "view", json!({ "uri": "notes://1" })))
        .await
        .expect("posted");
    let watched = logs.clone();
    wait_until(move || watched.contains("send to primary worker failed")).await;

    primary
        .inject_message(Envelope::new(
            "system",
            "enableCrashReporting",
            json!({ "enabled": true }),
        ))
        .await;
    let watched = logs.clone();
    wait_until(move || watched.contains("crash reporting setting received")).await;
    let controller = running.finish().await;
    assert_eq!(controller.crash_queue().setting(), ReportingSetting::Enabled);
    assert!(sent_matching(&primary, "intent", "view").is_empty());
}

// ── Boot progress ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn boot_markers_advance_progress() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    for message in [
        "I/perf: App instance started",
        "I/perf: System server started",
        "I/perf: Activity onResume for .MainActivity",
        "I/perf: Activity onResume for .MainActivity",
    ] {
        primary
            .inject_message(runtime(
                "logPerfMessage",
                json!({ "message": message, "suppression": true }),
            ))
            .await;
    }
    sync_with(&primary).await;

    let controller = running.finish().await;
    assert_eq!(controller.boot_step(), BootStep::Done);
    assert!(controller.boot_progress().has_seen_on_resume());
    assert!(controller.boot_progress().on_resume_uptime().is_some());
    assert_eq!(controller.shutdown_report().map(|r| r.last_boot_step), Some(BootStep::Done));
}

// ── Heartbeat ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_worker_alive() {
    let running = spawn_controller(
        test_config("[heartbeat]\nperiod_seconds = 1\n"),
        RecordingServices::new(false),
    );
    let primary = running.ready_primary().await;

    for count in 1..=3 {
        wait_for_command(&primary, "heartbeat", "ping", count).await;
        primary
            .inject_message(Envelope::new("heartbeat", "pong", json!({})))
            .await;
    }

    let controller = running.finish().await;
    assert_eq!(controller.view_state(), ViewState::Running);
    assert!(controller.crash_queue().received().is_empty());
    assert_eq!(controller.shutdown_report().map(|r| r.is_crash), Some(false));
}

#[tokio::test(start_paused = true)]
async fn missed_pong_reports_exactly_one_crash() {
    let running = spawn_controller(
        test_config("[heartbeat]\nperiod_seconds = 1\n"),
        RecordingServices::new(false),
    );
    let primary = running.ready_primary().await;

    wait_for_command(&primary, "heartbeat", "ping", 1).await;
    let watched = primary.clone();
    wait_until(move || watched.is_closed()).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let controller = running.finish().await;
    assert_eq!(controller.crash_queue().received(), ["heartbeat ping timeout"]);
    assert_eq!(controller.view_state(), ViewState::Crashed);
    assert!(!controller.heartbeat_running());
    assert_eq!(sent_matching(&primary, "heartbeat", "ping").len(), 1);

    let report = controller.shutdown_report().expect("shutdown reported");
    assert!(report.is_crash, "close after the crash does not report again");
}

#[tokio::test(start_paused = true)]
async fn slow_debug_runs_skip_the_heartbeat() {
    let metadata = AppMetadata {
        is_slow_debug_run: true,
        ..AppMetadata::default()
    };
    let running = spawn_controller_with(
        test_config("[heartbeat]\nperiod_seconds = 1\n"),
        metadata,
        RecordingServices::new(false),
    );
    let primary = running.ready_primary().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(sent_matching(&primary, "heartbeat", "ping").is_empty());
    let controller = running.finish().await;
    assert!(controller.crash_queue().received().is_empty());
}

// ── Crashes ──────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn load_failure_shows_crash_placeholder() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.primary().await;

    primary
        .inject_message(runtime("loadResult", json!({ "result": false })))
        .await;
    let watched = primary.clone();
    wait_until(move || watched.is_closed()).await;

    let controller = running.finish().await;
    assert_eq!(controller.view_state(), ViewState::Crashed);
    assert_eq!(controller.crash_queue().received(), ["loadfailure"]);
}

#[tokio::test(start_paused = true)]
async fn minidump_suppresses_the_plain_crash_report() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.primary().await;

    primary.inject(TransportEvent::Binary(vec![7, 7, 7])).await;
    primary
        .inject(TransportEvent::Crash {
            reason: "stdout closed".into(),
        })
        .await;
    let watched = primary.clone();
    wait_until(move || watched.is_closed()).await;

    let controller = running.finish().await;
    assert_eq!(controller.crash_queue().received(), ["captured minidump"]);
}

#[tokio::test(start_paused = true)]
async fn crash_extras_are_attached_then_cleared() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary
        .inject_message(runtime("crashExtraInformation", json!({ "thread": "main" })))
        .await;
    primary
        .inject_message(runtime("crashExtraInformation", json!({ "thread": "render" })))
        .await;
    sync_with(&primary).await;
    primary.inject_message(runtime("reportCrash", json!({}))).await;
    sync_with(&primary).await;

    let controller = running.finish().await;
    assert_eq!(controller.crash_queue().received(), ["unhandled worker exception"]);
    assert!(controller.crash_extras().fields().is_empty());
}

#[tokio::test(start_paused = true)]
async fn production_crash_after_threshold_relaunches() {
    let running = spawn_controller(test_config(""), RecordingServices::new(true));
    let window = running.window.clone();
    let services = running.services.clone();
    let primary = running.primary().await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    primary
        .inject(TransportEvent::Crash {
            reason: "stdout closed".into(),
        })
        .await;

    let controller = running.join().await;
    assert!(controller.is_closed());
    assert_eq!(controller.after_close(), Some(AfterClose::Relaunch));
    assert_eq!(controller.view_state(), ViewState::Running);
    assert_eq!(controller.crash_queue().received(), ["worker crash without minidump"]);
    assert_eq!(controller.crash_queue().pending().len(), 1);
    assert_eq!(services.log().relaunches, 1);
    assert!(window.snapshot().closed);
}

#[tokio::test(start_paused = true)]
async fn early_production_crash_closes_without_relaunch() {
    let running = spawn_controller(test_config(""), RecordingServices::new(true));
    let services = running.services.clone();
    let primary = running.primary().await;

    primary
        .inject(TransportEvent::Crash {
            reason: "stdout closed".into(),
        })
        .await;

    let controller = running.join().await;
    assert!(controller.is_closed());
    assert_eq!(controller.after_close(), None);
    assert_eq!(services.log().relaunches, 0);
}

// ── system ───────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shut_down_request_closes_the_window() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let window = running.window.clone();
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new("system", "shutDown", json!({})))
        .await;

    let controller = running.join().await;
    assert!(controller.is_closed());
    assert_eq!(controller.after_close(), None);
    assert!(window.snapshot().closed);
    assert_eq!(controller.shutdown_report().map(|r| r.is_crash), Some(false));
}

#[tokio::test(start_paused = true)]
async fn reboot_request_reloads_after_close() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let services = running.services.clone();
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new("system", "reboot", json!({})))
        .await;

    let controller = running.join().await;
    assert_eq!(controller.after_close(), Some(AfterClose::Reload));
    assert_eq!(services.log().reloads, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_activity_stack_closes_unless_allowed() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;
    primary
        .inject_message(Envelope::new("system", "activityStackEmpty", json!({})))
        .await;
    assert!(running.join().await.is_closed());

    let metadata = AppMetadata {
        allow_empty_activity_stack: true,
        ..AppMetadata::default()
    };
    let running = spawn_controller_with(test_config(""), metadata, RecordingServices::new(false));
    let window = running.window.clone();
    let primary = running.ready_primary().await;
    primary
        .inject_message(Envelope::new("system", "activityStackEmpty", json!({})))
        .await;
    sync_with(&primary).await;
    assert!(!window.snapshot().closed);
    running.finish().await;
}

#[tokio::test(start_paused = true)]
async fn crash_reporting_setting_reaches_the_queue() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new(
            "system",
            "enableCrashReporting",
            json!({ "enabled": true }),
        ))
        .await;
    sync_with(&primary).await;

    let controller = running.finish().await;
    assert_eq!(controller.crash_queue().setting(), ReportingSetting::Enabled);
}

// ── display and window ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rotation_resizes_the_window() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let window = running.window.clone();
    let primary = running.ready_primary().await;
    assert_eq!(window.snapshot().minimum_size, Some(Size::new(360.0, 672.0)));

    primary
        .inject_message(Envelope::new("display", "config", json!({ "rotation": 90 })))
        .await;
    primary
        .inject_message(Envelope::new("display", "config", json!({ "rotation": 45 })))
        .await;
    sync_with(&primary).await;

    let state = window.snapshot();
    assert_eq!(state.minimum_size, Some(Size::new(640.0, 392.0)));
    assert_eq!(state.bounds, Size::new(640.0, 392.0));
    assert_eq!(state.resize_count, 1);

    let controller = running.finish().await;
    assert_eq!(controller.layout().rotation, Rotation::Deg90);
}

#[tokio::test(start_paused = true)]
async fn host_resize_recentres_the_surface() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let window = running.window.clone();
    running.primary().await;

    window.set_bounds(Size::new(1000.0, 672.0));
    running.handle.resized().await.expect("resized");
    running.handle.close().await.expect("closed");

    let controller = running.join().await;
    let layout = controller.layout().last.expect("layout computed");
    assert_eq!(layout.surface.left, 320.0);
    assert_eq!(layout.surface.width, 360.0);
    assert!(!layout.resize_window);
}

#[tokio::test(start_paused = true)]
async fn back_button_follows_worker_unless_pinned() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;
    primary
        .inject_message(Envelope::new(
            "display",
            "setBackButtonUIEnabled",
            json!({ "enable": true }),
        ))
        .await;
    sync_with(&primary).await;
    assert!(running.finish().await.back_button_enabled());

    let metadata = AppMetadata {
        disable_auto_back_button: true,
        ..AppMetadata::default()
    };
    let running = spawn_controller_with(test_config(""), metadata, RecordingServices::new(false));
    let primary = running.ready_primary().await;
    primary
        .inject_message(Envelope::new(
            "display",
            "setBackButtonUIEnabled",
            json!({ "enable": false }),
        ))
        .await;
    sync_with(&primary).await;
    assert!(running.finish().await.back_button_enabled());
}

#[tokio::test(start_paused = true)]
async fn missing_gpu_shows_not_supported() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new("display", "showNoGpu", json!({})))
        .await;
    let watched = primary.clone();
    wait_until(move || watched.is_closed()).await;

    let controller = running.finish().await;
    assert_eq!(controller.view_state(), ViewState::NotSupported);
}

// ── host services ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn clipboard_round_trips_through_the_host() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new("clipboard", "pushhost", json!({ "text": "hello" })))
        .await;
    wait_for_command(&primary, "clipboard", "pushhostResponse", 1).await;
    primary
        .inject_message(Envelope::new("clipboard", "pullhost", json!({})))
        .await;
    wait_for_command(&primary, "clipboard", "pullhostResponse", 1).await;

    let pulled = sent_matching(&primary, "clipboard", "pullhostResponse");
    assert_eq!(pulled[0].data, json!({ "text": "hello" }));
    running.finish().await;
}

#[tokio::test(start_paused = true)]
async fn failed_url_open_is_answered_with_an_error() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let services = running.services.clone();
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new(
            "browser",
            "openUrl",
            json!({ "data": "https://fail.example" }),
        ))
        .await;
    wait_for_command(&primary, "browser", "error", 1).await;

    let error = &sent_matching(&primary, "browser", "error")[0];
    assert_eq!(error.data["command"], "openUrl");
    assert_eq!(services.log().urls, ["https://fail.example"]);
    running.finish().await;
}

#[tokio::test(start_paused = true)]
async fn second_open_of_a_capture_track_gets_null() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let services = running.services.clone();
    let primary = running.ready_primary().await;
    let open = |id: i64| {
        Envelope::new(
            "mediaStream",
            "audioOpenCall",
            json!({ "requester": "mic", "requestid": id }),
        )
    };

    primary.inject_message(open(1)).await;
    wait_for_command(&primary, "mediaStream", "audioOpenResponse", 1).await;
    primary.inject_message(open(2)).await;
    wait_for_command(&primary, "mediaStream", "audioOpenResponse", 2).await;

    let replies = sent_matching(&primary, "mediaStream", "audioOpenResponse");
    assert_eq!(replies[0].data["result"], json!({ "id": "track-1" }));
    assert_eq!(replies[0].data["requestid"], 1);
    assert_eq!(replies[1].data["result"], Value::Null);
    assert_eq!(replies[1].data["requestid"], 2);

    primary
        .inject_message(Envelope::new(
            "mediaStream",
            "audioCloseCall",
            json!({ "requester": "mic", "requestid": 3 }),
        ))
        .await;
    wait_for_command(&primary, "mediaStream", "audioCloseResponse", 1).await;
    let closed = sent_matching(&primary, "mediaStream", "audioCloseResponse");
    assert_eq!(closed[0].data["result"], true);

    let watched = services.clone();
    wait_until(move || watched.log().closed_media == [MediaKind::Audio]).await;
    assert_eq!(services.log().opened_media, [MediaKind::Audio]);
    running.finish().await;
}

#[tokio::test(start_paused = true)]
async fn capture_track_closed_mid_open_is_stopped_and_reopen_gets_the_track() {
    let running = spawn_controller(
        test_config(""),
        RecordingServices::new(false).gated_media(),
    );
    let services = running.services.clone();
    let primary = running.ready_primary().await;
    let media = |command: &str, id: i64| {
        Envelope::new(
            "mediaStream",
            command,
            json!({ "requester": "mic", "requestid": id }),
        )
    };

    primary.inject_message(media("audioOpenCall", 1)).await;
    primary.inject_message(media("audioCloseCall", 2)).await;
    primary.inject_message(media("audioOpenCall", 3)).await;
    sync_with(&primary).await;
    let watched = services.clone();
    wait_until(move || watched.log().opened_media.len() == 2).await;

    services.release_media(2);
    wait_for_command(&primary, "mediaStream", "audioOpenResponse", 2).await;

    let replies = sent_matching(&primary, "mediaStream", "audioOpenResponse");
    let result_for = |id: i64| {
        replies
            .iter()
            .find(|r| r.data["requestid"] == id)
            .map(|r| r.data["result"].clone())
            .expect("reply for request")
    };
    assert_eq!(result_for(1), Value::Null);
    assert_eq!(result_for(3), json!({ "id": "track-1" }));
    let watched = services.clone();
    wait_until(move || watched.log().closed_media == [MediaKind::Audio]).await;

    // The reopened track is live, so a close stops it.
    primary.inject_message(media("audioCloseCall", 4)).await;
    wait_for_command(&primary, "mediaStream", "audioCloseResponse", 2).await;
    let watched = services.clone();
    wait_until(move || watched.log().closed_media.len() == 2).await;
    running.finish().await;
}

#[tokio::test(start_paused = true)]
async fn failed_capture_open_can_be_retried() {
    let running = spawn_controller(
        test_config(""),
        RecordingServices::new(false).without_media(),
    );
    let services = running.services.clone();
    let primary = running.ready_primary().await;

    for id in 1..=2 {
        primary
            .inject_message(Envelope::new(
                "mediaStream",
                "videoOpenCall",
                json!({ "requester": "cam", "requestid": id }),
            ))
            .await;
        wait_for_command(&primary, "mediaStream", "videoOpenResponse", id).await;
    }

    let replies = sent_matching(&primary, "mediaStream", "videoOpenResponse");
    assert!(replies.iter().all(|r| r.data["result"].is_null()));
    assert_eq!(services.log().opened_media.len(), 2);
    running.finish().await;
}

// ── childProcess ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn primary_spawned_child_reports_back_to_primary() {
    let running = spawn_controller(test_config(""), RecordingServices::new(false));
    let primary = running.ready_primary().await;

    primary
        .inject_message(Envelope::new(
            "childProcess",
            "spawn",
            json!({ "requestid": 5, "requester": "shell", "plugin": "ls", "args": ["ls", "/"] }),
        ))
        .await;
    let factory = running.factory.clone();
    wait_until(move || factory.latest("ls").is_some()).await;
    let child = running.factory.latest("ls").expect("child launched");

    child
        .inject_message(runtime("loadResult", json!({ "result": true })))
        .await;
    child
        .inject_message(Envelope::new(
            "childProcess",
            "stdout",
            json!({ "requestid": 5, "data": "YmluCg==" }),
        ))
        .await;
    child
        .inject_message(Envelope::new(
            "childProcess",
            "exit",
            json!({ "requestid": 5, "requester": "shell", "result": 0 }),
        ))
        .await;
    wait_for_command(&primary, "shell", "exit", 1).await;

    assert_eq!(sent_matching(&primary, "workerChildProcess", "stdout").len(), 1);
    let exit = &sent_matching(&primary, "shell", "exit")[0];
    assert_eq!(exit.exit_code(), Some(0));

    let controller = running.finish().await;
    assert_eq!(controller.supervisor().live_count(), 0);
    assert!(child.is_closed());
}
