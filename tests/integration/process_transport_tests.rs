//! Integration tests for the child-process transport, using `/bin/sh` as a
//! scripted worker.

#![cfg(unix)]

use std::time::Duration;

use tokio::sync::mpsc;

use worker_bridge::config::WorkerConfig;
use worker_bridge::models::message::Envelope;
use worker_bridge::transport::process::ProcessTransportFactory;
use worker_bridge::transport::{
    Delivery, TransportEvent, TransportFactory, TransportSink, WorkerKey,
};
use worker_bridge::AppError;

use super::test_helpers::child_descriptor;

const KEY: WorkerKey = WorkerKey { id: 4, attempt: 2 };

fn sh_factory(script: &str) -> ProcessTransportFactory {
    let config = WorkerConfig {
        command: "/bin/sh".into(),
        args: vec!["-c".into(), script.into()],
        ..WorkerConfig::default()
    };
    ProcessTransportFactory::new(
        &config,
        vec![("BRIDGE_PACKAGE_NAME".into(), "com.example.notes".into())],
    )
}

async fn next(rx: &mut mpsc::Receiver<Delivery>) -> Option<Delivery> {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("worker answered in time")
}

#[tokio::test]
async fn scripted_worker_speaks_ndjson() {
    let script = r#"
printf '%s\n' '{"namespace":"runtime","command":"loadResult","data":{"result":true}}'
printf '\n'
printf '%s\n' 'not json'
printf '{"namespace":"childProcess","command":"stdout","data":{"plugin":"%s","package":"%s"}}\n' "$BRIDGE_PLUGIN_TYPE" "$BRIDGE_PACKAGE_NAME"
printf '%s\n' '{"minidump":"AQID"}'
read line
printf '%s\n' "$line"
"#;
    let (tx, mut rx) = mpsc::channel(16);
    let mut transport = sh_factory(script)
        .launch(&child_descriptor("ls", "shell", 1), TransportSink::new(KEY, tx))
        .expect("launched");

    let loaded = next(&mut rx).await.expect("load result");
    assert_eq!(loaded.key, KEY);
    assert!(matches!(
        loaded.event,
        TransportEvent::Message(ref e) if e.command == "loadResult"
    ));

    let Some(Delivery {
        event: TransportEvent::Message(stdout),
        ..
    }) = next(&mut rx).await
    else {
        panic!("expected stdout message");
    };
    assert_eq!(stdout.data["plugin"], "ls");
    assert_eq!(stdout.data["package"], "com.example.notes");

    let dump = next(&mut rx).await.expect("minidump");
    assert_eq!(dump.event, TransportEvent::Binary(vec![1, 2, 3]));

    transport.send(Envelope::ping()).expect("sent");
    let echoed = next(&mut rx).await.expect("echo");
    assert_eq!(echoed.event, TransportEvent::Message(Envelope::ping()));

    let eof = next(&mut rx).await.expect("crash on exit");
    assert!(matches!(eof.event, TransportEvent::Crash { .. }));
    transport.close();
}

#[tokio::test]
async fn host_environment_is_not_inherited() {
    let script = r#"printf '{"namespace":"childProcess","command":"stdout","data":{"secret":"%s"}}\n' "$BRIDGE_TEST_SECRET""#;
    std::env::set_var("BRIDGE_TEST_SECRET", "hunter2");
    let (tx, mut rx) = mpsc::channel(16);
    let _transport = sh_factory(script)
        .launch(&child_descriptor("ls", "shell", 1), TransportSink::new(KEY, tx))
        .expect("launched");

    let Some(Delivery {
        event: TransportEvent::Message(envelope),
        ..
    }) = next(&mut rx).await
    else {
        panic!("expected message");
    };
    assert_eq!(envelope.data["secret"], "");
}

#[tokio::test]
async fn closing_stops_the_worker_quietly() {
    let script = r#"
printf '%s\n' '{"namespace":"runtime","command":"loadResult","data":{"result":true}}'
exec sleep 30
"#;
    let (tx, mut rx) = mpsc::channel(16);
    let mut transport = sh_factory(script)
        .launch(&child_descriptor("sleep", "shell", 1), TransportSink::new(KEY, tx))
        .expect("launched");
    next(&mut rx).await.expect("load result");

    transport.close();
    transport.close();

    assert!(next(&mut rx).await.is_none(), "no crash event after close");
    assert!(matches!(
        transport.send(Envelope::ping()),
        Err(AppError::Transport(_))
    ));
}

#[tokio::test]
async fn missing_binary_fails_the_launch() {
    let config = WorkerConfig {
        command: "/nonexistent/worker-runtime".into(),
        ..WorkerConfig::default()
    };
    let (tx, _rx) = mpsc::channel(1);
    let result = ProcessTransportFactory::new(&config, Vec::new())
        .launch(&child_descriptor("ls", "shell", 1), TransportSink::new(KEY, tx));
    assert!(matches!(result, Err(AppError::Transport(_))));
}
