//! Unit tests for `AppError` display format and conversions.

use worker_bridge::AppError;

#[test]
fn display_prefixes_name_the_domain() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::Service("x".into()), "service: x"),
        (AppError::CrashQueue("x".into()), "crash queue: x"),
        (AppError::AlreadyRegistered("x".into()), "already registered: x"),
        (AppError::NotReady("x".into()), "not ready: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Transport("stream closed".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn toml_errors_become_config_errors() {
    let toml_err = toml::from_str::<toml::Table>("not = [valid").expect_err("bad toml");
    let err = AppError::from(toml_err);
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn json_errors_become_protocol_errors() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("bad json");
    let err = AppError::from(json_err);
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.starts_with("malformed json")));
}

#[test]
fn io_errors_become_io_errors() {
    let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err = AppError::from(io_err);
    assert_eq!(err.to_string(), "io: pipe closed");
}

#[test]
fn implements_std_error_trait() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    let err = AppError::NotReady("primary".into());
    assert_error(&err);
    assert!(!format!("{err:?}").is_empty());
}
