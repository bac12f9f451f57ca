use clap::Parser;
use setup_status::config::*;
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> CliArgs {
    CliArgs::try_parse_from(args).unwrap()
}

#[test]
fn test_default_timing() {
    let timing = Timing::default();
    assert_eq!(timing.request_timeout, Duration::from_secs(30));
    assert_eq!(timing.max_retry_attempts, 3);
    assert_eq!(timing.poll_interval, Duration::from_millis(1000));
    assert_eq!(timing.max_poll_attempts, 30);
    assert_eq!(timing.poll_network_retry_limit, 3);
    assert_eq!(timing.auto_refresh_interval, Duration::from_secs(30));
}

#[test]
fn test_retry_delay_is_linear() {
    let timing = Timing::default();
    assert_eq!(timing.retry_delay(1), Duration::from_millis(2000));
    assert_eq!(timing.retry_delay(2), Duration::from_millis(4000));
    assert_eq!(timing.retry_delay(3), Duration::from_millis(6000));
}

#[test]
fn test_config_from_args() {
    let args = parse(&[
        "setup-status",
        "--base-url",
        "http://wizard.test:8080/",
        "--csrf-token",
        "abc123",
        "--timeout-secs",
        "5",
        "watch",
        "--auto-refresh",
    ]);

    let config = MonitorConfig::from_args(&args, PathBuf::from("/tmp/settings.json")).unwrap();
    assert_eq!(config.base_url.as_str(), "http://wizard.test:8080/");
    assert_eq!(config.csrf_token.as_deref(), Some("abc123"));
    assert_eq!(config.timing.request_timeout, Duration::from_secs(5));
    assert!(config.auto_refresh);
    assert_eq!(config.settings_file, PathBuf::from("/tmp/settings.json"));
}

#[test]
fn test_config_defaults() {
    let args = parse(&["setup-status", "status"]);
    let config = MonitorConfig::from_args(&args, PathBuf::from("settings.json")).unwrap();

    assert_eq!(config.base_url.as_str(), "http://127.0.0.1:8000/");
    assert!(!config.auto_refresh);
    assert!(config.log_file.is_none());
}

#[test]
fn test_invalid_base_url_is_rejected() {
    let args = parse(&["setup-status", "--base-url", "not a url", "status"]);
    assert!(MonitorConfig::from_args(&args, PathBuf::from("settings.json")).is_err());
}

#[test]
fn test_zero_timeout_is_rejected() {
    assert!(CliArgs::try_parse_from(["setup-status", "--timeout-secs", "0", "status"]).is_err());
    let args = parse(&["setup-status", "--timeout-secs", "1", "status"]);
    assert_eq!(args.timeout_secs, 1);
}

#[test]
fn test_test_queue_arguments() {
    let args = parse(&["setup-status", "test-queue", "--delay", "2", "--timeout", "60"]);
    match args.command {
        Command::TestQueue { delay, timeout } => {
            assert_eq!(delay, 2);
            assert_eq!(timeout, Some(60));
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_endpoint_paths() {
    assert_eq!(REFRESH_ALL_PATH, "/setup/status/refresh");
    assert_eq!(REFRESH_STEP_PATH, "/setup/status/refresh-step");
    assert_eq!(QUEUE_TEST_PATH, "/setup/queue/test");
    assert_eq!(QUEUE_TEST_STATUS_PATH, "/setup/queue/test/status");
}
