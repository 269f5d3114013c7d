use std::io::Write;
use std::time::Duration;

use mcp_relay::{AppError, RelayConfig};

fn clear_env() {
    for key in ["PORT", "MAX_DURATION", "REDIS_URL", "KV_URL"] {
        std::env::remove_var(key);
    }
}

#[test]
fn empty_document_yields_defaults() {
    let config = RelayConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, RelayConfig::default());
    assert_eq!(config.http_port, 3000);
    assert_eq!(config.max_duration_seconds, 800);
    assert_eq!(config.grace_seconds, 5);
    assert_eq!(config.response_timeout_seconds, 10);
    assert_eq!(config.sse_path, "/sse");
    assert_eq!(config.message_path, "/message");
    assert!(config.broker_url.is_empty());
}

#[test]
fn derived_durations() {
    let config = RelayConfig::from_toml_str(
        r#"
max_duration_seconds = 60
grace_seconds = 10
response_timeout_seconds = 3
log_flush_interval_ms = 250
sse_keep_alive_seconds = 0
"#,
    )
    .expect("valid config");

    assert_eq!(config.session_lifetime(), Duration::from_secs(50));
    assert_eq!(config.response_timeout(), Duration::from_secs(3));
    assert_eq!(config.log_flush_interval(), Duration::from_millis(250));
    assert_eq!(config.sse_keep_alive(), None);
}

#[test]
fn default_lifetime_keeps_grace_margin() {
    let config = RelayConfig::default();
    assert_eq!(config.session_lifetime(), Duration::from_secs(795));
    assert_eq!(config.sse_keep_alive(), Some(Duration::from_secs(15)));
    assert_eq!(config.bind_addr().to_string(), "127.0.0.1:3000");
}

#[test]
fn grace_not_below_duration_is_rejected() {
    let result = RelayConfig::from_toml_str("max_duration_seconds = 5\ngrace_seconds = 5\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("grace_seconds")));
}

#[test]
fn zero_response_timeout_is_rejected() {
    let result = RelayConfig::from_toml_str("response_timeout_seconds = 0\n");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("response_timeout_seconds")));
}

#[test]
fn zero_flush_interval_is_rejected() {
    let result = RelayConfig::from_toml_str("log_flush_interval_ms = 0\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn relative_paths_are_rejected() {
    let result = RelayConfig::from_toml_str("sse_path = \"sse\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn colliding_paths_are_rejected() {
    let result = RelayConfig::from_toml_str("sse_path = \"/relay\"\nmessage_path = \"/relay\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let result = RelayConfig::from_toml_str("http_port = \"not a number\"");
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.starts_with("invalid config")));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "http_port = 8080\nmessage_path = \"/submit\"").expect("write config");

    let config = RelayConfig::load_from_path(file.path()).expect("load config");
    assert_eq!(config.http_port, 8080);
    assert_eq!(config.message_path, "/submit");
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = RelayConfig::load_from_path(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("failed to read config")));
}

#[test]
#[serial_test::serial]
fn env_overrides_port_and_duration() {
    clear_env();
    std::env::set_var("PORT", "4100");
    std::env::set_var("MAX_DURATION", "120");

    let mut config = RelayConfig::default();
    config.apply_env_overrides().expect("overrides valid");
    assert_eq!(config.http_port, 4100);
    assert_eq!(config.max_duration_seconds, 120);
    assert_eq!(config.session_lifetime(), Duration::from_secs(115));

    clear_env();
}

#[test]
#[serial_test::serial]
fn unparseable_env_override_is_ignored() {
    clear_env();
    std::env::set_var("PORT", "eighty");

    let mut config = RelayConfig::default();
    config.apply_env_overrides().expect("ignored override");
    assert_eq!(config.http_port, 3000);

    clear_env();
}

#[test]
#[serial_test::serial]
fn override_producing_invalid_config_fails() {
    clear_env();
    std::env::set_var("MAX_DURATION", "3");

    let mut config = RelayConfig::default();
    assert!(config.apply_env_overrides().is_err());

    clear_env();
}

#[test]
#[serial_test::serial]
fn broker_url_prefers_redis_url() {
    clear_env();
    std::env::set_var("REDIS_URL", "redis://primary:6379");
    std::env::set_var("KV_URL", "redis://fallback:6379");

    let mut config = RelayConfig::default();
    config.load_broker_url().expect("broker url");
    assert_eq!(config.broker_url, "redis://primary:6379");

    clear_env();
}

#[test]
#[serial_test::serial]
fn broker_url_falls_back_to_kv_url() {
    clear_env();
    std::env::set_var("KV_URL", "redis://fallback:6379");

    let mut config = RelayConfig::default();
    config.load_broker_url().expect("broker url");
    assert_eq!(config.broker_url, "redis://fallback:6379");

    clear_env();
}

#[test]
#[serial_test::serial]
fn missing_broker_url_is_fatal() {
    clear_env();
    std::env::set_var("REDIS_URL", "  ");

    let mut config = RelayConfig::default();
    let result = config.load_broker_url();
    assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("REDIS_URL")));

    clear_env();
}
