// Tests for loading the relay configuration

use anyhow::Result;
use audioid_relay::{Config, SessionOptions};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_full_config() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("relay.toml");
    fs::write(
        &path,
        r#"
[service]
name = "relay-under-test"

[transport]
nats_url = "nats://nats.local:4222"
subject_prefix = "test.relay"
open_timeout_ms = 250
request_timeout_ms = 1000

[audio]
sample_rate = 48000
sample_size = 16
channel_count = 1
"#,
    )?;

    let config = Config::load(path.to_str().expect("utf-8 path"))?;

    assert_eq!(config.service.name, "relay-under-test");
    assert_eq!(config.transport.nats_url, "nats://nats.local:4222");
    assert_eq!(config.transport.subject_prefix, "test.relay");
    assert_eq!(config.transport.open_timeout(), Duration::from_millis(250));
    assert_eq!(config.transport.request_timeout(), Duration::from_secs(1));
    assert_eq!(config.audio.session_options(), SessionOptions::new(48000, 16, 1));

    Ok(())
}

#[test]
fn test_missing_sections_use_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("partial.toml");
    fs::write(&path, "[transport]\nnats_url = \"nats://other:4222\"\n")?;

    let config = Config::load(path.to_str().expect("utf-8 path"))?;

    assert_eq!(config.transport.nats_url, "nats://other:4222");
    assert_eq!(config.transport.subject_prefix, "audioid.relay");
    assert_eq!(config.transport.request_timeout(), Duration::from_secs(15));
    assert_eq!(config.audio.session_options(), SessionOptions::default());
    assert_eq!(config.service.name, "audioid-relay");

    Ok(())
}

#[test]
fn test_missing_file_error_names_the_path() {
    let err = Config::load("/nonexistent/audioid-relay").expect_err("file does not exist");

    assert!(err.to_string().contains("/nonexistent/audioid-relay"));
}

#[test]
fn test_invalid_value_error_names_the_path() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[audio]\nsample_rate = \"fast\"\n")?;
    let path = path.to_str().expect("utf-8 path");

    let err = Config::load(path).expect_err("sample_rate is not a number");

    assert!(err.to_string().contains("Invalid config"));
    assert!(err.to_string().contains(path));
    Ok(())
}

#[test]
fn test_bundled_config_loads() -> Result<()> {
    let config = Config::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/audioid-relay"))?;

    assert!(!config.transport.nats_url.is_empty());
    assert!(config.audio.session_options().bytes_per_second() > 0);
    Ok(())
}
