//! Integration tests for configuration parsing
//!
//! Tests server configuration parsing, including:
//! - Minimal and full documents
//! - Defaults for omitted sections
//! - Invalid configuration handling
//! - Save/load through the filesystem

use common::DeliveryPolicy;
use server::config::{DeliveryMode, ServerConfig};
use server::dfu::StderrPolicy;
use std::path::PathBuf;
use std::time::Duration;

const MINIMAL_CONFIG: &str = r#"
[server]
bind_addr = "0.0.0.0:8000"
log_level = "info"
"#;

const FULL_CONFIG: &str = r#"
[server]
bind_addr = "192.168.1.100:9090"
log_level = "debug"

[dfu]
tool = "/opt/dfu-util/bin/dfu-util"
preamble_lines = 6
verbosity = 2
stderr_policy = "log"
images_dir = "/srv/firmware"

[hotplug]
enabled = false
vendor_id = "*"
poll_timeout_ms = 50
channel_capacity = 8
delivery = "backpressure"
backpressure_timeout_ms = 500
"#;

#[test]
fn test_minimal_config_uses_defaults() {
    let config = ServerConfig::from_toml(MINIMAL_CONFIG).unwrap();
    assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
    assert_eq!(config.dfu.tool, "dfu-util");
    assert_eq!(config.dfu.preamble_lines, 7);
    assert_eq!(config.dfu.stderr_policy, StderrPolicy::Fail);
    assert!(config.hotplug.enabled);
    assert_eq!(config.hotplug.vendor_filter().unwrap(), Some(0x0483));
    assert_eq!(config.hotplug.delivery, DeliveryMode::BestEffort);
}

#[test]
fn test_empty_document_is_default() {
    let config = ServerConfig::from_toml("").unwrap();
    assert_eq!(config.server.bind_addr, "127.0.0.1:8000");
    assert_eq!(config.server.log_level, "info");
}

#[test]
fn test_full_config() {
    let config = ServerConfig::from_toml(FULL_CONFIG).unwrap();
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.dfu.tool, "/opt/dfu-util/bin/dfu-util");
    assert_eq!(config.dfu.verbosity, 2);
    assert_eq!(config.dfu.images_dir(), PathBuf::from("/srv/firmware"));

    let options = config.dfu.exec_options();
    assert_eq!(options.preamble_lines, 6);
    assert_eq!(options.stderr_policy, StderrPolicy::Log);

    assert!(!config.hotplug.enabled);
    let broadcaster = config.hotplug.broadcaster_config().unwrap();
    assert_eq!(broadcaster.vendor_id, None);
    assert_eq!(broadcaster.poll_timeout, Duration::from_millis(50));
    assert_eq!(broadcaster.channel_capacity, 8);
    assert_eq!(
        broadcaster.delivery,
        DeliveryPolicy::Backpressure {
            timeout: Duration::from_millis(500)
        }
    );
}

#[test]
fn test_invalid_configs() {
    let invalid = [
        "[server]\nbind_addr = \"127.0.0.1:8000\"\nlog_level = \"loud\"\n",
        "[server]\nbind_addr = \"not an address\"\nlog_level = \"info\"\n",
        "[dfu]\ntool = \"dfu-util\"\nverbosity = 9\n",
        "[dfu]\ntool = \"\"\n",
        "[dfu]\ntool = \"dfu-util\"\nstderr_policy = \"ignore\"\n",
        "[hotplug]\nenabled = true\nvendor_id = \"0x0483\"\n",
        "[hotplug]\nenabled = true\nvendor_id = \"0483\"\nchannel_capacity = 0\n",
        "[hotplug]\nenabled = true\nvendor_id = \"0483\"\ndelivery = \"eventually\"\n",
    ];

    for doc in invalid {
        assert!(ServerConfig::from_toml(doc).is_err(), "accepted:\n{}", doc);
    }
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("server.toml");

    let mut config = ServerConfig::from_toml(FULL_CONFIG).unwrap();
    config.server.log_level = "warn".to_string();
    config.save(&path).unwrap();

    let loaded = ServerConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.server.log_level, "warn");
    assert_eq!(loaded.dfu.tool, config.dfu.tool);
    assert_eq!(loaded.hotplug.delivery, DeliveryMode::Backpressure);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ServerConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}
