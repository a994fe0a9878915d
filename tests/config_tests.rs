//! Configuration layering: defaults, TOML file, environment

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use ventilation_coordinator::{CoordinatorError, ServerConfig};

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_env_only() {
    temp_env::with_vars(
        [
            ("VENTILATION_DEVICE__HOST", Some("192.168.1.20")),
            ("VENTILATION_POLLING__SCAN_INTERVAL", Some("30s")),
        ],
        || {
            let config = ServerConfig::from_env().unwrap();
            assert_eq!(config.device.host, "192.168.1.20");
            assert_eq!(config.device.name, "Vallox");
            assert_eq!(config.polling.scan_interval, Duration::from_secs(30));
            assert_eq!(config.polling.fetch_timeout, None);
        },
    );
}

#[test]
#[serial]
fn test_missing_host_is_fatal() {
    temp_env::with_var_unset("VENTILATION_DEVICE__HOST", || {
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, CoordinatorError::Configuration(_)));
    });
}

#[test]
#[serial]
fn test_file_then_env() {
    let file = config_file(
        r#"
[device]
host = "10.0.0.5"
name = "Attic unit"

[polling]
scan_interval = "2m"
fetch_timeout = "10s"
event_buffer = 16

[logging]
level = "debug"
"#,
    );

    temp_env::with_vars(
        [
            ("VENTILATION_DEVICE__HOST", None),
            ("VENTILATION_POLLING__EVENT_BUFFER", Some("8")),
        ],
        || {
            let config = ServerConfig::load(Some(file.path())).unwrap();
            assert_eq!(config.device.host, "10.0.0.5");
            assert_eq!(config.device.name, "Attic unit");
            assert_eq!(config.polling.scan_interval, Duration::from_secs(120));
            assert_eq!(config.polling.fetch_timeout, Some(Duration::from_secs(10)));
            assert_eq!(config.polling.event_buffer, 8);
            assert_eq!(config.logging.level, "debug");
        },
    );
}

#[test]
#[serial]
fn test_overrides_win() {
    let file = config_file("[device]\nhost = \"10.0.0.5\"\n");

    temp_env::with_var("VENTILATION_DEVICE__HOST", Some("10.0.0.6"), || {
        let config =
            ServerConfig::load_with_overrides(Some(file.path()), &[("device.host", "10.0.0.7")])
                .unwrap();
        assert_eq!(config.device.host, "10.0.0.7");
    });
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    let file = config_file("[device]\nhost = \"vallox.local\"\n");
    temp_env::with_var_unset("VENTILATION_DEVICE__HOST", || {
        assert!(ServerConfig::load(Some(file.path())).is_err());
    });

    temp_env::with_vars(
        [
            ("VENTILATION_DEVICE__HOST", Some("10.0.0.5")),
            ("VENTILATION_POLLING__SCAN_INTERVAL", Some("500ms")),
        ],
        || {
            let err = ServerConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("Scan interval"), "{err}");
        },
    );
}

#[test]
#[serial]
fn test_missing_file_is_an_error() {
    let err = ServerConfig::load(Some(std::path::Path::new("/nonexistent/ventilation.toml")))
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Configuration(_)));
}

#[test]
#[serial]
fn test_printed_config_loads_back() {
    temp_env::with_var("VENTILATION_DEVICE__HOST", Some("172.16.0.9"), || {
        let config = ServerConfig::from_env().unwrap();
        let file = config_file(&config.to_toml().unwrap());
        let reloaded = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(reloaded, config);
    });
}
