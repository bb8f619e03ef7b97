//! Tests for loading connector configuration files.

use nspanel_core::{ConnectorConfig, Error};
use std::io::Write;

#[test]
fn test_load_connector_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        name = "bedroom-panel"
        port = 0

        [[gateways]]
        identifier = "panel-1"
        ip_address = "127.0.0.1"
        port = 8081
        "#
    )
    .unwrap();

    let config = ConnectorConfig::load(file.path()).unwrap();
    assert_eq!(config.name, "bedroom-panel");
    assert_eq!(config.port, 0);
    assert_eq!(config.gateways[0].base_url(), "http://127.0.0.1:8081");
}

#[test]
fn test_missing_file_is_invalid_state() {
    let dir = tempfile::tempdir().unwrap();
    let result = ConnectorConfig::load(dir.path().join("missing.toml"));
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[test]
fn test_gateway_without_address_is_missing_value() {
    let result = ConnectorConfig::from_toml_str(
        r#"
        [[gateways]]
        identifier = "panel-1"
        ip_address = ""
        "#,
    );
    assert!(matches!(result, Err(Error::MissingValue(_))));
}
