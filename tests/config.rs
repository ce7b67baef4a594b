use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use tess_ida::config::{Config, ConfigLoader, ConfigOverrides};
use tess_ida::error::IdaError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("tess-ida.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "base_url": "https://ida.example.org/s/share",
            "ida_dir": "raw",
            "ecsv_dir": "out",
            "aux_store": "state/aux.db",
            "concurrency": 6,
            "timeout_secs": 60,
            "deadline_secs": 3600
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str(), ConfigOverrides::default()).unwrap();

    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.base_url.as_deref(), Some("https://ida.example.org/s/share"));
    assert_eq!(resolved.ida_dir, "raw");
    assert_eq!(resolved.ecsv_dir, "out");
    assert_eq!(resolved.aux_store, "state/aux.db");
    assert_eq!(resolved.concurrency, 6);
    assert_eq!(resolved.timeout, Duration::from_secs(60));
    assert_eq!(resolved.deadline, Some(Duration::from_secs(3600)));
    assert!(!resolved.force);
    assert_eq!(
        resolved.layout().instrument_ida_dir(&"stars1".parse().unwrap()).as_str(),
        "raw/stars1"
    );
}

#[test]
fn command_line_overrides_file_values() {
    let config: Config = serde_json::from_str(r#"{"concurrency": 2, "timeout_secs": 30}"#).unwrap();
    let overrides = ConfigOverrides {
        concurrency: Some(12),
        base_url: Some("https://mirror.example.org".to_string()),
        force: true,
        ..ConfigOverrides::default()
    };

    let resolved = ConfigLoader::resolve_config(config, overrides).unwrap();

    assert_eq!(resolved.concurrency, 12);
    assert_eq!(resolved.timeout, Duration::from_secs(30));
    assert_eq!(resolved.require_base_url().unwrap(), "https://mirror.example.org");
    assert!(resolved.force);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");

    let result = ConfigLoader::resolve(path.to_str(), ConfigOverrides::default());

    assert_matches!(result, Err(IdaError::ConfigRead(_)));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("tess-ida.json");
    fs::write(&path, "{ not json").unwrap();

    let result = ConfigLoader::resolve(path.to_str(), ConfigOverrides::default());

    assert_matches!(result, Err(IdaError::ConfigParse(_)));
}

#[test]
fn invalid_values_are_rejected() {
    let config: Config = serde_json::from_str(r#"{"concurrency": 64}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config, ConfigOverrides::default()),
        Err(IdaError::InvalidConfig(_))
    );

    let config: Config = serde_json::from_str(r#"{"timeout_secs": 0}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config, ConfigOverrides::default()),
        Err(IdaError::InvalidConfig(_))
    );

    let config: Config = serde_json::from_str(r#"{"schema_version": 2}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config, ConfigOverrides::default()),
        Err(IdaError::InvalidConfig(_))
    );
}

#[test]
fn blank_base_url_counts_as_unset() {
    let config: Config = serde_json::from_str(r#"{"base_url": "  "}"#).unwrap();
    let resolved = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap();
    assert!(resolved.base_url.is_none());
}
