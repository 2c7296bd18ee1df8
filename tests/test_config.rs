use std::io::Write;
use std::path::{Path, PathBuf};

use runledger::cli::config::{DEFAULT_STORAGE_DIR, LedgerConfig};
use tempfile::NamedTempFile;

#[test]
fn load_valid_config_all_fields() {
    let yaml = r#"
storage_dir: "/srv/ledger"
notify_webhook: "https://hooks.example.com/T000/B000"
log_filter: "debug"
publish_run_dir: false
cancel_on_ctrl_c: true
"#;

    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();

    let cfg = LedgerConfig::load(Some(f.path())).unwrap();

    assert_eq!(cfg.storage_dir.as_deref(), Some(Path::new("/srv/ledger")));
    assert_eq!(
        cfg.notify_webhook.as_deref(),
        Some("https://hooks.example.com/T000/B000")
    );
    assert_eq!(cfg.log_filter.as_deref(), Some("debug"));
    assert!(!cfg.publish_run_dir());
    assert!(cfg.cancel_on_ctrl_c());
}

#[test]
fn load_partial_config() {
    let yaml = r#"
log_filter: "warn"
"#;

    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();

    let cfg = LedgerConfig::load(Some(f.path())).unwrap();
    assert_eq!(cfg.log_filter.as_deref(), Some("warn"));
    assert!(cfg.storage_dir.is_none());
    assert!(cfg.notify_webhook.is_none());
    assert_eq!(cfg.storage_dir(), PathBuf::from(DEFAULT_STORAGE_DIR));
    assert!(cfg.publish_run_dir());
    assert!(!cfg.cancel_on_ctrl_c());
}

#[test]
fn missing_explicit_path_returns_error() {
    let result = LedgerConfig::load(Some(Path::new("/nonexistent/runledger.yaml")));
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Config file not found")
    );
}

#[test]
fn invalid_yaml_returns_error() {
    let yaml = "storage_dir: [this is not a path";

    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();

    let result = LedgerConfig::load(Some(f.path()));
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file")
    );
}

#[test]
fn unknown_keys_are_ignored() {
    let yaml = r#"
storage_dir: "ledger"
unknown_setting: true
"#;

    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();

    let cfg = LedgerConfig::load(Some(f.path())).unwrap();
    assert_eq!(cfg.storage_dir(), PathBuf::from("ledger"));
}

#[test]
fn with_storage_dir_sets_only_storage() {
    let cfg = LedgerConfig::with_storage_dir("/tmp/x");
    assert_eq!(cfg.storage_dir(), PathBuf::from("/tmp/x"));
    assert_eq!(
        cfg,
        LedgerConfig {
            storage_dir: Some(PathBuf::from("/tmp/x")),
            ..LedgerConfig::default()
        }
    );
}
