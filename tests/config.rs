use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;

use history_imp_exp::config::{Config, ConfigLoader};
use history_imp_exp::error::ImpExpError;

#[test]
fn resolve_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("imp-exp.json");
    fs::write(
        &path,
        r#"{
            "external_chown_script": "/usr/local/bin/chown-helper",
            "real_system_username": "username",
            "enable_celery_tasks": true,
            "file_path": "/srv/galaxy/objects"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(
        resolved.external_chown_script,
        Some(PathBuf::from("/usr/local/bin/chown-helper"))
    );
    assert_eq!(resolved.real_system_username, "username");
    assert!(resolved.enable_celery_tasks);
    assert_eq!(resolved.file_path, PathBuf::from("/srv/galaxy/objects"));
}

#[test]
fn empty_chown_script_disables_ownership_transfer() {
    let resolved = ConfigLoader::resolve_config(Config {
        external_chown_script: Some(PathBuf::new()),
        file_path: Some(PathBuf::from("/tmp/objects")),
        ..Config::default()
    })
    .unwrap();
    assert!(resolved.external_chown_script.is_none());
}

#[test]
fn unreadable_and_invalid_configs() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("missing.json");
    let err = ConfigLoader::resolve(Some(missing.to_str().unwrap())).unwrap_err();
    assert_matches!(err, ImpExpError::ConfigRead(_));

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(broken.to_str().unwrap())).unwrap_err();
    assert_matches!(err, ImpExpError::ConfigParse(_));
}
