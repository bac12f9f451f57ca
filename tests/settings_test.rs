use setup_status::settings::{load_settings, save_settings, PersistentSettings};
use tempfile::TempDir;

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nonexistent.json");
    let settings = load_settings(&path);
    assert!(settings.auto_refresh_enabled.is_none());
    assert!(settings.base_url.is_none());
}

#[test]
fn test_load_invalid_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json at all {{{").unwrap();
    let settings = load_settings(&path);
    assert_eq!(settings, PersistentSettings::default());
}

#[test]
fn test_save_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("setup-status").join("settings.json");

    let settings = PersistentSettings {
        auto_refresh_enabled: Some(true),
        base_url: Some("http://wizard.test".to_string()),
    };
    save_settings(&path, &settings);

    assert!(path.exists());
    assert_eq!(load_settings(&path), settings);
}

#[test]
fn test_partial_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("partial.json");

    std::fs::write(&path, r#"{"auto_refresh_enabled": false}"#).unwrap();
    let loaded = load_settings(&path);

    assert_eq!(loaded.auto_refresh_enabled, Some(false));
    assert!(loaded.base_url.is_none());
}

#[test]
fn test_toggle_is_persisted_across_loads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");

    let mut settings = load_settings(&path);
    settings.base_url = Some("http://127.0.0.1:8000/".to_string());
    save_settings(&path, &settings);

    let mut settings = load_settings(&path);
    settings.auto_refresh_enabled = Some(true);
    save_settings(&path, &settings);

    let loaded = load_settings(&path);
    assert_eq!(loaded.auto_refresh_enabled, Some(true));
    assert_eq!(loaded.base_url.as_deref(), Some("http://127.0.0.1:8000/"));
}
