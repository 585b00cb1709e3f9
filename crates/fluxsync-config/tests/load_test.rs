// File-backed loading and saving of `Config`.

use std::time::Duration;

use pretty_assertions::assert_eq;

use fluxsync_config::{Config, Profile, load_config_from, save_config_to};

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.default_profile.as_deref(), Some("default"));
    assert_eq!(config.defaults.debounce_ms, 20);
    assert!(config.profiles.is_empty());
}

#[test]
fn test_profile_from_toml_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
default_profile = "lab"

[defaults]
debounce_ms = 40

[profiles.lab]
stream_url = "wss://lab.local/stream"
timeout = 5
reconnect_max_ms = 2000

[profiles.lab.headers]
cookie = "session=abc"
"#,
    )
    .unwrap();

    let config = load_config_from(&path).unwrap();
    let resolved = config.resolve(None).unwrap();

    assert_eq!(resolved.name, "lab");
    assert_eq!(resolved.retrieve_url.as_str(), "https://lab.local/");
    assert_eq!(resolved.timeout, Duration::from_secs(5));
    assert_eq!(resolved.sync.debounce, Duration::from_millis(40));
    assert_eq!(resolved.sync.reconnect.max_delay, Duration::from_secs(2));
    assert_eq!(resolved.headers.get("cookie").unwrap(), "session=abc");
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    let mut profile = Profile::new("ws://localhost:9000/stream");
    profile.retrieve_url = Some("http://localhost:9001".into());
    config.profiles.insert("default".into(), profile);

    save_config_to(&config, &path).unwrap();
    let loaded = load_config_from(&path).unwrap();

    assert_eq!(loaded, config);
    assert_eq!(
        loaded.resolve(None).unwrap().retrieve_url.as_str(),
        "http://localhost:9001/"
    );
}
