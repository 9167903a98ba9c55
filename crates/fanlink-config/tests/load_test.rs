#![allow(clippy::unwrap_used)]
// Loading and saving profiles through real files.

use std::time::Duration;

use pretty_assertions::assert_eq;

use fanlink_config::{
    Config, ConfigError, Profile, load_config_from, profile_to_communicator_config,
    save_config_to,
};

const LAB_TOML: &str = r#"
default_profile = "lab"

[defaults]
output = "json"

[profiles.lab]
passcode = "LAB"
bind_ip = "127.0.0.1"
period_ms = 50
max_fans = 6
default_fans = 4

[profiles.lab.fan_profile]
max_rpm = 12000

[[profiles.lab.devices]]
name = "Sirocco"
mac = "00:11:22:33:44:55"
fans = 6
"#;

#[test]
fn test_load_profile_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, LAB_TOML).unwrap();

    let config = load_config_from(&path).unwrap();
    assert_eq!(config.defaults.output, "json");
    assert_eq!(config.defaults.color, "auto");

    let (name, profile) = config.profile(None).unwrap();
    assert_eq!(name, "lab");
    assert_eq!(profile.period_ms, 50);
    assert_eq!(profile.broadcast_port, 65000);
    assert_eq!(profile.fan_profile.max_rpm, 12000);
    assert_eq!(profile.fan_profile.pinout, "BASE");
    assert_eq!(profile.devices.len(), 1);
    assert_eq!(profile.devices[0].mac.as_str(), "00:11:22:33:44:55");
}

#[test]
fn test_profile_translates_to_communicator_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, LAB_TOML).unwrap();

    let config = load_config_from(&path).unwrap();
    let (name, profile) = config.profile(Some("lab")).unwrap();
    let communicator = profile_to_communicator_config(&profile, &name).unwrap();

    assert_eq!(communicator.period, Duration::from_millis(50));
    assert_eq!(communicator.max_fans, 6);
    assert_eq!(communicator.default_fans, 4);
    assert_eq!(communicator.saved_devices.len(), 1);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.default_profile.as_deref(), Some("default"));
    assert!(config.profiles.is_empty());
    let (_, profile) = config.profile(None).unwrap();
    assert_eq!(profile, Profile::default());
}

#[test]
fn test_save_then_load_preserves_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.profiles.insert(
        "default".into(),
        Profile {
            passcode: Some("CT".into()),
            max_timeouts: 4,
            ..Profile::default()
        },
    );
    save_config_to(&config, &path).unwrap();

    let loaded = load_config_from(&path).unwrap();
    assert_eq!(loaded.profiles.get("default"), config.profiles.get("default"));
}

#[test]
fn test_invalid_device_mac_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[[profiles.default.devices]]\nname = \"x\"\nmac = \"bogus\"\nfans = 1\n",
    )
    .unwrap();

    let result = load_config_from(&path);
    assert!(matches!(result, Err(ConfigError::Figment(_))));
}
