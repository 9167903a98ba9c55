//! Shared configuration for the fanlink CLI.
//!
//! TOML profiles, passcode resolution (env + keyring + plaintext),
//! and translation to `fanlink_core::CommunicatorConfig`.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fanlink_core::config::{BROADCAST_SENTINEL, DEFAULT_LISTENER_PORT};
use fanlink_core::{CommunicatorConfig, CoreError, FanProfile, SavedDevice};

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "fanlink";

/// Factory passcode shipped on every device.
pub const DEFAULT_PASSCODE: &str = "CT";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("invalid communicator settings: {0}")]
    Communicator(#[from] CoreError),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named fleet profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pick a profile by explicit name, then `default_profile`, then
    /// `"default"`. A missing `"default"` profile yields factory settings.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile.clone())),
            None if name == "default" => Ok((name, Profile::default())),
            None => Err(ConfigError::UnknownProfile { name }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// A named fleet profile.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Profile {
    /// Shared discovery passcode (plaintext; prefer keyring or env var).
    pub passcode: Option<String>,

    /// Environment variable name containing the passcode.
    pub passcode_env: Option<String>,

    /// Local address every socket binds to.
    pub bind_ip: String,

    pub listener_port: u16,

    /// `<broadcast>` or a dotted quad.
    pub broadcast_ip: String,

    pub broadcast_port: u16,

    /// Port the firmware image server listens on.
    pub http_port: u16,

    pub broadcast_period_ms: u64,

    /// Exchange and publishing period.
    pub period_ms: u64,

    pub max_timeouts: u32,

    pub handshake_attempts: u32,

    pub max_fans: usize,

    /// Fan count for devices discovered at runtime; defaults to `max_fans`.
    pub default_fans: Option<usize>,

    pub max_length: usize,

    pub mailbox_capacity: usize,

    pub lock_timeout_ms: u64,

    pub fan_profile: FanProfile,

    /// Devices adopted in earlier sessions.
    pub devices: Vec<SavedDevice>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            passcode: None,
            passcode_env: None,
            bind_ip: "0.0.0.0".into(),
            listener_port: DEFAULT_LISTENER_PORT,
            broadcast_ip: BROADCAST_SENTINEL.into(),
            broadcast_port: 65000,
            http_port: 8000,
            broadcast_period_ms: 1000,
            period_ms: 100,
            max_timeouts: 10,
            handshake_attempts: 3,
            max_fans: 21,
            default_fans: None,
            max_length: 512,
            mailbox_capacity: 16,
            lock_timeout_ms: 5000,
            fan_profile: FanProfile::default(),
            devices: Vec::new(),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "fanlink", "fanlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("fanlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Environment keys use `FANLINK_` and `__` as the nesting separator,
/// e.g. `FANLINK_PROFILES__LAB__PERIOD_MS=50`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FANLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Passcode resolution ─────────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/passcode"))
}

/// Resolve the passcode: profile's env var, then the system keyring,
/// then plaintext, then the factory default.
pub fn resolve_passcode(profile: &Profile, profile_name: &str) -> SecretString {
    let stored = keyring_entry(profile_name)
        .and_then(|entry| entry.get_password())
        .ok();
    resolve_passcode_with(profile, stored)
}

fn resolve_passcode_with(profile: &Profile, keyring: Option<String>) -> SecretString {
    // 1. Profile's passcode_env → env var lookup
    if let Some(ref env_name) = profile.passcode_env {
        if let Ok(val) = std::env::var(env_name) {
            return SecretString::from(val);
        }
    }

    // 2. System keyring
    if let Some(secret) = keyring {
        return SecretString::from(secret);
    }

    // 3. Plaintext in config
    if let Some(ref passcode) = profile.passcode {
        return SecretString::from(passcode.clone());
    }

    SecretString::from(DEFAULT_PASSCODE)
}

/// Store a passcode in the system keyring under `profile_name`.
pub fn store_passcode(profile_name: &str, passcode: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?.set_password(passcode)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a validated `CommunicatorConfig` from a profile.
pub fn profile_to_communicator_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<CommunicatorConfig, ConfigError> {
    communicator_config(profile, resolve_passcode(profile, profile_name))
}

/// Build a validated `CommunicatorConfig` from a profile and an already
/// resolved passcode.
pub fn communicator_config(
    profile: &Profile,
    passcode: SecretString,
) -> Result<CommunicatorConfig, ConfigError> {
    let bind_ip: IpAddr = profile
        .bind_ip
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "bind_ip".into(),
            reason: format!("invalid IP address: {}", profile.bind_ip),
        })?;

    let config = CommunicatorConfig {
        passcode,
        bind_ip,
        listener_port: profile.listener_port,
        broadcast_ip: profile.broadcast_ip.clone(),
        broadcast_port: profile.broadcast_port,
        http_port: profile.http_port,
        broadcast_period: Duration::from_millis(profile.broadcast_period_ms),
        period: Duration::from_millis(profile.period_ms),
        max_timeouts: profile.max_timeouts,
        handshake_attempts: profile.handshake_attempts,
        max_fans: profile.max_fans,
        default_fans: profile.default_fans.unwrap_or(profile.max_fans),
        max_length: profile.max_length,
        mailbox_capacity: profile.mailbox_capacity,
        lock_timeout: Duration::from_millis(profile.lock_timeout_ms),
        fan_profile: profile.fan_profile.clone(),
        saved_devices: profile.devices.clone(),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    #[test]
    fn test_passcode_prefers_env_over_keyring() {
        let expected = std::env::var("PATH").unwrap();
        let profile = Profile {
            passcode_env: Some("PATH".into()),
            passcode: Some("plain".into()),
            ..Profile::default()
        };
        let secret = resolve_passcode_with(&profile, Some("stored".into()));
        assert_eq!(secret.expose_secret(), expected);
    }

    #[test]
    fn test_passcode_keyring_then_plaintext_then_default() {
        let profile = Profile {
            passcode_env: Some("FANLINK_TEST_PASSCODE_UNSET".into()),
            passcode: Some("plain".into()),
            ..Profile::default()
        };
        assert_eq!(
            resolve_passcode_with(&profile, Some("stored".into())).expose_secret(),
            "stored"
        );
        assert_eq!(resolve_passcode_with(&profile, None).expose_secret(), "plain");
        assert_eq!(
            resolve_passcode_with(&Profile::default(), None).expose_secret(),
            DEFAULT_PASSCODE
        );
    }

    #[test]
    fn test_build_config_maps_fields() {
        let profile = Profile {
            bind_ip: "127.0.0.1".into(),
            period_ms: 50,
            max_fans: 8,
            ..Profile::default()
        };
        let config = communicator_config(&profile, SecretString::from("CT")).unwrap();
        assert_eq!(config.bind_ip.to_string(), "127.0.0.1");
        assert_eq!(config.period, Duration::from_millis(50));
        assert_eq!(config.max_fans, 8);
        assert_eq!(config.default_fans, 8);
        assert_eq!(config.listener_port, DEFAULT_LISTENER_PORT);
    }

    #[test]
    fn test_build_config_rejects_bad_bind_ip() {
        let profile = Profile {
            bind_ip: "not-an-ip".into(),
            ..Profile::default()
        };
        let result = communicator_config(&profile, SecretString::from("CT"));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_build_config_runs_core_validation() {
        let profile = Profile {
            broadcast_ip: "300.1.1.1".into(),
            ..Profile::default()
        };
        let result = communicator_config(&profile, SecretString::from("CT"));
        assert!(matches!(result, Err(ConfigError::Communicator(_))));
    }

    #[test]
    fn test_missing_default_profile_uses_factory_settings() {
        let config = Config::default();
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile, Profile::default());
        assert!(matches!(
            config.profile(Some("lab")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }
}
