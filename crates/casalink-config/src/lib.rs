//! Shared configuration for casalink binaries.
//!
//! TOML profiles, credential resolution (keyring + env + plaintext),
//! and translation to `casalink_core::MiniserverConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use casalink_core::{AuthMethod, MiniserverConfig, ReconnectPolicy};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    NoSuchProfile { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

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
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults applied where a profile is silent.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named controller profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The profile to use: an explicit name, or the configured default.
    pub fn select_profile<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name, p))
            .ok_or_else(|| ConfigError::NoSuchProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Command response timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Keepalive cadence in seconds.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,

    /// Reconnect delay after communication failures, in seconds.
    #[serde(default = "default_comm_delay")]
    pub comm_delay: u64,

    /// Reconnect delay after rejected credentials, in seconds.
    #[serde(default = "default_credential_delay")]
    pub credential_delay: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            keepalive: default_keepalive(),
            comm_delay: default_comm_delay(),
            credential_delay: default_credential_delay(),
        }
    }
}

fn default_timeout() -> u64 {
    4
}
fn default_keepalive() -> u64 {
    240
}
fn default_comm_delay() -> u64 {
    30
}
fn default_credential_delay() -> u64 {
    60
}

/// A named controller profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Controller base address (e.g., "http://192.168.1.77").
    pub address: String,

    /// Auth mode: "none" or "password".
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,

    /// Username for password auth.
    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env).
    pub password: Option<String>,

    /// Environment variable name holding the password.
    pub password_env: Option<String>,

    /// Force secure/insecure transport instead of probing.
    pub secure: Option<bool>,

    /// Override the command response timeout, in seconds.
    pub timeout: Option<u64>,

    /// Override the keepalive cadence, in seconds.
    pub keepalive: Option<u64>,
}

fn default_auth_mode() -> String {
    "password".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "casalink", "casalink").map_or_else(
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
    p.push("casalink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("CASALINK_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a password from the credential chain: profile env var, the
/// well-known env var, system keyring, then plaintext config.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(pw) = std::env::var("CASALINK_PASSWORD") {
        return Ok(SecretString::from(pw));
    }

    if let Ok(entry) = keyring::Entry::new("casalink", &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve the [`AuthMethod`] from a profile's `auth_mode` field.
pub fn resolve_auth(profile: &Profile, profile_name: &str) -> Result<AuthMethod, ConfigError> {
    match profile.auth_mode.as_str() {
        "none" => Ok(AuthMethod::None),
        "password" => {
            let user = profile
                .username
                .clone()
                .or_else(|| std::env::var("CASALINK_USERNAME").ok())
                .ok_or_else(|| ConfigError::NoCredentials {
                    profile: profile_name.into(),
                })?;
            let password = resolve_password(profile, profile_name)?;
            Ok(AuthMethod::Password { user, password })
        }
        other => Err(ConfigError::Validation {
            field: "auth_mode".into(),
            reason: format!("expected 'none' or 'password', got '{other}'"),
        }),
    }
}

// ── Translation to core config ──────────────────────────────────────

/// Build a `MiniserverConfig` from a profile plus global defaults.
pub fn profile_to_miniserver_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<MiniserverConfig, ConfigError> {
    let url: url::Url = profile
        .address
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "address".into(),
            reason: format!("invalid URL: {}", profile.address),
        })?;

    let auth = resolve_auth(profile, profile_name)?;

    let mut config = MiniserverConfig::new(url, auth);
    config.response_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.keepalive_interval =
        Duration::from_secs(profile.keepalive.unwrap_or(defaults.keepalive));
    config.reconnect = ReconnectPolicy {
        communication: Duration::from_secs(defaults.comm_delay),
        credential: Duration::from_secs(defaults.credential_delay),
    };
    config.secure_override = profile.secure;
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────
