//! Subcommand implementations.

pub mod config;
pub mod monitor;
pub mod probe;

use url::Url;

use casalink_core::MiniserverConfig;

use crate::cli::GlobalOpts;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Build the client configuration from flags, profile, and defaults.
///
/// An `--address` flag sidesteps profiles entirely: credentials then come
/// from the environment or flags.
pub(crate) fn miniserver_config(global: &GlobalOpts) -> Result<MiniserverConfig, Box<dyn std::error::Error>> {
    let loaded = casalink_config::load_config_or_default();

    let mut config = match &global.address {
        Some(address) => {
            let auth_mode = if global.username.is_some() || std::env::var("CASALINK_USERNAME").is_ok()
            {
                "password"
            } else {
                "none"
            };
            let profile = casalink_config::Profile {
                address: address.clone(),
                auth_mode: auth_mode.into(),
                username: global.username.clone(),
                password: None,
                password_env: None,
                secure: None,
                timeout: None,
                keepalive: None,
            };
            casalink_config::profile_to_miniserver_config(&profile, "cli", &loaded.defaults)?
        }
        None => {
            let (name, profile) = loaded.select_profile(global.profile.as_deref())?;
            casalink_config::profile_to_miniserver_config(profile, name, &loaded.defaults)?
        }
    };

    if global.insecure {
        config.secure_override = Some(false);
    }
    Ok(config)
}

/// The controller base address, without resolving credentials.
pub(crate) fn base_url(global: &GlobalOpts) -> Result<Url, Box<dyn std::error::Error>> {
    let address = match &global.address {
        Some(address) => address.clone(),
        None => {
            let loaded = casalink_config::load_config_or_default();
            let (_, profile) = loaded.select_profile(global.profile.as_deref())?;
            profile.address.clone()
        }
    };
    Ok(address.parse()?)
}
