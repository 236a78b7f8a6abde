//! `casalink config` -- configuration inspection.

use crate::cli::ConfigCommand;
use crate::commands::CommandResult;

pub fn run(cmd: &ConfigCommand) -> CommandResult {
    match cmd {
        ConfigCommand::Path => {
            println!("{}", casalink_config::config_path().display());
            Ok(())
        }
        ConfigCommand::Show => {
            let mut config = casalink_config::load_config()?;
            for profile in config.profiles.values_mut() {
                if profile.password.is_some() {
                    profile.password = Some("<redacted>".into());
                }
            }
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
