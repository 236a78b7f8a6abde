//! `casalink probe` -- one-shot capability probe.

use std::time::Duration;

use casalink_proto::CapabilityProbe;

use crate::cli::GlobalOpts;
use crate::commands::CommandResult;

pub async fn run(global: &GlobalOpts) -> CommandResult {
    let url = super::base_url(global)?;
    let probe = CapabilityProbe::new(Duration::from_secs(5))?;

    let result = probe.probe(&url).await?;
    println!("controller: {url}");
    println!("version:    {}", result.version);
    println!(
        "transport:  {}",
        if result.secure_capable {
            "secure (wss)"
        } else {
            "insecure only (ws)"
        }
    );
    Ok(())
}
