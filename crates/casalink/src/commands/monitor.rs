//! `casalink monitor` -- stay connected and print what the controller is
//! doing: connection transitions plus periodic value snapshots.

use std::time::Duration;

use casalink_core::{ConnectionState, Miniserver};

use crate::cli::{GlobalOpts, MonitorArgs};
use crate::commands::CommandResult;

pub async fn run(global: &GlobalOpts, args: &MonitorArgs) -> CommandResult {
    let config = super::miniserver_config(global)?;
    println!("connecting to {} (ctrl-c to stop)", config.url);

    let client = Miniserver::new(config);
    client.start().await?;

    let mut state = client.connection_state();
    let mut ticker = (args.snapshot_secs > 0)
        .then(|| tokio::time::interval(Duration::from_secs(args.snapshot_secs)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("-- {current:?}");
                if current == ConnectionState::Active {
                    print_snapshot(&client, args.filter.as_deref());
                }
            }
            _ = next_tick(&mut ticker) => {
                if *state.borrow() == ConnectionState::Active {
                    print_snapshot(&client, args.filter.as_deref());
                }
            }
        }
    }

    println!("shutting down");
    client.shutdown().await;
    Ok(())
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn print_snapshot(client: &Miniserver, filter: Option<&str>) {
    let mut controls = client.controls();
    controls.sort_by(|a, b| a.name.cmp(&b.name));

    for control in controls {
        if let Some(needle) = filter {
            if !control.name.contains(needle) {
                continue;
            }
        }
        for record in &control.states {
            let value = record
                .value()
                .map_or_else(|| "-".to_string(), |v| v.to_string());
            println!("{} [{}] {} = {value}", control.name, control.kind, record.name);
        }
    }
}
