mod cli;
mod client;
mod config;
mod dns;
mod events;
mod executor;
mod scope;
mod sniffer;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use cli::{Args, Command};
use client::ApiClient;
use config::Config;
use executor::Executor;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        let interfaces = sniffer::list_interfaces()?;
        println!("Available network interfaces:");
        for device in interfaces {
            let status = if device.flags.is_up() { "UP" } else { "DOWN" };
            let running = if device.flags.is_running() {
                "RUNNING"
            } else {
                ""
            };
            let loopback = if device.flags.is_loopback() {
                "LOOPBACK"
            } else {
                ""
            };

            println!("  {} [{}] {} {}", device.name, status, running, loopback);

            if let Some(desc) = device.desc {
                println!("    Description: {desc}");
            }
        }
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let Some(command) = args.command else {
        bail!("no command given; try start or send --format <format> <file>");
    };

    let config = Config::load(&args.config)?;
    let client = Arc::new(ApiClient::new(
        &config.api.url,
        config.api.key.clone(),
        config.api_timeout(),
    )?);
    let mut executor = Executor::new(client, config)?;

    match command {
        Command::Start => {
            info!("starting dnspipe");
            executor.start().await
        }
        Command::Send { format, file } => executor.send(format, &file).await,
    }
}
