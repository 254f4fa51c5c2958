use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::sniffer::Format;

#[derive(Parser, Debug)]
#[command(name = "dnspipe")]
#[command(about = "DNS forensics agent: forward observed queries to an analytics API", long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "/etc/dnspipe/dnspipe.toml")]
    pub config: PathBuf,

    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// List capture devices and exit
    #[arg(long)]
    pub list_interfaces: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture DNS queries on the configured interface and forward them
    Start,
    /// Forward DNS queries from an offline capture or log file
    Send {
        /// Input file format
        #[arg(long, value_enum)]
        format: Format,

        /// File to read
        file: PathBuf,
    },
}
