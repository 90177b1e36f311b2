mod certs;
mod commands;
mod conf;
mod config;
mod constants;
mod migrate;
mod proxy;
mod runner;
mod setup_script;
mod shell;
mod stamp;
mod template;
mod ui;
mod waiter;

use std::path::PathBuf;
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::debug;

use crate::config::{Env, Layout, Settings};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Accepted for compatibility with older images; ports are not parsed
    #[arg(long)]
    parse_ports: bool,

    /// YAML file overriding the default filesystem layout
    #[arg(short, long)]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the server, certificates and nginx config (default)
    Bootstrap,
    /// Show what the bootstrap has set up so far
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn execute(cli: Cli) -> Result<()> {
    if cli.parse_ports {
        debug!("--parse-ports is reserved and has no effect");
    }

    let layout = match &cli.layout {
        Some(path) => Layout::load(path)?,
        None => Layout::default(),
    };
    let settings = Settings::resolve(&Env::from_process())?;
    debug!(
        "Hostname {}, TLS mode {}, version {:?}",
        settings.hostname,
        settings.tls_mode().as_str(),
        settings.version
    );

    match cli.command.unwrap_or(Commands::Bootstrap) {
        Commands::Bootstrap => commands::bootstrap(&settings, &layout),
        Commands::Status { json } => commands::status(&settings, &layout, json),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = execute(cli) {
        ui::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
