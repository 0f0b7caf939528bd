mod commands;
mod config;
mod connectivity;
mod drainer;
mod entity;
mod logging;
mod models;
mod router;
mod store;
#[cfg(test)]
mod testing;
mod transport;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crm-offline")]
#[command(about = "Offline cache and write-behind queue for the CRM API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/crm-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_file.as_deref())?;

  let app = commands::App::new(&config, args.offline)?;
  app.run(args.command).await
}
