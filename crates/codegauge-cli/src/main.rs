//! Codegauge CLI - terminal client for the Codegauge dashboard.

use clap::{Parser, Subcommand};
use codegauge_sync::{LogFormat, SyncConfig};
use std::path::PathBuf;

mod commands;
mod logging;

/// Codegauge - live code-quality dashboard client
#[derive(Parser, Debug)]
#[command(name = "codegauge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Push endpoint, e.g. ws://127.0.0.1:8080/ws
    #[arg(long)]
    ws_url: Option<String>,

    /// REST API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// User to connect as
    #[arg(short, long)]
    user: Option<String>,

    /// Bearer token
    #[arg(long)]
    token: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stay connected and print events as they arrive (default)
    Watch,

    /// Load the current state, print it and exit
    Snapshot {
        /// Seconds to wait for the push connection
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: codegauge_sync::SyncError| e.to_string())
}

impl Cli {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(ws_url) = &self.ws_url {
            config.ws_url.clone_from(ws_url);
        }
        if let Some(api_url) = &self.api_url {
            config.api_url.clone_from(api_url);
        }
        if let Some(user) = &self.user {
            config.user_id = Some(user.as_str().into());
        }
        if let Some(token) = &self.token {
            config.auth_token = Some(token.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        match self.verbose {
            0 => {}
            1 => config.log_level = "debug".to_string(),
            _ => config.log_level = "trace".to_string(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match SyncConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    cli.apply(&mut config);

    logging::init_logging(&config.log_level, config.log_format);

    let result = match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => commands::watch(&config).await,
        Commands::Snapshot { timeout } => commands::snapshot(&config, timeout).await,
        Commands::Config => commands::show_config(&config),
        Commands::Version => {
            println!("codegauge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
