use anyhow::Result;
use cbstore::core::log::init_logging;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Print the value stored at a key
    Get { key: String },
    /// Store a value (parsed as JSON, otherwise kept as a string)
    Set {
        key: String,
        value: String,
        /// Time-to-live in minutes, 0 for no expiry
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Delete a key
    Del { key: String },
    /// List keys matching a glob pattern
    Keys { pattern: Option<String> },
    /// Print the remaining time-to-live of a key
    Ttl { key: String },
    /// Flush the whole bucket
    Flush,
}

impl From<Commands> for cbstore::AppCommand {
    fn from(cmd: Commands) -> cbstore::AppCommand {
        match cmd {
            Commands::Get { key } => cbstore::AppCommand::Get { key },
            Commands::Set { key, value, ttl } => cbstore::AppCommand::Set { key, value, ttl },
            Commands::Del { key } => cbstore::AppCommand::Del { key },
            Commands::Keys { pattern } => cbstore::AppCommand::Keys { pattern },
            Commands::Ttl { key } => cbstore::AppCommand::Ttl { key },
            Commands::Flush => cbstore::AppCommand::Flush,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => cbstore::setup::setup(),
        Some(cmd) => cbstore::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}
