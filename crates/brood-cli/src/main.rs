//! brood - launch and supervise a development server.
//!
//! # Usage
//!
//! ```bash
//! # Start the server configured in ./brood.toml
//! brood start
//!
//! # Start it in production mode
//! brood start --environment production
//!
//! # Run a one-off command under supervision
//! brood run --stream -- npm test
//!
//! # Show the effective configuration
//! brood config show
//! ```

use anyhow::{Context, Result};
use brood_cli::{ConfigFormat, LauncherConfig, commands, logging, server};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "brood")]
#[command(about = "brood - launch and supervise child processes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BROOD_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured server and supervise it
    Start {
        /// Runtime mode exported to the server (overrides the config)
        #[arg(short, long)]
        environment: Option<String>,
    },

    /// Run a command under supervision and exit with its status
    Run {
        /// Echo output as it arrives instead of after exit
        #[arg(short, long)]
        stream: bool,

        /// Program to run
        program: String,

        /// Arguments passed to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output format
        #[arg(short, long, default_value = "toml")]
        format: FormatArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Toml,
    Json,
}

impl From<FormatArg> for ConfigFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Toml => ConfigFormat::Toml,
            FormatArg::Json => ConfigFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let filter = logging::init(cli.verbose);

    let mut config = LauncherConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    logging::apply_level(filter.as_ref(), &config.general.log_level);

    match cli.command {
        Commands::Start { environment } => {
            if let Some(environment) = environment {
                config.server.environment = environment;
            }
            server::start(&config).await
        }
        Commands::Run {
            stream,
            program,
            args,
        } => commands::run(&config, &program, &args, stream).await,
        Commands::Config(ConfigCommands::Show { format }) => {
            commands::show_config(&config, format.into())?;
            Ok(0)
        }
    }
}
