//! Photon Command-Line Interface
//!
//! A headless host shell for the capture pipeline: frames come from a
//! directory of JPEG files and location from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Photon - signed, pinned frame uploads
#[derive(Parser)]
#[command(name = "photon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory path
    #[arg(short, long, env = "PHOTON_DATA_DIR", default_value = "~/.photon")]
    data_dir: String,

    /// Configuration file (JSON)
    #[arg(short, long, env = "PHOTON_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the signing key and device certificate (created on first use)
    Identity,

    /// Register this device with the backend
    Register,

    /// Capture and upload frames from a directory until Ctrl+C
    Run {
        /// Directory of .jpg/.jpeg frames, uploaded in name order
        dir: String,

        /// Latitude of the fixed location
        #[arg(long, requires = "lon")]
        lat: Option<f64>,

        /// Longitude of the fixed location
        #[arg(long, requires = "lat")]
        lon: Option<f64>,

        /// Accuracy of the fixed location, meters
        #[arg(long, default_value = "10")]
        accuracy: f32,
    },

    /// Upload a single frame
    Upload {
        /// JPEG file to upload
        file: String,
    },

    /// Show recent upload outcomes
    History {
        /// Clear the history instead
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let data_dir = shellexpand::tilde(&cli.data_dir).to_string();
    let config = cli
        .config
        .as_deref()
        .map(|path| shellexpand::tilde(path).to_string());
    let env = commands::Env {
        data_dir: data_dir.into(),
        config_path: config.map(Into::into),
    };

    let command = cli.command.unwrap_or(Commands::Identity);

    match command {
        Commands::Identity => {
            commands::show_identity(&env)?;
        }
        Commands::Register => {
            commands::register(&env).await?;
        }
        Commands::Run {
            dir,
            lat,
            lon,
            accuracy,
        } => {
            let location = lat.zip(lon).map(|(latitude, longitude)| {
                photon_core::metadata::Location {
                    latitude,
                    longitude,
                    accuracy,
                }
            });
            commands::run(&env, &dir, location).await?;
        }
        Commands::Upload { file } => {
            commands::upload_file(&env, &file).await?;
        }
        Commands::History { clear } => {
            commands::show_history(&env, clear)?;
        }
    }

    Ok(())
}
