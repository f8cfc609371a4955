//! Configuration CLI
//!
//! Shows the effective configuration, writes a starter file, or checks one.

use std::path::PathBuf;

use apimeta::EmitterConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apimeta-config")]
#[command(about = "Inspect and initialize emitter configuration")]
struct Cli {
    /// Config file layered on top of the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Show,

    /// Write a config file with default values
    Init {
        #[arg(default_value = "apimeta.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load and validate the configuration
    Validate,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Show => {
            let config = EmitterConfig::load_from(cli.config.as_deref())?;
            print!("{}", config.to_toml()?);
        }
        Commands::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            EmitterConfig::default().save(&path)?;
            println!("✅ Wrote default configuration to {:?}", path);
        }
        Commands::Validate => {
            let config = EmitterConfig::load_from(cli.config.as_deref())?;
            config.validate()?;
            println!("✅ Configuration is valid");
        }
    }
    Ok(())
}
