//! Descriptor Registry CLI
//!
//! Writes a TypeScript module exporting every generated file descriptor
//! under a directory.

use std::path::PathBuf;

use anyhow::Context;
use apimeta::proto::{collect_descriptors, render_aggregator, write_aggregator};
use apimeta::EmitterConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apimeta-collect-descriptors")]
#[command(about = "Aggregate generated file descriptors into one module")]
struct Cli {
    /// Directory containing generated *_pb.ts files
    root: PathBuf,

    /// Output module (overrides descriptors.output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the module instead of writing it
    #[arg(long)]
    stdout: bool,
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
    let config = EmitterConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    config.validate()?;

    let options = config.collect_options();
    let output = cli.output.unwrap_or_else(|| config.descriptor_output(&cli.root));

    if cli.stdout {
        let files = collect_descriptors(&cli.root, &output, &options)?;
        print!("{}", render_aggregator(&files, &options));
        return Ok(());
    }

    let files = write_aggregator(&cli.root, &output, &options)
        .with_context(|| format!("collecting descriptors under {}", cli.root.display()))?;

    let aliased = files.iter().filter(|f| f.alias.is_some()).count();
    if aliased > 0 {
        println!("⚠️  {} duplicate descriptor name(s) aliased", aliased);
    }
    println!("✅ {} descriptor(s) → {:?}", files.len(), output);
    Ok(())
}
