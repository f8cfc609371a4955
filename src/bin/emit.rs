//! Metadata Emitter CLI
//!
//! Loads a declaration document, runs the emit pipeline and writes
//! `meta.json`.

use std::path::PathBuf;

use anyhow::Context;
use apimeta::decl::load_from_file;
use apimeta::diagnostics::Severity;
use apimeta::{EmitterConfig, Pipeline};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apimeta-emit")]
#[command(about = "Interpret schema annotations and emit runtime type metadata")]
struct Cli {
    /// Declaration document exported by the schema compiler
    input: PathBuf,

    /// Output directory (overrides emit.output_dir)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the metadata to stdout instead of writing it
    #[arg(long)]
    stdout: bool,

    /// Exit non-zero when any warning is reported
    #[arg(long)]
    deny_warnings: bool,
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

    println!("📦 Loading declarations from {:?}", cli.input);
    let graph = load_from_file(&cli.input).with_context(|| format!("loading {}", cli.input.display()))?;
    println!("   {} models, {} annotations", graph.model_count(), graph.annotations().len());
    println!("   bundle: {}", &graph.bundle_hash[..12.min(graph.bundle_hash.len())]);

    let output = Pipeline::default().run(graph)?;
    println!(
        "🔗 {} messages, {} relocated",
        output.messages.len(),
        output.relocations.len()
    );

    for item in &output.diagnostics {
        let icon = match item.severity() {
            Severity::Warning => "⚠️ ",
            Severity::Info => "ℹ️ ",
        };
        println!("{} {}", icon, item);
    }

    if cli.stdout {
        println!("{}", output.metadata.to_json_pretty()?);
    } else {
        let dir = cli.output_dir.unwrap_or(config.emit.output_dir);
        let path = output.write_metadata(&dir, &config.emit.meta_file)?;
        println!("✅ Wrote {} entries to {:?}", output.metadata.len(), path);
    }

    let warnings = output.diagnostics.warning_count();
    if cli.deny_warnings && warnings > 0 {
        anyhow::bail!("{} warning(s) reported", warnings);
    }

    Ok(())
}
