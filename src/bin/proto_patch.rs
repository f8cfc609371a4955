//! Proto Tree Patcher CLI
//!
//! Nests `<pkg>/<version>.proto` as `<pkg>/<version>/<pkg>.proto` and
//! rewrites imports to match. Run once, right after the schema compiler.

use std::path::PathBuf;

use anyhow::Context;
use apimeta::proto::{plan_patch, ImportRewrite};
use apimeta::EmitterConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apimeta-proto-patch")]
#[command(about = "Relocate generated proto files and rewrite their imports")]
struct Cli {
    /// Root of the generated proto tree
    root: PathBuf,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only rewrite imports that appear as whole quoted paths
    #[arg(long)]
    quoted: bool,

    /// Show what would change without touching the tree
    #[arg(long)]
    dry_run: bool,
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
    let mut options = config.patch_options();
    if cli.quoted {
        options.rewrite = ImportRewrite::Quoted;
    }

    let plan = plan_patch(&cli.root, &options).with_context(|| format!("scanning {}", cli.root.display()))?;
    if plan.is_empty() {
        println!("ℹ️  Nothing to relocate under {:?}", cli.root);
        return Ok(());
    }

    println!("🔍 {} file(s) to relocate", plan.relocations().len());
    for import in plan.imports() {
        println!("   {} → {}", import.old, import.new);
    }

    if cli.dry_run {
        println!();
        for preview in plan.preview()? {
            if !preview.diff.is_empty() {
                print!("{}", preview.diff);
            }
        }
        println!("🧪 Dry run, nothing written");
        return Ok(());
    }

    let report = plan.apply()?;
    println!(
        "✅ Relocated {} file(s), rewrote imports in {}",
        report.relocated, report.rewritten
    );
    Ok(())
}
