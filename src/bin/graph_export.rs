use std::path::PathBuf;

use apimeta::decl::load_from_file;
use apimeta::Pipeline;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apimeta-graph")]
#[command(about = "Export the message reference graph to DOT/SVG format")]
struct Cli {
    /// Declaration document
    input: PathBuf,

    /// Output file (defaults to messages.dot)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: dot or svg
    #[arg(short, long, default_value = "dot")]
    format: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    println!("Loading declarations from: {:?}", cli.input);
    let output = Pipeline::default().run(load_from_file(&cli.input)?)?;
    let graph = output.message_graph();

    println!("Graph loaded: {} messages, {} edges", graph.node_count(), graph.edge_count());
    let recursive = graph.recursive_groups();
    if !recursive.is_empty() {
        println!("🔁 {} recursive group(s)", recursive.len());
    }

    let dot_content = graph.to_dot(&output.graph);

    match cli.format.as_str() {
        "dot" => {
            let output_path = cli.output.unwrap_or_else(|| PathBuf::from("messages.dot"));
            std::fs::write(&output_path, &dot_content)?;
            println!("✅ Exported DOT to: {:?}", output_path);
        }
        "svg" => {
            let output_path = cli.output.unwrap_or_else(|| PathBuf::from("messages.svg"));

            let temp_dot = output_path.with_extension("temp.dot");
            std::fs::write(&temp_dot, &dot_content)?;

            let result = std::process::Command::new("dot")
                .arg("-Tsvg")
                .arg(&temp_dot)
                .arg("-o")
                .arg(&output_path)
                .output()?;

            let _ = std::fs::remove_file(&temp_dot);

            if result.status.success() {
                println!("✅ Exported SVG to: {:?}", output_path);
            } else {
                eprintln!("❌ GraphViz conversion failed:");
                eprintln!("{}", String::from_utf8_lossy(&result.stderr));
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("❌ Invalid format. Use 'dot' or 'svg'");
            std::process::exit(1);
        }
    }

    Ok(())
}
