use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use api::{AppConfig, Metrics, Services, init_tracing};
use extract::PipelineReport;
use index::LoadResult;

#[derive(Parser)]
#[command(name = "esg_pipeline")]
#[command(about = "Build the ESG knowledge graph from the source table")]
struct Cli {
    /// Input table, overriding DATA_FILE_PATH
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract partial graphs batch by batch and write the consolidated graph
    Extract,
    /// Re-extract only the batches that failed in earlier runs
    Retry,
    /// Load the consolidated graph into the graph store
    Load,
    /// Fill in missing embeddings on the target labels
    Embed,
    /// Extract, load and embed in one go
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    init_tracing(config.log_format);

    let services = Services::new(config, Metrics::new());

    match cli.command {
        Command::Extract => print_extraction(&services.extract(cli.input, false).await?),
        Command::Retry => print_extraction(&services.extract(cli.input, true).await?),
        Command::Load => check_load(&services.load().await?)?,
        Command::Embed => println!("{}", services.embed().await?),
        Command::All => {
            print_extraction(&services.extract(cli.input, false).await?);
            check_load(&services.load().await?)?;
            println!("{}", services.embed().await?);
        }
    }

    println!("\n{}", serde_json::to_string_pretty(&services.metrics().snapshot())?);
    Ok(())
}

fn print_extraction(report: &PipelineReport) {
    println!("=== Extraction ===");
    println!("Rows:                  {}", report.total_rows);
    println!("Resumed from row:      {}", report.resumed_from);
    println!("Batches extracted:     {}", report.batches_extracted);
    println!("Batches failed:        {}", report.batches_failed);
    println!("Quarantined records:   {}", report.quarantined);
    println!("Nodes:                 {}", report.nodes);
    println!("Relationships:         {}", report.relationships);
    println!("Dangling relationships:{}", report.dangling_relationships);
    if report.pending_failed > 0 {
        println!("⚠️  {} batches still missing, run `esg_pipeline retry`", report.pending_failed);
    }
    println!("✅ Saved to {}", report.output_path.display());
}

fn check_load(result: &LoadResult) -> Result<()> {
    println!("=== Load ===");
    println!("Nodes:                 {}", result.node_count);
    println!("Relationships:         {}", result.relationship_count);
    println!("Failed relationships:  {}", result.failed_relationships);

    if !result.is_success() {
        bail!("Graph load failed: {}", result.error.as_deref().unwrap_or("unknown error"));
    }
    println!("✅ Loaded");
    Ok(())
}
