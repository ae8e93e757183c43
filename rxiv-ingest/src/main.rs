use clap::{Parser, Subcommand};
use rxiv_ingest::{
    config::IngestConfig,
    fetch::{Collection, Fetcher, HttpObjectStore},
    ingest::IngestContext,
    storage,
};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Pull arXiv bulk data and embed it into a local vector index.
///
/// Paths and defaults come from `DATA_PATH` and the `RXIV_*` variables,
/// read from the environment or a `.env` file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download the source manifest and every source archive it lists
    PullSource {
        /// Parallel downloads
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Download the PDF manifest and every PDF archive it lists
    PullPdf {
        /// Parallel downloads
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Embed every export container under <DATA_PATH>/arxiv/xml into the index
    Embed {
        /// Number of encoder devices (0 = one CPU worker)
        #[arg(long)]
        devices: Option<usize>,
        /// Texts per inference call
        #[arg(long)]
        batch_size: Option<usize>,
        /// Save the index after this many merged containers
        #[arg(long)]
        checkpoint_every: Option<usize>,
        /// Ignore any existing snapshot and start from an empty index
        #[arg(long)]
        fresh: bool,
    },
    /// Show statistics of the persisted index
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct IndexStats {
    path: String,
    vectors: usize,
    dimension: Option<usize>,
    containers: usize,
    encoder_fingerprint: Option<String>,
    saved_at: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = IngestConfig::from_env()?;

    match args.command {
        Commands::PullSource { concurrency } => pull(&config, Collection::Source, concurrency).await,
        Commands::PullPdf { concurrency } => pull(&config, Collection::Pdf, concurrency).await,
        Commands::Embed {
            devices,
            batch_size,
            checkpoint_every,
            fresh,
        } => {
            if devices.is_some() {
                config.devices = devices;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size.max(1);
            }
            if let Some(every) = checkpoint_every {
                config.checkpoint_every = every.max(1);
            }

            let ctx = IngestContext::load(&config).await?;
            let (index, report) = ctx.ingest_dir(&config.xml_dir(), fresh).await?;

            println!("Index: {} vectors at {}", index.len(), config.index_dir().display());
            println!(
                "Containers: {} merged, {} skipped (already ingested), {} failed",
                report.completed.len(),
                report.containers_skipped,
                report.failed.len()
            );
            println!(
                "Records: {} extracted, {} skipped as malformed",
                report.records_extracted, report.records_skipped
            );
            println!(
                "Units: {} inserted, {} duplicate ids skipped",
                report.units_inserted, report.duplicates_skipped
            );
            for failed in &report.failed {
                println!(
                    "  failed: {} after {} attempt(s): {}",
                    failed.container, failed.attempts, failed.cause
                );
            }
            Ok(())
        }
        Commands::Stats { format } => {
            let dir = config.index_dir();
            let stats = match storage::load(&dir)? {
                Some((index, info)) => IndexStats {
                    path: dir.display().to_string(),
                    vectors: index.len(),
                    dimension: index.dimension(),
                    containers: info.containers.len(),
                    encoder_fingerprint: info.encoder_fingerprint,
                    saved_at: Some(info.saved_at.to_rfc3339()),
                },
                None => IndexStats {
                    path: dir.display().to_string(),
                    vectors: 0,
                    dimension: None,
                    containers: 0,
                    encoder_fingerprint: None,
                    saved_at: None,
                },
            };

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary => {
                    println!("Index: {}", stats.path);
                    println!("  Vectors: {}", stats.vectors);
                    match stats.dimension {
                        Some(d) => println!("  Dimension: {d}"),
                        None => println!("  Dimension: (empty index)"),
                    }
                    println!("  Ingested containers: {}", stats.containers);
                    if let Some(fingerprint) = &stats.encoder_fingerprint {
                        println!("  Encoder: {fingerprint}");
                    }
                    if let Some(saved_at) = &stats.saved_at {
                        println!("  Saved at: {saved_at}");
                    }
                }
            }
            Ok(())
        }
    }
}

async fn pull(
    config: &IngestConfig,
    collection: Collection,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    let store = HttpObjectStore::new(
        config.object_store_url.clone(),
        config.bucket.clone(),
        config.requester_pays,
    );
    let fetcher = Fetcher::new(Arc::new(store), config.arxiv_dir())
        .with_retries(config.fetch_retries)
        .with_concurrency(concurrency.unwrap_or(config.fetch_concurrency));

    let summary = fetcher.pull(collection).await?;
    println!(
        "Downloaded {}, already present {}, missing {}, failed {}",
        summary.downloaded,
        summary.already_present,
        summary.missing,
        summary.failed.len()
    );
    for (key, cause) in &summary.failed {
        println!("  failed: {key}: {cause}");
    }
    if !summary.failed.is_empty() {
        anyhow::bail!("{} downloads failed", summary.failed.len());
    }
    Ok(())
}
