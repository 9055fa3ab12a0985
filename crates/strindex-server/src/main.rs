//! strindex binary
//!
//! Indexes a batch of metric payloads (one JSON object per line) and writes
//! the indexed metrics to stdout, one JSON object per line.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! strindex --config config.yaml --input batch.jsonl
//!
//! # With environment variables only, reading stdin
//! STRINDEX_INDEXER__BACKEND=mock strindex < batch.jsonl
//! ```

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use strindex_server::handlers::batch::{BatchOrchestrator, MetricBatch};
use strindex_server::logging::{init_logging, LoggingConfig};
use strindex_server::{build_indexer, StrindexConfig};

/// strindex - tenant-scoped string indexer for metrics ingestion
#[derive(Parser, Debug)]
#[command(name = "strindex")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// File of JSON-lines metric payloads; reads stdin when omitted
    #[arg(short, long)]
    input: Option<String>,

    /// Create the backing table and indexes before indexing
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        StrindexConfig::load(config_path)?
    } else {
        StrindexConfig::from_env()?
    };
    if args.migrate {
        config.indexer.run_migrations = true;
    }

    init_logging(LoggingConfig::from(&config.logging));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.indexer.backend,
        use_case = %config.indexer.use_case,
        "Starting strindex"
    );

    let stack = build_indexer(&config).await?;
    stack.indexer.validate().await?;
    info!(backend = %stack.backend, "Indexer ready");

    let input = match &args.input {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let batch = MetricBatch::from_json_lines(&input)?;
    let received = batch.len() + batch.invalid();

    let orchestrator = BatchOrchestrator::new(stack.indexer, stack.use_case);
    let output = orchestrator.process(batch).await?;

    let mut stdout = tokio::io::stdout();
    for metric in &output.metrics {
        let mut line = serde_json::to_vec(metric)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;

    info!(
        received,
        indexed = output.metrics.len(),
        rate_limited = output.rate_limited,
        invalid = output.invalid,
        "Batch indexed"
    );

    Ok(())
}
