//! imgclass - image classification pipeline CLI
//!
//! Runs batches of stored images through ingest, classify and confidence
//! filter, and reports one outcome per item.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imgclass_common::config::{load_or_default, resolve_config_source, write_toml, CONFIG_ENV_VAR};
use imgclass_pipeline::codec;
use imgclass_pipeline::record::{parse_records, StageRecord};
use imgclass_pipeline::{BatchStatus, FanOutCoordinator, Orchestrator, PipelineConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for imgclass
#[derive(Parser, Debug)]
#[command(name = "imgclass")]
#[command(about = "Image classification pipeline with confidence filtering")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a batch of input records through the pipeline
    Run {
        /// JSON array or JSON lines of input records
        input: PathBuf,

        /// Maximum items in flight
        #[arg(long, env = "IMGCLASS_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Confidence threshold in [0, 1]
        #[arg(long, env = "IMGCLASS_THRESHOLD")]
        threshold: Option<f64>,

        /// Inference endpoint URL
        #[arg(long, env = "IMGCLASS_ENDPOINT_URL")]
        endpoint_url: Option<String>,

        /// Write the batch report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write final records of accepted items here as JSON lines
        #[arg(long)]
        records: Option<PathBuf>,
    },

    /// Base64-encode a file to stdout
    Encode {
        file: PathBuf,
    },

    /// Decode a base64 file
    Decode {
        input: PathBuf,
        output: PathBuf,
    },

    /// Print the resolved configuration as TOML
    ShowConfig {
        /// Also write it to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgclass_pipeline=info,imgclass=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            input,
            concurrency,
            threshold,
            endpoint_url,
            output,
            records,
        } => {
            let mut config = load_config(args.config.as_deref())?;
            if let Some(c) = concurrency {
                config.concurrency = c;
            }
            if let Some(t) = threshold {
                config.threshold = t;
            }
            if let Some(url) = endpoint_url {
                config.endpoint.url = url;
            }
            run_batch(config, &input, output.as_deref(), records.as_deref()).await
        }
        Command::Encode { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}", codec::encode(&bytes));
            Ok(ExitCode::SUCCESS)
        }
        Command::Decode { input, output } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let bytes = codec::decode(text.trim()).context("Input is not valid base64")?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ShowConfig { write } => {
            let config = load_config(args.config.as_deref())?;
            let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", text);
            if let Some(path) = write {
                write_toml(&config, &path)?;
                info!(path = %path.display(), "Configuration written");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli_path: Option<&Path>) -> Result<PipelineConfig> {
    let source = resolve_config_source(cli_path, CONFIG_ENV_VAR);
    info!(source = ?source, "Resolving configuration");
    let config: PipelineConfig = load_or_default(&source)?;
    Ok(config)
}

async fn run_batch(
    config: PipelineConfig,
    input: &Path,
    output: Option<&Path>,
    records_path: Option<&Path>,
) -> Result<ExitCode> {
    config.validate().context("Invalid configuration")?;

    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let tasks = parse_records(&text)
        .context("Failed to parse input records")?
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            record
                .into_task()
                .map_err(|e| anyhow::anyhow!("Record {}: {}", i, e))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        items = tasks.len(),
        threshold = config.threshold,
        concurrency = config.concurrency,
        "Starting batch"
    );

    let orchestrator = Arc::new(
        Orchestrator::from_config(&config).context("Failed to initialize pipeline")?,
    );
    let coordinator = FanOutCoordinator::new(orchestrator, config.concurrency)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let report = coordinator.run_batch(tasks, &cancel).await;

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    if let Some(path) = records_path {
        let lines = report
            .outcomes
            .iter()
            .filter_map(StageRecord::from_outcome)
            .map(|r| serde_json::to_string(&r))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to serialize records")?;
        std::fs::write(path, lines.join("\n"))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match report.status {
        BatchStatus::AllSucceeded | BatchStatus::Empty => Ok(ExitCode::SUCCESS),
        status => {
            warn!(status = status.as_str(), failed = report.failed, "Batch had failures");
            Ok(ExitCode::from(2))
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling batch");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling batch");
        },
    }
}
