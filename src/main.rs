use std::{
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use docstage::{
    api,
    config::{self, Config},
    logging,
    pipeline::{BatchEvent, PipelineConfig, RouteError, RouteStage, Stage},
    runtime::Runtime,
};
use tokio::net::TcpListener;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docstage",
    about = "Queue-driven document ingestion: parse, chunk, embed, store"
)]
struct Cli {
    /// Log file; defaults to DOCSTAGE_LOG_FILE, then logs/docstage.log.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the stage handlers over HTTP.
    Serve,
    /// Run one stage over a broker batch event read from a file and print the response.
    Handle {
        #[arg(long)]
        stage: String,
        #[arg(long)]
        event: PathBuf,
    },
    /// Create pipeline messages for uploaded files and enqueue them for parsing.
    Ingest {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        knowledge_base: String,
        /// JSON file holding the pipeline configuration.
        #[arg(long)]
        pipeline_config: PathBuf,
        /// Object key of a single upload.
        #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
        key: Option<String>,
        /// Directory mirroring the bucket; every file below it is ingested by relative path.
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Prefix prepended to keys discovered under --dir.
        #[arg(long, default_value = "")]
        prefix: String,
    },
    /// Validate configuration and routes, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let env_file = config::load_dotenv();
    logging::init_tracing(cli.log_file.as_deref());
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }
    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Command::Serve => serve(&config).await,
        Command::Handle { stage, event } => handle(&config, &stage, &event).await,
        Command::Ingest {
            agent,
            knowledge_base,
            pipeline_config,
            key,
            dir,
            prefix,
        } => {
            let pipeline_config = read_pipeline_config(&pipeline_config)?;
            let runtime = Runtime::from_config(&config)?;
            let keys = match (key, dir) {
                (Some(key), _) => vec![key],
                (None, Some(dir)) => collect_keys(&dir, &prefix)?,
                (None, None) => bail!("either --key or --dir is required"),
            };
            ingest(&runtime, &agent, &knowledge_base, &pipeline_config, keys).await
        }
        Command::CheckConfig => check_config(&config),
    }
}

async fn serve(config: &Config) -> Result<()> {
    let runtime = Arc::new(Runtime::from_config(config)?);
    let app = api::create_router(runtime);

    let (listener, port) = bind_listener(config.server_port)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn handle(config: &Config, stage: &str, event: &Path) -> Result<()> {
    let stage = Stage::from_name(stage).ok_or_else(|| anyhow!("unknown stage '{stage}'"))?;
    let raw = fs::read_to_string(event)
        .with_context(|| format!("failed to read event {}", event.display()))?;
    let event: BatchEvent = serde_json::from_str(&raw).context("event is not a batch event")?;

    let runtime = Runtime::from_config(config)?;
    let response = runtime.processor(stage).handle_event(event).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn read_pipeline_config(path: &Path) -> Result<PipelineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline config {}", path.display()))?;
    serde_json::from_str(&raw).context("invalid pipeline config")
}

fn collect_keys(dir: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        keys.push(format!("{prefix}{key}"));
    }
    Ok(keys)
}

async fn ingest(
    runtime: &Runtime,
    agent: &str,
    knowledge_base: &str,
    pipeline_config: &PipelineConfig,
    keys: Vec<String>,
) -> Result<()> {
    let single = keys.len() == 1;
    let mut ingested = 0usize;
    let mut skipped = 0usize;

    for key in keys {
        match runtime
            .router()
            .ingest(agent, knowledge_base, &key, pipeline_config.clone())
            .await
        {
            Ok(message) => {
                ingested += 1;
                println!("{key}\t{}", message.id);
            }
            Err(RouteError::Unsupported(error)) if !single => {
                skipped += 1;
                tracing::warn!(key = %key, error = %error, "Skipping unsupported file");
            }
            Err(error) => return Err(error).with_context(|| format!("failed to ingest {key}")),
        }
    }

    tracing::info!(ingested, skipped, "Ingestion finished");
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    Runtime::from_config(config)?;
    for stage in RouteStage::ALL {
        for discriminator in stage.discriminators() {
            let queue = config.routes.resolve_destination(stage, discriminator)?;
            let label = if discriminator.is_empty() { "*" } else { discriminator };
            println!("{stage}\t{label}\t{queue}");
        }
    }
    println!("configuration ok");
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8080..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8080-8099",
    ))
}
