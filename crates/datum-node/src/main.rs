//! Datum registry CLI
//!
//! Runs a registry node and offers operator tools for fingerprinting
//! content and checking that a published release still verifies.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use datum_core::{DatumConfig, DigestAlgorithm, IdentifierRef, Release};
use datum_fetch::FetchClient;
use datum_node::{DatumNode, ErrorBody};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "datum")]
#[command(about = "Datum - federated registry of permanent dataset identifiers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = "datum.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a registry node
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Fingerprint a local file or an origin URL
    Fingerprint {
        /// Path, `file://`, `http://` or `https://` URL
        source: String,

        /// Digest algorithm (sha256 or blake3); defaults to the configured one
        #[arg(short, long)]
        algorithm: Option<String>,
    },

    /// Resolve a release on a registry and check its origin still serves the recorded bytes
    Verify {
        /// Reference such as `acme/report` or `acme/report@3`
        reference: String,

        /// Registry base URL
        #[arg(short, long, default_value = "http://127.0.0.1:7070")]
        registry: String,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.registry.bind_address = bind;
            }
            serve(config).await?;
        }
        Commands::Fingerprint { source, algorithm } => {
            let algorithm = match algorithm {
                Some(name) => name.parse::<DigestAlgorithm>()?,
                None => config.fingerprint.algorithm,
            };
            fingerprint(&config, &source, algorithm).await?;
        }
        Commands::Verify { reference, registry } => {
            verify(&config, &reference, &registry).await?;
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<DatumConfig> {
    let mut config = if path.exists() {
        DatumConfig::load_from_file(path)?
    } else {
        info!(path = %path.display(), "config file not found; using defaults");
        DatumConfig::default()
    };
    config.merge_with_env()?;
    config.validate()?;
    Ok(config)
}

async fn serve(config: DatumConfig) -> Result<()> {
    let node = DatumNode::open(config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for shutdown signal"),
        }
    });

    node.serve(shutdown).await
}

fn origin_url(source: &str) -> Result<String> {
    if let Ok(url) = Url::parse(source) {
        if matches!(url.scheme(), "http" | "https" | "file") {
            return Ok(url.to_string());
        }
    }
    let path = std::fs::canonicalize(source).with_context(|| format!("cannot open {source}"))?;
    match Url::from_file_path(&path) {
        Ok(url) => Ok(url.to_string()),
        Err(()) => bail!("cannot express {} as a file URL", path.display()),
    }
}

async fn fingerprint(config: &DatumConfig, source: &str, algorithm: DigestAlgorithm) -> Result<()> {
    let url = origin_url(source)?;
    let client = FetchClient::from_config(&config.fetch)?;
    let digest = client.fingerprint_origin(&url, algorithm, None).await?;
    println!("{}  {} bytes  {source}", digest.fingerprint, digest.size);
    Ok(())
}

async fn verify(config: &DatumConfig, reference: &str, registry: &str) -> Result<()> {
    let reference = IdentifierRef::parse(reference)?;
    let base = Url::parse(registry).with_context(|| format!("invalid registry url {registry}"))?;
    let url = base.join(&format!("api/v1/resolve/{reference}"))?;

    let response = reqwest::Client::new().get(url.clone()).send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(error) => bail!("{}: {}", error.code, error.message),
            Err(_) => bail!("{url} answered {status}"),
        }
    }

    let resolution: serde_json::Value = serde_json::from_slice(&body)?;
    let release: Release = serde_json::from_value(resolution["release"].clone())?;
    if let Some(markers) = resolution["markers"].as_array().filter(|m| !m.is_empty()) {
        warn!(markers = markers.len(), "registry reports integrity markers for this identifier");
    }
    if !resolution["retracted_by"].is_null() {
        warn!(version = release.version, "release has been retracted");
    }

    let client = FetchClient::from_config(&config.fetch)?;
    let content = client.fetch_and_verify(&release, None).await?;
    println!(
        "verified {}@{}  {}  {} bytes",
        content.identifier(),
        content.version(),
        content.fingerprint(),
        content.bytes().len()
    );
    Ok(())
}
