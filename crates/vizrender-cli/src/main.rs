//! VizRender CLI
//!
//! The `vizrender` command renders visualization specs through the cached
//! pipeline.
//!
//! ## Commands
//!
//! - `render`: render a spec file, answering from the cache when possible
//! - `fingerprint`: print a spec's cache key
//! - `stats`: summarize a persistent cache directory
//! - `gc`: drop expired entries and unreferenced bodies from a cache directory
//! - `show-config`: print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use vizrender_core::{
    fingerprint_with, Artifact, Dispatcher, PipelineConfig, ProcessSandboxFactory,
    RemoteSandboxFactory, RenderCache, RenderResult, RendererTags, SandboxFactory,
    SystemClock, VisualizationSpec,
};

#[derive(Parser)]
#[command(name = "vizrender")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Render and cache LLM-produced visualizations", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "VIZRENDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a spec file
    Render {
        /// Path to the visualization spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Where sandboxed scenes run
        #[arg(long, value_enum, default_value_t = Backend::Process)]
        backend: Backend,

        /// Remote sandbox service base URL
        #[arg(long, env = "VIZRENDER_SANDBOX_ENDPOINT", required_if_eq("backend", "remote"))]
        endpoint: Option<String>,

        /// Bearer token for the remote sandbox service
        #[arg(long, env = "VIZRENDER_SANDBOX_TOKEN", hide_env_values = true)]
        api_token: Option<String>,

        /// Persistent cache directory (overrides cache.persist_dir)
        #[arg(long, env = "VIZRENDER_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Write the artifact here instead of printing the result
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print the cache key of a spec
    Fingerprint {
        /// Path to the visualization spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// Show entry count and size of a cache directory
    Stats {
        #[arg(long, env = "VIZRENDER_CACHE_DIR")]
        cache_dir: PathBuf,
    },

    /// Remove expired entries and unreferenced bodies from a cache directory
    Gc {
        #[arg(long, env = "VIZRENDER_CACHE_DIR")]
        cache_dir: PathBuf,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Local child processes
    Process,
    /// Remote sandbox service over HTTP
    Remote,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    vizrender_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            spec,
            backend,
            endpoint,
            api_token,
            cache_dir,
            out,
        } => {
            cmd_render(
                config,
                &spec,
                backend,
                endpoint,
                api_token,
                cache_dir,
                out.as_deref(),
            )
            .await
        }
        Commands::Fingerprint { spec } => cmd_fingerprint(&config, &spec),
        Commands::Stats { cache_dir } => cmd_stats(config, cache_dir),
        Commands::Gc { cache_dir } => cmd_gc(config, cache_dir).await,
        Commands::ShowConfig => cmd_show_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_spec(path: &Path) -> Result<VisualizationSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec file: {}", path.display()))?;
    VisualizationSpec::from_json(&text).context("Invalid visualization spec")
}

fn open_cache(mut config: PipelineConfig, cache_dir: PathBuf) -> Result<RenderCache> {
    config.cache.persist_dir = Some(cache_dir);
    RenderCache::open(config.cache, Arc::new(SystemClock)).context("Failed to open cache")
}

async fn cmd_render(
    mut config: PipelineConfig,
    spec_path: &Path,
    backend: Backend,
    endpoint: Option<String>,
    api_token: Option<String>,
    cache_dir: Option<PathBuf>,
    out: Option<&Path>,
) -> Result<()> {
    // Parsed but not validated yet: the dispatcher reports invalid specs.
    let text = std::fs::read_to_string(spec_path)
        .with_context(|| format!("Failed to read spec file: {}", spec_path.display()))?;
    let spec: VisualizationSpec =
        serde_json::from_str(&text).context("Failed to parse spec as JSON")?;

    if cache_dir.is_some() {
        config.cache.persist_dir = cache_dir;
    }

    let sandboxes: Arc<dyn SandboxFactory> = match backend {
        Backend::Process => Arc::new(ProcessSandboxFactory::new()),
        Backend::Remote => {
            let endpoint = endpoint.context("--endpoint is required for the remote backend")?;
            Arc::new(RemoteSandboxFactory::new(endpoint, api_token)?)
        }
    };

    let cache =
        RenderCache::open(config.cache.clone(), Arc::new(SystemClock)).context("Failed to open cache")?;
    let dispatcher = Dispatcher::new(&config, sandboxes, cache.clone());

    let result = dispatcher.submit(&spec).await;
    cache.flush().await.context("Failed to flush cache")?;
    info!(status = result.status(), stats = ?cache.stats(), "render finished");

    match out {
        Some(path) => {
            if let Some(artifact) = result.artifact() {
                write_artifact(artifact, path)?;
                println!("[{}] wrote {} to {}", result.status(), artifact.type_name(), path.display());
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    if let RenderResult::Failed {
        error_kind,
        message,
        fallback_artifact,
        ..
    } = &result
    {
        if let (Some(path), Some(fallback)) = (out, fallback_artifact) {
            write_artifact(fallback, path)?;
            println!("Wrote error {} to {}", fallback.type_name(), path.display());
        }
        bail!("render failed ({error_kind}): {message}");
    }
    Ok(())
}

/// Write an artifact in its natural format: HTML, figure JSON or raw video.
fn write_artifact(artifact: &Artifact, path: &Path) -> Result<()> {
    let bytes = match artifact {
        Artifact::Script { html, .. } => html.as_bytes().to_vec(),
        Artifact::Figure { figure } => serde_json::to_vec_pretty(figure)?,
        Artifact::Video { bytes, .. } => bytes.clone(),
    };
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn cmd_fingerprint(config: &PipelineConfig, spec_path: &Path) -> Result<()> {
    let spec = read_spec(spec_path)?;
    println!("{}", fingerprint_with(&spec, &RendererTags::from_config(config)));
    Ok(())
}

fn cmd_stats(config: PipelineConfig, cache_dir: PathBuf) -> Result<()> {
    let cache = open_cache(config, cache_dir)?;
    let stats = cache.stats();
    println!("Entries:     {}", stats.entries);
    println!("Total bytes: {}", stats.total_bytes);
    Ok(())
}

async fn cmd_gc(config: PipelineConfig, cache_dir: PathBuf) -> Result<()> {
    let cache = open_cache(config, cache_dir)?;
    let report = cache.gc().await.context("Cache garbage collection failed")?;
    println!("Expired entries removed: {}", report.expired);
    println!("Blobs deleted:           {}", report.blobs_deleted);
    Ok(())
}

fn cmd_show_config(config: &PipelineConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
