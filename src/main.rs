//! Regulatory news pipeline: binary entrypoint.
//!
//! `regintel run` executes one fetch → dedup → annotate → persist pass.
//! `regintel serve` exposes the latest dataset to the dashboard over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use regulatory_intel::api::{self, AppState};
use regulatory_intel::metrics::Metrics;
use regulatory_intel::notify::{NotifierMux, RunNotice};
use regulatory_intel::pipeline::{Pipeline, RunState};
use regulatory_intel::store::JsonFileStore;
use regulatory_intel::PipelineConfig;

#[derive(Parser)]
#[command(name = "regintel", version, about = "Regulatory news intelligence pipeline")]
struct Cli {
    /// Pipeline config (TOML). Defaults to $PIPELINE_CONFIG_PATH, then config/pipeline.toml.
    #[arg(long, global = true, env = "PIPELINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once and write a dataset.
    Run,
    /// Serve the dashboard feed over the latest dataset.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
        addr: SocketAddr,
    },
}

/// Compact logs by default, JSON when LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("regulatory_intel=info,regintel=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load_from(p),
        None => PipelineConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = Arc::new(load_config(cli.config.as_ref()).context("loading pipeline config")?);

    match cli.command {
        Command::Run => run_once(cfg).await,
        Command::Serve { addr } => serve(cfg, addr).await,
    }
}

async fn run_once(cfg: Arc<PipelineConfig>) -> Result<()> {
    let pipeline = Pipeline::from_config(cfg).context("building pipeline")?;

    let handle = pipeline.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; aborting run");
            handle.abort();
        }
    });

    let report = pipeline.run().await;

    let mux = NotifierMux::from_env();
    if !mux.is_empty() {
        mux.send_all(&RunNotice::from(&report)).await;
    }

    if let Some(p) = &report.dataset_path {
        println!("{}", p.display());
    }
    match report.state {
        RunState::Failed | RunState::Aborted => {
            let reason = report
                .failure
                .map(|e| e.to_string())
                .unwrap_or_else(|| report.state.to_string());
            anyhow::bail!("run ended {}: {reason}", report.state)
        }
        _ => Ok(()),
    }
}

async fn serve(cfg: Arc<PipelineConfig>, addr: SocketAddr) -> Result<()> {
    let store = Arc::new(JsonFileStore::new(&cfg.store.dir));
    let state = AppState::load(store, cfg.relevance_threshold);

    let mut app = api::router(state);
    match Metrics::init() {
        Ok(m) => app = app.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics disabled"),
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "serving dashboard feed");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")
}
