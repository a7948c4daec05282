mod app;
mod batcher;
mod control;
mod fanout;
mod logging;
mod mux;
mod receiver;
mod scanner;
mod shutdown;
mod spectrum;
mod state;
mod store;
mod transport;
mod ws;

use anyhow::Context;
use clap::Parser;
use skywave_core::config::{load_from_file, Config};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "skywave-server",
    version,
    about = "Multi-user SDR server: rtl_tcp multiplexer, spectrum fan-out and UHF scanner."
)]
struct Args {
    /// Configuration file; missing file falls back to built-in defaults.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Raise skywave crates to debug level (RUST_LOG overrides).
    #[arg(long)]
    debug: bool,

    /// Also write daily-rolling log files into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guards = logging::init(&logging::LoggingConfig {
        debug: args.debug,
        log_dir: args.log_dir.clone(),
    })?;

    let cfg = if args.config.exists() {
        load_from_file(&args.config)?
    } else {
        tracing::info!(path = %args.config.display(), "config file not found; using defaults");
        Config::default()
    };

    let store = Arc::new(
        store::ScannerStore::open(std::path::Path::new(&cfg.storage.db_path))
            .with_context(|| format!("open scanner store {}", cfg.storage.db_path))?,
    );
    let state = state::AppState::new(cfg, store);

    if state.cfg.sdr.autostart {
        let mut owner = state.owner.lock().unwrap_or_else(|p| p.into_inner());
        state.mux.start();
        *owner = control::DeviceOwner::Mux;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let result = runtime.block_on(app::serve(state.clone()));

    tracing::info!("stopping workers");
    state.scanner.stop();
    state.mux.stop();
    result
}
