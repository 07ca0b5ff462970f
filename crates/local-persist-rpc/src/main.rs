//! local-persist plugin server - Docker volume plugin over HTTP.
//!
//! Starts the driver (state dir, lock, reconciliation) and serves the
//! volume plugin protocol until Ctrl-C.

mod handler;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use local_persist::{
    ConflictPolicy, DisabledSource, DockerCliSource, DriverBuilder, DriverConfig, DriverDefaults,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "local-persist-rpc")]
#[command(about = "Docker volume plugin that keeps named volumes at chosen host paths")]
struct Args {
    /// Driver name; also names the snapshot file
    #[arg(long, default_value = DriverDefaults::DRIVER_NAME)]
    name: String,

    /// Directory every mountpoint is resolved against
    #[arg(long, default_value = DriverDefaults::BASE_DIR)]
    base_dir: PathBuf,

    /// Directory holding the state snapshot
    #[arg(long, default_value = DriverDefaults::STATE_DIR)]
    state_dir: PathBuf,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// How conflicting live observations are resolved: first-wins, last-wins or reject
    #[arg(long, default_value = "first-wins")]
    conflict_policy: ConflictPolicy,

    /// Accept an empty live query result instead of loading the snapshot
    #[arg(long)]
    accept_empty_live: bool,

    /// Skip the container runtime query and start from the snapshot
    #[arg(long)]
    no_live_query: bool,

    /// Seconds to wait for the container runtime query
    #[arg(long, default_value = "10")]
    live_timeout_secs: u64,

    /// Write `<name>.spec` pointing Docker at this server into this directory
    #[arg(long)]
    spec_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting local-persist plugin server");

    let mut config = DriverConfig::new(&args.name, &args.base_dir, &args.state_dir);
    config.live_query_timeout = Duration::from_secs(args.live_timeout_secs);

    let mut builder = DriverBuilder::new(config)
        .conflict_policy(args.conflict_policy)
        .accept_empty_live(args.accept_empty_live);
    builder = if args.no_live_query {
        builder.live_source(Arc::new(DisabledSource))
    } else {
        builder.live_source(Arc::new(
            DockerCliSource::default().with_timeout(Duration::from_secs(args.live_timeout_secs)),
        ))
    };

    let driver = builder.build().await.context("driver startup failed")?;
    let config = driver.config();
    info!(
        "Driver {} serving base dir {} (state in {}, seeded from {:?}, policy {})",
        driver.name(),
        config.base_dir.display(),
        config.state_dir.display(),
        driver.origin(),
        config.conflict_policy
    );

    let addr = server::start_server(driver, &args.host, args.port).await?;

    if let Some(spec_dir) = &args.spec_dir {
        let spec_path = write_spec_file(spec_dir, &args.name, addr).await?;
        info!("Wrote plugin spec {}", spec_path.display());
    }

    // Intentional stdout line so supervisors and tests can find the port.
    println!("PLUGIN_ADDR={}", addr);

    info!("Plugin server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}

/// Write the Docker plugin discovery file `<spec_dir>/<name>.spec`.
async fn write_spec_file(spec_dir: &Path, name: &str, addr: SocketAddr) -> Result<PathBuf> {
    tokio::fs::create_dir_all(spec_dir)
        .await
        .with_context(|| format!("create spec dir {}", spec_dir.display()))?;

    let spec_path = spec_dir.join(format!("{}.spec", name));
    tokio::fs::write(&spec_path, format!("tcp://{}\n", addr))
        .await
        .with_context(|| format!("write spec file {}", spec_path.display()))?;
    Ok(spec_path)
}
