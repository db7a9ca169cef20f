//! facetfs binary: serve a metadata database as a FUSE mount.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use facetfs_core::AppConfig;
use facetfs_fuse::changewatch::{self, ChangeWatch};
use facetfs_fuse::{Facetfs, FuseAdapter, Params, ServiceData};
use facetfs_metadata::{SqliteStore, StoreOptions};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// facetfs - a queryable metadata filesystem
#[derive(Parser, Debug)]
#[command(name = "facetfs")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount the filesystem and serve until interrupted.
    Serve(ServeArgs),
    /// Print build metadata.
    Version,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Path at which to mount the filesystem.
    #[arg(long)]
    mountpoint: PathBuf,

    /// Filename of the local database.
    #[arg(long)]
    localdb: PathBuf,

    /// Attempt to unmount an existing stale mount first.
    #[arg(long)]
    unmount: bool,

    /// Filename of a file to touch whenever the database changes.
    #[arg(long = "touch_on_change")]
    touch_on_change: Option<PathBuf>,

    /// Path to an optional TOML configuration file.
    #[arg(long, env = "FACETFS_CONFIG")]
    config: Option<PathBuf>,
}

fn version_info() -> serde_json::Value {
    serde_json::json!({
        "package": "facetfs",
        "version": env!("CARGO_PKG_VERSION"),
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Version => {
            println!("facetfs {}", env!("CARGO_PKG_VERSION"));
            println!("rust {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
        Command::Serve(args) => serve(args).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("FACETFS_").split("__"))
        .extract()
        .context("failed to load configuration")
}

/// The mountpoint must be an empty directory. A read error usually means a
/// stale mount from a dead process; with `unmount` set we try to clear it.
fn check_mountpoint(mountpoint: &Path, try_unmount: bool) -> Result<()> {
    match std::fs::read_dir(mountpoint) {
        Ok(entries) => {
            let names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            if !names.is_empty() {
                bail!(
                    "mountpoint {} not empty; contains files ({names:?}) -- mount cannot succeed",
                    mountpoint.display()
                );
            }
            tracing::info!(mountpoint = %mountpoint.display(), "mountpoint is empty and valid");
            Ok(())
        }
        Err(err) => {
            tracing::info!(
                mountpoint = %mountpoint.display(),
                error = %err,
                "error accessing mountpoint; may still be mounted"
            );
            if !try_unmount {
                return Err(err).context("mountpoint not accessible");
            }

            let status = std::process::Command::new("fusermount")
                .arg("-u")
                .arg(mountpoint)
                .status()
                .context("running fusermount")?;
            if !status.success() {
                bail!("failed to unmount existing mount on {}", mountpoint.display());
            }
            tracing::info!(mountpoint = %mountpoint.display(), "unmounted existing filesystem");
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    let localdb = std::path::absolute(&args.localdb).context("resolving database path")?;

    let watcher = match &args.touch_on_change {
        Some(marker) => {
            tracing::info!(marker = %marker.display(), "touching file on database changes");
            let marker = marker.clone();
            Some(ChangeWatch::spawn(changewatch::Options {
                delay: Duration::from_millis(config.fs.change_watch_delay_ms),
                action: Arc::new(move || {
                    let marker = marker.clone();
                    Box::pin(async move {
                        tracing::info!(marker = %marker.display(), "database changed; touching marker");
                        changewatch::touch_file(marker).await
                    })
                }),
            }))
        }
        None => None,
    };

    let hook_watcher = watcher.clone();
    let store = SqliteStore::open(
        &localdb,
        StoreOptions {
            change_hook: Some(Arc::new(move || {
                if let Some(watcher) = &hook_watcher {
                    watcher.on_change();
                }
            })),
        },
    )
    .await
    .context("failed to open database")?;
    let store = Arc::new(store);
    tracing::info!(localdb = %localdb.display(), "successfully opened database");

    let fs = Facetfs::new(
        store.clone(),
        Params {
            service_data: ServiceData {
                hostname: "localhost".to_string(),
                database_path: localdb.display().to_string(),
                http_address: None,
                grpc_address: None,
                server_cert_pem: None,
                version_info: version_info(),
            },
            mountpoint: std::path::absolute(&args.mountpoint).context("resolving mountpoint")?,
            config: config.fs,
        },
    )
    .await
    .context("failed to create filesystem")?;

    check_mountpoint(&args.mountpoint, args.unmount)?;

    let adapter = FuseAdapter::new(fs.root(), tokio::runtime::Handle::current());
    let options = FuseAdapter::mount_options(&localdb.display().to_string());
    let session = fuser::spawn_mount2(adapter, &args.mountpoint, &options)
        .context("failed to set up fuse mount")?;

    if let Some(watcher) = &watcher {
        watcher.on_change();
    }

    tracing::info!(mountpoint = %args.mountpoint.display(), "ready to serve");

    wait_for_shutdown().await?;
    tracing::info!("shutting down");

    drop(session);
    store.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("waiting for ctrl-c")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
