// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use csvfs::backend::Backend;
use csvfs::fs::{CsvFilesystem, DEFAULT_PAGE_SIZE};
use csvfs::mount;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "csvfs")]
#[command(author, version, about = "Mount a directory of CSV files as a queryable virtual filesystem", long_about = None)]
struct Cli {
    /// Directory containing CSV files
    source_dir: PathBuf,

    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Run in foreground
    #[arg(short, long)]
    foreground: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Set number of rows per page for paginated CSVs
    #[arg(short = 'n', long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    if !cli.source_dir.exists() {
        bail!(
            "Source directory {} does not exist",
            cli.source_dir.display()
        );
    }

    if !cli.mount_point.exists() {
        info!("Creating mount point: {}", cli.mount_point.display());
        std::fs::create_dir_all(&cli.mount_point).with_context(|| {
            format!("Failed to create mount point {}", cli.mount_point.display())
        })?;
    }

    if !cli.foreground {
        warn!("Background mode is not supported; staying in the foreground");
    }

    info!(
        "Mounting {} -> {}",
        cli.source_dir.display(),
        cli.mount_point.display()
    );

    let backend = Backend::open(&cli.source_dir)
        .with_context(|| format!("Failed to open backend over {}", cli.source_dir.display()))?;
    let filesystem = CsvFilesystem::new(backend, cli.page_size);

    mount::mount(filesystem, &cli.mount_point)
        .with_context(|| format!("FUSE mount failed at {}", cli.mount_point.display()))?;

    Ok(())
}
