#![forbid(unsafe_code)]
//! SuccinctFS hosting binary.
//!
//! Opens (or initializes) a FLOUDS image and serves it through FUSE until
//! the mount is released.

use anyhow::{Context, Result, bail};
use clap::Parser;
use sfs_core::FilesystemManager;
use sfs_fuse::MountOptions;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sfsfs",
    about = "SuccinctFS — a FLOUDS-encoded succinct filesystem"
)]
struct Cli {
    /// Path to the filesystem image (created if absent).
    image: PathBuf,

    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,

    /// Mount read-only.
    #[arg(long)]
    read_only: bool,

    /// Unmount automatically when the process exits.
    #[arg(long)]
    auto_unmount: bool,

    /// Block size for the image in bytes (power of two).
    #[arg(long, default_value_t = 4096)]
    block_size: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if !cli.block_size.is_power_of_two() || cli.block_size < 512 {
        bail!("block size {} is not a power of two >= 512", cli.block_size);
    }
    if !cli.mountpoint.is_dir() {
        bail!("mountpoint {} is not a directory", cli.mountpoint.display());
    }

    let fs = FilesystemManager::mount_with_block_size(&cli.image, cli.block_size)
        .with_context(|| format!("opening image {}", cli.image.display()))?;
    info!(
        image = %cli.image.display(),
        mountpoint = %cli.mountpoint.display(),
        "serving filesystem"
    );

    let options = MountOptions {
        read_only: cli.read_only,
        allow_other: cli.allow_other,
        auto_unmount: cli.auto_unmount,
    };
    sfs_fuse::mount(fs, &cli.mountpoint, &options)
        .with_context(|| format!("mounting at {}", cli.mountpoint.display()))?;
    Ok(())
}
