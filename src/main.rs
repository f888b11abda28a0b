use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use clap::Parser;
use fuser::MountOption;
use tracing_subscriber::EnvFilter;

use tagfs::state::MountState;
use tagfs::TagDrive;

/// Mount a tag-projection filesystem.
#[derive(Parser, Debug)]
#[command(name = "tagfs", version, about)]
struct Cli {
    /// Mountpoint of the tag filesystem (must be an empty directory)
    #[arg(short = 'm', long)]
    mountpoint: PathBuf,

    /// Data store directory for the tag filesystem
    #[arg(short = 'd', long)]
    datastore: PathBuf,

    /// Comma-separated FUSE options (e.g. allow_other,ro)
    #[arg(short = 'o', long)]
    options: Option<String>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = check_layout(&cli) {
        tracing::error!("Configuration error: {e:#}");
        return ExitCode::from(1);
    }

    let state = match MountState::open(&cli.datastore) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to open datastore: {e}");
            return ExitCode::from(1);
        }
    };
    let identity = state.identity;
    let shared = Arc::new(RwLock::new(state));

    let mut mount_options = identity.mount_options();
    mount_options.push(MountOption::FSName("tagfs".to_string()));
    if let Some(opts) = &cli.options {
        for opt in opts.split(',').filter(|o| !o.is_empty()) {
            mount_options.push(parse_option(opt));
        }
    }

    tracing::info!(
        "Mounting tagfs at {} (datastore {})",
        cli.mountpoint.display(),
        cli.datastore.display()
    );
    match fuser::mount2(TagDrive::new(shared), &cli.mountpoint, &mount_options) {
        Ok(()) => {
            tracing::info!("Unmounted cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("FUSE mount failed: {e}");
            ExitCode::from(2)
        }
    }
}

/// Mount-time requirements: the mountpoint is an existing empty directory
/// and the datastore is an existing directory outside of it.
fn check_layout(cli: &Cli) -> Result<()> {
    // Resolve absolute paths so relative-path trickery cannot fool the
    // containment check below.
    let mount = std::fs::canonicalize(&cli.mountpoint)
        .map_err(|e| anyhow::anyhow!("mountpoint {}: {e}", cli.mountpoint.display()))?;
    if !mount.is_dir() {
        anyhow::bail!("mountpoint {} is not a directory", mount.display());
    }
    if std::fs::read_dir(&mount)?.next().is_some() {
        anyhow::bail!("mountpoint {} is not empty", mount.display());
    }

    let store = std::fs::canonicalize(&cli.datastore)
        .map_err(|e| anyhow::anyhow!("datastore {}: {e}", cli.datastore.display()))?;
    if !store.is_dir() {
        anyhow::bail!("datastore {} is not a directory", store.display());
    }
    if store.starts_with(&mount) {
        anyhow::bail!(
            "datastore {} is inside the mountpoint; it would be shadowed once mounted",
            store.display()
        );
    }
    Ok(())
}

fn parse_option(opt: &str) -> MountOption {
    match opt {
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "auto_unmount" => MountOption::AutoUnmount,
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        other => MountOption::CUSTOM(other.to_string()),
    }
}
