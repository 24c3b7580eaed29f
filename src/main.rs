//! CLI entry point and bootstrap: parses flags with `clap`, wires up
//! structured logging through `tracing_subscriber`, builds the mount, and
//! runs `fuser::spawn_mount2` over it until interrupted.

use clap::Parser;
use dxfuse::config::{load_tuning_config, MountConfig};
use dxfuse::manifest::{self, Manifest};
use dxfuse::remote::http::HttpRemoteClient;
use fuser::MountOption;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// `dxfuse [flags] MOUNTPOINT PROJECT1 [PROJECT2 ...]`
/// `dxfuse [flags] MOUNTPOINT manifest.json`
#[derive(Parser, Debug)]
#[command(name = "dxfuse", version, about = "FUSE projection of a remote object-based data platform")]
struct Cli {
    mountpoint: PathBuf,

    /// One or more project IDs, or a single manifest.json path.
    #[arg(required = true)]
    targets: Vec<String>,

    #[arg(long = "readOnly")]
    read_only: bool,

    #[arg(long, default_value_t = 0)]
    verbose: u8,

    #[arg(long = "debugFuse")]
    debug_fuse: bool,

    #[arg(long, default_value_t = unsafe { libc::getuid() })]
    uid: u32,

    #[arg(long, default_value_t = unsafe { libc::getgid() })]
    gid: u32,

    /// Base URL of the remote platform's API, overriding the compiled default.
    #[arg(long, env = "DXFUSE_REMOTE_URL", default_value = "https://api.example-platform.internal")]
    remote_url: String,

    /// Root directory for on-disk state (metadata store, staging files, tuning config).
    #[arg(long, default_value = "/var/dxfuse")]
    state_dir: PathBuf,

    /// Run in the foreground instead of daemonizing.
    #[arg(long)]
    foreground: bool,
}

fn init_logging(verbose: u8, log_path: &Option<PathBuf>) {
    let filter = match verbose {
        0 => "dxfuse=info",
        1 => "dxfuse=debug",
        _ => "dxfuse=trace",
    };
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
    );

    match log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    registry.with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false)).init();
                }
                Err(e) => {
                    registry.with(tracing_subscriber::fmt::layer()).init();
                    tracing::warn!(?path, error = %e, "could not open log file, logging to stderr");
                }
            }
        }
        None => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}

fn load_manifest(targets: &[String]) -> dxfuse::error::Result<Manifest> {
    if targets.len() == 1 && targets[0].ends_with(".json") && std::path::Path::new(&targets[0]).exists() {
        manifest::parse_manifest(std::path::Path::new(&targets[0]))
    } else {
        Ok(manifest::manifest_for_bare_projects(targets))
    }
}

fn run() -> dxfuse::error::Result<()> {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.state_dir)?;
    let log_path = Some(cli.state_dir.join("dxfuse.log"));
    init_logging(cli.verbose, &log_path);

    if !cli.foreground {
        let daemonize = daemonize::Daemonize::new()
            .pid_file(cli.state_dir.join("dxfuse.pid"))
            .working_directory(&cli.state_dir);
        if let Err(e) = daemonize.start() {
            tracing::warn!(error = %e, "daemonize failed, continuing in foreground");
        }
    }

    let manifest = load_manifest(&cli.targets)?;

    let tuning = load_tuning_config(&cli.state_dir.join("config.toml"));
    let config = MountConfig {
        read_only: cli.read_only,
        uid: cli.uid,
        gid: cli.gid,
        verbose: cli.verbose,
        debug_fuse: cli.debug_fuse,
        metadata_db_path: cli.state_dir.join("metadata.db"),
        staging_dir: cli.state_dir.join("created_files"),
        log_path,
        tuning,
    };

    let runtime = Arc::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| dxfuse::error::Error::io(format!("building tokio runtime: {e}")))?,
    );

    let remote: Arc<dyn dxfuse::remote::RemoteClient> =
        Arc::new(HttpRemoteClient::new(cli.remote_url.clone(), &config.tuning));

    let drain_timeout = config.tuning.upload_drain_timeout_seconds;
    let mount = dxfuse::build_mount(&manifest, remote, config, runtime.clone())?;

    let mut options = vec![
        MountOption::FSName("dxfuse".to_string()),
        MountOption::AutoUnmount,
    ];
    if cli.read_only {
        options.push(MountOption::RO);
    } else {
        options.push(MountOption::RW);
    }

    tracing::info!(mountpoint = ?cli.mountpoint, "mounting");
    let session = fuser::spawn_mount2(mount.fs.clone(), &cli.mountpoint, &options)
        .map_err(|e| dxfuse::error::Error::io(format!("mount failed: {e}")))?;

    runtime.block_on(async {
        let _ = tokio::signal::ctrl_c().await;
    });

    tracing::info!("unmount requested, draining outstanding uploads");
    runtime.block_on(async {
        tokio::time::timeout(std::time::Duration::from_secs(drain_timeout), mount.upload.drain())
            .await
            .ok();
    });

    drop(session);
    tracing::info!("unmounted");
    Ok(())
}

fn main() {
    // `Cli::parse()` inside `run()` already exits with code 2 on a usage
    // error (clap's default); everything reaching here is a runtime error.
    match run() {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("dxfuse: {e}");
            std::process::exit(1);
        }
    }
}
