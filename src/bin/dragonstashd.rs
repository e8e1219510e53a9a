//! `dragonstashd`: the FUSE daemon entrypoint (spec §2 ambient stack).
//! Not itself part of the specified cache/blocklist/adapter subject
//! matter, but the external glue needed for the crate to be a real,
//! runnable mount command — parses flags, loads [`Config`], opens the
//! [`Engine`], selects a [`Backend`], and hands everything to
//! `fuser::mount2`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dragonstash::adapter::Adapter;
use dragonstash::backend::in_memory::InMemoryBackend;
use dragonstash::backend::local::LocalBackend;
use dragonstash::backend::Backend;
use dragonstash::config::{BackendKind, Config};
use dragonstash::engine::Engine;
use dragonstash::fuse_glue::DragonStashFs;

/// A user-space caching filesystem with a transactional metadata cache.
#[derive(Parser, Debug)]
#[command(name = "dragonstashd", about)]
struct Args {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the metadata KV store and blocklist files.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Mountpoint to attach the filesystem at.
    #[arg(long)]
    mountpoint: Option<PathBuf>,

    /// Root of the local directory to mirror, when `--backend local`.
    #[arg(long)]
    backend_root: Option<PathBuf>,

    /// Backend to mirror: "in-memory" (smoke test) or "local".
    #[arg(long)]
    backend: Option<String>,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn build_backend(config: &Config) -> Result<Arc<dyn Backend>, Box<dyn std::error::Error>> {
    match config.backend {
        BackendKind::InMemory => Ok(Arc::new(InMemoryBackend::new())),
        BackendKind::Local => {
            let root = config
                .backend_root
                .clone()
                .ok_or("backend = \"local\" requires backend_root")?;
            Ok(Arc::new(LocalBackend::new(root)))
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(mountpoint) = args.mountpoint {
        config.mountpoint = mountpoint;
    }
    if let Some(backend_root) = args.backend_root {
        config.backend_root = Some(backend_root);
    }
    if let Some(backend) = args.backend {
        config.backend = match backend.as_str() {
            "in-memory" | "in_memory" => BackendKind::InMemory,
            "local" => BackendKind::Local,
            other => return Err(format!("unknown backend {other:?}").into()),
        };
    }

    let filter = if args.verbose > 0 {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    std::fs::create_dir_all(&config.cache_dir)?;
    let engine = Engine::open(&config.cache_dir.join("meta.redb"))?;
    let backend = build_backend(&config)?;
    let adapter = Adapter::new(engine, backend);
    let fs = DragonStashFs::new(adapter);

    tracing::info!(mountpoint = %config.mountpoint.display(), "mounting");
    fuser::mount2(fs, &config.mountpoint, &[])?;
    Ok(())
}
