//! Runtime configuration (spec §2, ambient stack): an optional TOML
//! file overlaid by CLI flags, "defaults < file < flags" the way most
//! FUSE daemons layer their configuration.
//!
//! Grounded in `llenotre-maestro`'s use of `serde` + `toml` for its own
//! (build-time) configuration, generalized here to a run-time config
//! loaded once at startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::DsError;

/// Which [`crate::backend::Backend`] implementation to mount against.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// An in-memory tree; only useful for smoke-testing a mount.
    InMemory,
    /// Mirrors a real local directory.
    Local,
}

/// On-disk config file shape; every field optional so a partial file
/// only overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    cache_dir: Option<PathBuf>,
    backend: Option<BackendKind>,
    backend_root: Option<PathBuf>,
    mountpoint: Option<PathBuf>,
    log_level: Option<String>,
}

/// Fully resolved configuration (spec §2).
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub backend: BackendKind,
    pub backend_root: Option<PathBuf>,
    pub mountpoint: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load an optional TOML file, if `path` is `Some` and exists, as
    /// the base layer; callers then apply CLI overrides via the
    /// `with_*` methods.
    pub fn load(path: Option<&Path>) -> Result<Config, DsError> {
        let file = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text).map_err(|_| DsError::Corrupt("invalid config file"))?
            }
            None => ConfigFile::default(),
        };
        Ok(Config {
            cache_dir: file.cache_dir.unwrap_or_else(|| PathBuf::from("/var/cache/dragonstash")),
            backend: file.backend.unwrap_or(BackendKind::InMemory),
            backend_root: file.backend_root,
            mountpoint: file.mountpoint.unwrap_or_else(|| PathBuf::from("/mnt/dragonstash")),
            log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_file_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.backend, BackendKind::InMemory);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dragonstash.toml");
        std::fs::write(&path, "backend = \"local\"\nbackend_root = \"/srv/data\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.backend_root, Some(PathBuf::from("/srv/data")));
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/dragonstash"));
    }
}
