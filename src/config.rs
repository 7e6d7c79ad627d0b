//! Host configuration: where the take store lives.
//!
//! Resolution order: environment, then config file, then default. Hosts
//! that manage their own sled handle can skip this entirely and use
//! `TakesStore::from_db`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

const DATA_DIR_ENV: &str = "TAKES_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "takes-data";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TakesConfig {
    pub data_dir: Option<PathBuf>,
}

impl TakesConfig {
    /// Load from a TOML file; a missing file yields defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            let s = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.as_ref().display()))?;
            let cfg: TakesConfig =
                toml::from_str(&s).with_context(|| format!("parsing {}", path.as_ref().display()))?;
            Ok(cfg)
        } else {
            Ok(Default::default())
        }
    }

    /// Effective data directory, env override winning.
    pub fn data_dir(&self) -> PathBuf {
        std::env::var(DATA_DIR_ENV)
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                self.data_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
            })
    }
}
