// src/config.rs

//! Filesystem locations and the catalog endpoint
//!
//! All state lives in a per-user data directory:
//! - `manifest.json` - cached copy of the remote catalog
//! - `opm_installed_packages.json` - installed package name to version
//!
//! Packages are unpacked under the install root, one directory per package.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote catalog endpoint
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/Odizinne/opm-manifest/refs/heads/main/manifest.json";

/// File name of the cached manifest inside the data directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// File name of the installed registry inside the data directory
pub const INSTALLED_FILE: &str = "opm_installed_packages.json";

/// Runtime configuration for a single invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the manifest cache and installed registry
    pub data_dir: PathBuf,
    /// Root under which each package gets its own directory
    pub install_root: PathBuf,
    /// Catalog endpoint
    pub manifest_url: String,
    /// Where launcher entries are written
    pub shortcut_dir: PathBuf,
}

impl Config {
    /// Resolve the per-user default locations
    pub fn from_user_dirs() -> Result<Self> {
        let data_base = dirs::data_dir()
            .ok_or_else(|| Error::InitError("Could not determine user data directory".to_string()))?;
        let local_base = dirs::data_local_dir().unwrap_or_else(|| data_base.clone());

        Ok(Self {
            data_dir: data_base.join("opm"),
            install_root: default_install_root(&local_base),
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            shortcut_dir: data_base.join("applications"),
        })
    }

    /// Configuration rooted entirely under `base` (used for portable setups and tests)
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            data_dir: base.join("data"),
            install_root: base.join("programs"),
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            shortcut_dir: base.join("shortcuts"),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_FILE)
    }

    pub fn installed_path(&self) -> PathBuf {
        self.data_dir.join(INSTALLED_FILE)
    }

    /// Create the data directory and install root if missing
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.install_root] {
            debug!("Ensuring directory exists: {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| Error::filesystem(dir, e))?;
        }
        Ok(())
    }
}

#[cfg(windows)]
fn default_install_root(local_base: &Path) -> PathBuf {
    local_base.join("Programs")
}

#[cfg(not(windows))]
fn default_install_root(local_base: &Path) -> PathBuf {
    local_base.join("opm").join("programs")
}
