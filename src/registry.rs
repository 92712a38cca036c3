// src/registry.rs

//! Local record of installed packages
//!
//! A JSON object mapping package name to installed version. An entry exists
//! exactly when the package's files are believed to be on disk, so entries
//! are only written after a complete extraction and only dropped after the
//! package directory is gone.
//!
//! Names are matched case-insensitively. The stored key keeps the casing the
//! package was first installed under.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsutil::{to_pretty_json, write_atomic};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Installed package name to version, backed by a JSON file
#[derive(Debug, Clone)]
pub struct InstalledRegistry {
    path: PathBuf,
    versions: BTreeMap<String, String>,
    /// Lowercased name to stored key
    canonical: HashMap<String, String>,
}

impl InstalledRegistry {
    /// Empty registry that will persist to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            versions: BTreeMap::new(),
            canonical: HashMap::new(),
        }
    }

    /// Load the registry at `path`; a missing file is an empty registry
    ///
    /// A file that exists but cannot be parsed is an error, so that a later
    /// persist never overwrites install records with an empty mapping.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let mut registry = Self::empty(path);

        let contents = match fs::read(&registry.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No installed registry at {}", registry.path.display());
                return Ok(registry);
            }
            Err(e) => return Err(Error::filesystem(&registry.path, e)),
        };

        let versions: BTreeMap<String, String> = serde_json::from_slice(&contents)?;
        for (name, version) in versions {
            registry.insert(name, version);
        }

        debug!("Loaded {} installed packages", registry.len());
        Ok(registry)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::load(config.installed_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn insert(&mut self, name: String, version: String) {
        self.canonical
            .entry(name.to_lowercase())
            .or_insert_with(|| name.clone());
        self.versions.insert(name, version);
    }

    /// Record `version` for `name`, returning the stored key
    ///
    /// If the package is already recorded under a different casing, that
    /// key is kept and only the version changes.
    pub fn set(&mut self, name: &str, version: &str) -> String {
        let key = self
            .canonical
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| name.to_string());

        self.insert(key.clone(), version.to_string());
        key
    }

    /// Drop the entry matching `name`, returning its key and version
    pub fn remove(&mut self, name: &str) -> Option<(String, String)> {
        let key = self.canonical.remove(&name.to_lowercase())?;
        let version = self.versions.remove(&key)?;
        Some((key, version))
    }

    /// Case-insensitive lookup returning the stored key and version
    pub fn find_case_insensitive(&self, name: &str) -> Option<(&str, &str)> {
        let key = self.canonical.get(&name.to_lowercase())?;
        self.versions
            .get_key_value(key)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Installed version for `name`, matched case-insensitively
    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.find_case_insensitive(name).map(|(_, version)| version)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Write the full mapping to the backing file, replacing it
    pub fn persist(&self) -> Result<()> {
        let bytes = to_pretty_json(&self.versions)?;
        write_atomic(&self.path, &bytes)?;
        info!(
            "Saved {} installed packages to {}",
            self.versions.len(),
            self.path.display()
        );
        Ok(())
    }
}
