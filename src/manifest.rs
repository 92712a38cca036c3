// src/manifest.rs

//! Remote package catalog and its local cache
//!
//! The catalog is a JSON array of package descriptors. A successful fetch
//! replaces the cached copy wholesale; a failed fetch leaves it untouched.
//! Change detection compares SHA-256 digests of the raw bytes rather than
//! diffing entries.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsutil::{to_pretty_json, write_atomic};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One installable package in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(rename = "project_name")]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "url")]
    pub archive_url: String,
    /// Whether a launcher entry should be created after install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_shortcut: Option<bool>,
}

impl PackageDescriptor {
    pub fn new(name: &str, version: &str, archive_url: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            archive_url: archive_url.to_string(),
            create_shortcut: None,
        }
    }

    /// Absent flag means a shortcut is wanted
    pub fn wants_shortcut(&self) -> bool {
        self.create_shortcut.unwrap_or(true)
    }
}

/// Ordered catalog plus the serialized form it was read from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    packages: Vec<PackageDescriptor>,
    bytes: Vec<u8>,
}

impl Manifest {
    /// Parse a manifest from its serialized form
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let packages: Vec<PackageDescriptor> = serde_json::from_slice(&bytes)?;
        Ok(Self { packages, bytes })
    }

    pub fn packages(&self) -> &[PackageDescriptor] {
        &self.packages
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Case-insensitive lookup; the first match wins on duplicate names
    pub fn find(&self, name: &str) -> Option<&PackageDescriptor> {
        let wanted = name.to_lowercase();
        self.packages
            .iter()
            .find(|pkg| pkg.name.to_lowercase() == wanted)
    }

    /// Like [`find`](Self::find), failing with `NotFoundError`
    pub fn resolve(&self, name: &str) -> Result<&PackageDescriptor> {
        self.find(name)
            .ok_or_else(|| Error::NotFoundError(name.to_string()))
    }
}

/// Owner of the manifest cache file
#[derive(Debug, Clone)]
pub struct ManifestStore {
    cache_path: PathBuf,
    url: String,
}

impl ManifestStore {
    pub fn new(cache_path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            cache_path: cache_path.into(),
            url: url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.manifest_path(), config.manifest_url.clone())
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Raw bytes of the cache file, empty if it does not exist
    pub fn cached_bytes(&self) -> Vec<u8> {
        fs::read(&self.cache_path).unwrap_or_default()
    }

    /// Load the last persisted manifest, or an empty one if absent or unparsable
    pub fn load_cached(&self) -> Manifest {
        let bytes = match fs::read(&self.cache_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("No cached manifest at {}: {}", self.cache_path.display(), e);
                return Manifest::default();
            }
        };

        match Manifest::from_bytes(bytes) {
            Ok(manifest) => {
                debug!("Loaded {} cached packages", manifest.len());
                manifest
            }
            Err(e) => {
                warn!(
                    "Ignoring unparsable manifest cache {}: {}",
                    self.cache_path.display(),
                    e
                );
                Manifest::default()
            }
        }
    }

    /// Fetch the catalog and, on success, overwrite the cache with it
    ///
    /// The cache is rewritten pretty-printed with sorted keys; fields the
    /// descriptor does not model are kept.
    pub fn fetch_remote(&self, transport: &dyn Transport) -> Result<Manifest> {
        info!("Fetching manifest from {}", self.url);
        let body = transport.fetch_bytes(&self.url)?;

        let document: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| Error::fetch(&self.url, format!("invalid manifest JSON: {}", e)))?;
        let packages: Vec<PackageDescriptor> = serde_json::from_value(document.clone())
            .map_err(|e| Error::fetch(&self.url, format!("invalid manifest entries: {}", e)))?;

        let bytes = to_pretty_json(&document)?;
        write_atomic(&self.cache_path, &bytes)?;

        info!("Fetched manifest with {} packages", packages.len());
        Ok(Manifest { packages, bytes })
    }
}

/// Hex SHA-256 of a byte buffer
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// True if the two buffers have different digests
pub fn content_changed(before: &[u8], after: &[u8]) -> bool {
    content_hash(before) != content_hash(after)
}
