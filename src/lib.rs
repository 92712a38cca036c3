// src/lib.rs

//! OPM Package Manager
//!
//! Installs, upgrades and removes applications listed in a remote catalog
//! ("manifest"), keeping a local record of what is installed.
//!
//! # Architecture
//!
//! - Manifest: cached JSON catalog, replaced wholesale on every fetch
//! - Installed registry: JSON map of package name to version, persisted after every change
//! - Archives: ZIP payloads unpacked into one directory per package
//! - Capabilities: process control and launcher entries behind traits
//! - Names are matched case-insensitively everywhere; versions are opaque strings

pub mod config;
pub mod coordinator;
mod error;
mod fsutil;
pub mod installer;
pub mod manifest;
pub mod progress;
pub mod registry;
pub mod system;
pub mod transport;

pub use error::{Error, Result};
