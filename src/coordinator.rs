// src/coordinator.rs

//! Install, upgrade and remove workflows
//!
//! The coordinator owns the in-memory manifest and installed registry for
//! one invocation. Batches are processed strictly in order and a failure on
//! one package never stops the rest; each package gets its own report.
//!
//! The registry is persisted right after every successful install or
//! removal. A persist failure is returned as an error and should end the
//! invocation, since the files on disk no longer match the record.
//!
//! Versions are opaque strings. A package is upgradeable whenever its
//! installed version differs from the manifest's, in either direction.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::installer::ArchiveInstaller;
use crate::manifest::{Manifest, ManifestStore, PackageDescriptor, content_changed};
use crate::progress::ProgressSink;
use crate::registry::InstalledRegistry;
use crate::system::{ProcessGuard, ShortcutManager, find_executable};
use crate::transport::Transport;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// External collaborators the coordinator drives
pub struct Capabilities {
    pub transport: Box<dyn Transport>,
    pub processes: Box<dyn ProcessGuard>,
    pub shortcuts: Box<dyn ShortcutManager>,
}

/// A manifest entry together with its installed version, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedPackage {
    pub descriptor: PackageDescriptor,
    pub installed_version: Option<String>,
}

/// An installed package whose version differs from the manifest's
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgradeable {
    pub name: String,
    pub installed_version: String,
    pub latest_version: String,
}

/// Result of refreshing the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// The cached manifest bytes changed
    pub manifest_changed: bool,
    pub upgradeable: Vec<Upgradeable>,
}

/// What happened to one requested package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed {
        version: String,
        previous: Option<String>,
    },
    AlreadyUpToDate {
        version: String,
    },
    NotFound,
    Removed {
        version: String,
    },
    NotInstalled,
    Failed {
        reason: String,
    },
}

/// Per-package status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReport {
    pub name: String,
    pub outcome: Outcome,
    /// Non-fatal remarks, such as a skipped shortcut
    pub notes: Vec<String>,
}

impl PackageReport {
    fn new(name: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            notes: Vec::new(),
        }
    }

    /// True unless the action succeeded or was a legitimate no-op
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::NotFound | Outcome::NotInstalled | Outcome::Failed { .. }
        )
    }
}

impl fmt::Display for PackageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Installed {
                version,
                previous: Some(previous),
            } => write!(f, "Upgraded {} from {} to {}", self.name, previous, version),
            Outcome::Installed {
                version,
                previous: None,
            } => write!(f, "Installed {} {}", self.name, version),
            Outcome::AlreadyUpToDate { .. } => {
                write!(f, "{} is already installed and up to date.", self.name)
            }
            Outcome::NotFound => write!(f, "Package {} not found.", self.name),
            Outcome::Removed { .. } => write!(f, "Removed {}", self.name),
            Outcome::NotInstalled => write!(f, "Package {} is not installed.", self.name),
            Outcome::Failed { reason } => write!(f, "Failed: {}: {}", self.name, reason),
        }
    }
}

/// Top-level orchestrator over the manifest and installed registry
pub struct PackageCoordinator {
    store: ManifestStore,
    manifest: Manifest,
    registry: InstalledRegistry,
    installer: ArchiveInstaller,
    transport: Box<dyn Transport>,
    processes: Box<dyn ProcessGuard>,
    shortcuts: Box<dyn ShortcutManager>,
}

impl PackageCoordinator {
    pub fn new(
        store: ManifestStore,
        registry: InstalledRegistry,
        installer: ArchiveInstaller,
        capabilities: Capabilities,
    ) -> Self {
        let manifest = store.load_cached();
        Self {
            store,
            manifest,
            registry,
            installer,
            transport: capabilities.transport,
            processes: capabilities.processes,
            shortcuts: capabilities.shortcuts,
        }
    }

    /// Load cached state for the locations in `config`
    pub fn open(config: &Config, capabilities: Capabilities) -> Result<Self> {
        config.ensure_dirs()?;

        let store = ManifestStore::from_config(config);
        let registry = InstalledRegistry::from_config(config)?;
        let installer = ArchiveInstaller::new(&config.install_root, &config.data_dir);

        Ok(Self::new(store, registry, installer, capabilities))
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn registry(&self) -> &InstalledRegistry {
        &self.registry
    }

    /// No manifest is cached; callers may offer to run [`update`](Self::update)
    pub fn manifest_is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Fetch the remote manifest and report what can be upgraded
    ///
    /// On failure the previously cached manifest stays active.
    pub fn update(&mut self) -> Result<UpdateReport> {
        let before = self.store.cached_bytes();
        self.manifest = self.store.fetch_remote(self.transport.as_ref())?;

        let manifest_changed = content_changed(&before, self.manifest.bytes());
        if manifest_changed {
            info!("Manifest updated");
        } else {
            info!("Manifest is already up to date");
        }

        Ok(UpdateReport {
            manifest_changed,
            upgradeable: self.diff_upgradeable(),
        })
    }

    /// Every manifest entry with its installed version
    pub fn list(&self) -> Vec<ListedPackage> {
        self.manifest
            .packages()
            .iter()
            .map(|descriptor| ListedPackage {
                descriptor: descriptor.clone(),
                installed_version: self.registry.version_of(&descriptor.name).map(str::to_string),
            })
            .collect()
    }

    /// Installed packages whose version differs from the manifest
    pub fn diff_upgradeable(&self) -> Vec<Upgradeable> {
        self.manifest
            .packages()
            .iter()
            // Later duplicates are shadowed by the first match
            .filter(|pkg| {
                self.manifest
                    .find(&pkg.name)
                    .is_some_and(|first| std::ptr::eq(first, *pkg))
            })
            .filter_map(|pkg| {
                let installed = self.registry.version_of(&pkg.name)?;
                (installed != pkg.version).then(|| Upgradeable {
                    name: pkg.name.clone(),
                    installed_version: installed.to_string(),
                    latest_version: pkg.version.clone(),
                })
            })
            .collect()
    }

    /// Install each requested package, continuing past failures
    pub fn install<S: AsRef<str>>(
        &mut self,
        names: &[S],
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<PackageReport>> {
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(self.install_one(name.as_ref(), progress)?);
        }
        Ok(reports)
    }

    /// Remove each requested package, continuing past failures
    pub fn remove<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<PackageReport>> {
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(self.remove_one(name.as_ref())?);
        }
        Ok(reports)
    }

    /// Reinstall every upgradeable package; an empty result means all up to date
    pub fn upgrade(&mut self, progress: &mut dyn ProgressSink) -> Result<Vec<PackageReport>> {
        let pending = self.diff_upgradeable();
        if pending.is_empty() {
            info!("All installed packages are up to date");
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(pending.len());
        for entry in pending {
            info!(
                "Upgrading {} from version {} to {}",
                entry.name, entry.installed_version, entry.latest_version
            );
            reports.push(self.install_one(&entry.name, progress)?);
        }
        Ok(reports)
    }

    fn install_one(&mut self, name: &str, progress: &mut dyn ProgressSink) -> Result<PackageReport> {
        let descriptor = match self.manifest.resolve(name) {
            Ok(descriptor) => descriptor.clone(),
            Err(e) => {
                debug!("{}", e);
                return Ok(PackageReport::new(name, Outcome::NotFound));
            }
        };

        // Reuse the stored casing so the package directory stays stable
        let (canonical, previous) = match self.registry.find_case_insensitive(&descriptor.name) {
            Some((key, version)) => (key.to_string(), Some(version.to_string())),
            None => (descriptor.name.clone(), None),
        };

        if previous.as_deref() == Some(descriptor.version.as_str()) {
            return Ok(PackageReport::new(
                &canonical,
                Outcome::AlreadyUpToDate {
                    version: descriptor.version,
                },
            ));
        }

        let dir = match self.installer.package_dir(&canonical) {
            Ok(dir) => dir,
            Err(e) => return Ok(failed(&canonical, e)),
        };

        // Running instances would hold files we are about to overwrite
        let was_running =
            previous.is_some() && self.processes.terminate_by_name_substring(&canonical) > 0;

        let target = PackageDescriptor {
            name: canonical.clone(),
            ..descriptor.clone()
        };
        let installation = match self.installer.install(&target, self.transport.as_ref(), progress) {
            Ok(installation) => installation,
            Err(e) => {
                if was_running {
                    // Bring back whatever is still on disk
                    self.relaunch(&dir, &canonical);
                }
                return Ok(failed(&canonical, e));
            }
        };
        debug!(
            "Unpacked {} entries from a {} byte archive for {}",
            installation.entries, installation.archive_bytes, canonical
        );

        self.registry.set(&canonical, &descriptor.version);
        self.registry.persist()?;

        let mut report = PackageReport::new(
            &canonical,
            Outcome::Installed {
                version: descriptor.version.clone(),
                previous,
            },
        );

        let executable = find_executable(&installation.dir, &canonical);
        if descriptor.wants_shortcut() {
            match &executable {
                Some(exe) => {
                    if let Err(e) = self.shortcuts.create(&canonical, exe) {
                        warn!("Shortcut for {} not created: {}", canonical, e);
                        report.notes.push(format!("Shortcut not created: {}", e));
                    }
                }
                None => report.notes.push(format!(
                    "No executable file found for {}, skipping shortcut creation.",
                    canonical
                )),
            }
        }

        if was_running {
            if let Some(exe) = &executable {
                self.processes.launch(exe);
            }
        }

        Ok(report)
    }

    fn relaunch(&self, dir: &Path, package_name: &str) {
        match find_executable(dir, package_name) {
            Some(exe) => self.processes.launch(&exe),
            None => warn!("No executable left in {} to relaunch", dir.display()),
        }
    }

    fn remove_one(&mut self, name: &str) -> Result<PackageReport> {
        let canonical = match self
            .registry
            .find_case_insensitive(name)
            .map(|(key, _)| key.to_string())
            .ok_or_else(|| Error::NotFoundError(name.to_string()))
        {
            Ok(canonical) => canonical,
            Err(e) => {
                debug!("{}", e);
                return Ok(PackageReport::new(name, Outcome::NotInstalled));
            }
        };

        let dir = match self.installer.package_dir(&canonical) {
            Ok(dir) if dir.parent() == Some(self.installer.install_root()) => dir,
            Ok(dir) => {
                return Ok(failed(
                    &canonical,
                    format!("{} is outside the install root", dir.display()),
                ));
            }
            Err(e) => return Ok(failed(&canonical, e)),
        };

        if !dir.is_dir() {
            // Stale entry: reported as not installed and left in the registry
            warn!(
                "{} is recorded as installed but {} does not exist",
                canonical,
                dir.display()
            );
            return Ok(PackageReport::new(&canonical, Outcome::NotInstalled));
        }

        let stopped = self.processes.terminate_by_name_substring(&canonical);
        if stopped > 0 {
            debug!("Stopped {} running instance(s) of {}", stopped, canonical);
        }

        if let Err(e) = fs::remove_dir_all(&dir) {
            return Ok(failed(&canonical, Error::filesystem(&dir, e)));
        }

        let version = self
            .registry
            .remove(&canonical)
            .map(|(_, version)| version)
            .unwrap_or_default();
        self.registry.persist()?;

        let mut report = PackageReport::new(&canonical, Outcome::Removed { version });
        if let Err(e) = self.shortcuts.delete(&canonical) {
            warn!("Shortcut for {} not deleted: {}", canonical, e);
            report.notes.push(format!("Shortcut not deleted: {}", e));
        }

        info!("Removed {}", canonical);
        Ok(report)
    }
}

fn failed(package: &str, reason: impl fmt::Display) -> PackageReport {
    warn!("{} failed: {}", package, reason);
    PackageReport::new(
        package,
        Outcome::Failed {
            reason: reason.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::system::{NoProcessGuard, NoShortcuts};
    use std::io::Write;

    /// Transport that serves a fixed manifest and refuses archives
    struct ManifestOnly(&'static str);

    impl Transport for ManifestOnly {
        fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }

        fn download(
            &self,
            url: &str,
            _sink: &mut dyn Write,
            _on_chunk: &mut dyn FnMut(u64, u64),
        ) -> Result<u64> {
            Err(Error::fetch(url, "HTTP 404 Not Found"))
        }
    }

    const CATALOG: &str = r#"[
        {"project_name": "Widget", "version": "1.2", "description": "", "url": "fake://widget.zip"},
        {"project_name": "Gadget", "version": "3.0", "description": "", "url": "fake://gadget.zip"},
        {"project_name": "Sprocket", "version": "0.1", "description": "", "url": "fake://sprocket.zip"}
    ]"#;

    fn coordinator(dir: &Path, installed: &[(&str, &str)]) -> PackageCoordinator {
        let config = Config::rooted_at(dir);
        config.ensure_dirs().unwrap();
        fs::write(config.manifest_path(), CATALOG).unwrap();

        let mut registry = InstalledRegistry::from_config(&config).unwrap();
        for (name, version) in installed {
            registry.set(name, version);
        }
        registry.persist().unwrap();

        PackageCoordinator::open(
            &config,
            Capabilities {
                transport: Box::new(ManifestOnly(CATALOG)),
                processes: Box::new(NoProcessGuard),
                shortcuts: Box::new(NoShortcuts),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_list_reports_installed_versions_ignoring_case() {
        let temp_dir = tempfile::tempdir().unwrap();
        let coord = coordinator(temp_dir.path(), &[("widget", "1.0")]);

        let listed = coord.list();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].descriptor.name, "Widget");
        assert_eq!(listed[0].installed_version.as_deref(), Some("1.0"));
        assert_eq!(listed[1].installed_version, None);
    }

    #[test]
    fn test_diff_upgradeable_only_differing_versions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let coord = coordinator(
            temp_dir.path(),
            &[("WIDGET", "1.0"), ("Gadget", "3.0"), ("Orphan", "9.9")],
        );

        let diff = coord.diff_upgradeable();
        assert_eq!(
            diff,
            vec![Upgradeable {
                name: "Widget".to_string(),
                installed_version: "1.0".to_string(),
                latest_version: "1.2".to_string(),
            }]
        );
    }

    #[test]
    fn test_diff_treats_downgrade_as_upgradeable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let coord = coordinator(temp_dir.path(), &[("Widget", "2.0")]);

        let diff = coord.diff_upgradeable();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].latest_version, "1.2");
    }

    #[test]
    fn test_install_already_up_to_date_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut coord = coordinator(temp_dir.path(), &[("Widget", "1.2")]);

        let reports = coord.install(&["widget"], &mut NoProgress).unwrap();
        assert_eq!(
            reports[0].outcome,
            Outcome::AlreadyUpToDate {
                version: "1.2".to_string()
            }
        );
        assert!(!reports[0].is_failure());
        assert_eq!(coord.registry().version_of("Widget"), Some("1.2"));
    }

    #[test]
    fn test_install_download_failure_leaves_registry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut coord = coordinator(temp_dir.path(), &[]);

        let reports = coord.install(&["Gadget", "nope"], &mut NoProgress).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].outcome, Outcome::Failed { .. }));
        assert_eq!(reports[1].outcome, Outcome::NotFound);
        assert_eq!(reports[1].to_string(), "Package nope not found.");
        assert!(coord.registry().is_empty());

        // Temporary archive was cleaned up
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join("data"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "zip"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_not_installed_touches_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut coord = coordinator(temp_dir.path(), &[]);
        let unrelated = temp_dir.path().join("programs/Widget");
        fs::create_dir_all(&unrelated).unwrap();

        let reports = coord.remove(&["Widget"]).unwrap();
        assert_eq!(reports[0].outcome, Outcome::NotInstalled);
        assert!(unrelated.exists());
    }

    #[test]
    fn test_remove_with_missing_directory_keeps_stale_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut coord = coordinator(temp_dir.path(), &[("Widget", "1.0")]);

        let reports = coord.remove(&["widget"]).unwrap();
        assert_eq!(reports[0].outcome, Outcome::NotInstalled);
        assert_eq!(reports[0].name, "Widget");
        assert_eq!(coord.registry().version_of("Widget"), Some("1.0"));
    }

    #[test]
    fn test_update_reports_change_then_no_change() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut coord = coordinator(temp_dir.path(), &[("Sprocket", "0.0.9")]);

        // The seeded cache is compact JSON, the fetched copy is re-serialized
        let first = coord.update().unwrap();
        assert!(first.manifest_changed);
        assert_eq!(first.upgradeable.len(), 1);
        assert_eq!(first.upgradeable[0].name, "Sprocket");

        let second = coord.update().unwrap();
        assert!(!second.manifest_changed);
    }

    #[test]
    fn test_upgrade_with_nothing_pending() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut coord = coordinator(temp_dir.path(), &[("Gadget", "3.0")]);

        let reports = coord.upgrade(&mut NoProgress).unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_report_lines() {
        let upgraded = PackageReport::new(
            "Widget",
            Outcome::Installed {
                version: "1.2".to_string(),
                previous: Some("1.0".to_string()),
            },
        );
        assert_eq!(upgraded.to_string(), "Upgraded Widget from 1.0 to 1.2");

        let fresh = PackageReport::new(
            "Widget",
            Outcome::Installed {
                version: "1.2".to_string(),
                previous: None,
            },
        );
        assert_eq!(fresh.to_string(), "Installed Widget 1.2");
        assert!(!fresh.is_failure());

        let missing = PackageReport::new("Widget", Outcome::NotInstalled);
        assert_eq!(missing.to_string(), "Package Widget is not installed.");
        assert!(missing.is_failure());
    }
}
