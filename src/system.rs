// src/system.rs

//! OS integration behind narrow capability traits
//!
//! The coordinator never touches process tables or launcher menus directly.
//! It calls [`ProcessGuard`] and [`ShortcutManager`], which can be swapped
//! for inert implementations on headless systems and in tests.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use tracing::{debug, info, warn};

/// Stops and starts package processes
pub trait ProcessGuard {
    /// Terminate every process whose image name contains `name`, ignoring case
    ///
    /// Best-effort: processes that already exited or cannot be signalled are
    /// skipped. Returns how many processes were terminated.
    fn terminate_by_name_substring(&self, name: &str) -> usize;

    /// Start `executable` detached from this process, best-effort
    fn launch(&self, executable: &Path);
}

/// Creates and deletes launcher entries for installed packages
pub trait ShortcutManager {
    fn create(&self, package_name: &str, executable: &Path) -> Result<()>;

    /// Remove the launcher entry; a missing entry is not an error
    fn delete(&self, package_name: &str) -> Result<()>;
}

/// Process guard backed by the live process table
#[derive(Debug, Default)]
pub struct SystemProcessGuard;

impl ProcessGuard for SystemProcessGuard {
    fn terminate_by_name_substring(&self, name: &str) -> usize {
        let needle = name.to_lowercase();
        if needle.is_empty() {
            return 0;
        }

        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        let own_pid = std::process::id();
        let mut terminated = 0;

        for (pid, process) in system.processes() {
            if pid.as_u32() == own_pid || !process.name().to_lowercase().contains(&needle) {
                continue;
            }

            info!("Terminating process {} (PID: {})", process.name(), pid);
            if process.kill() {
                terminated += 1;
            } else {
                warn!(
                    "Could not terminate process {} (PID: {}), continuing",
                    process.name(),
                    pid
                );
            }
        }

        terminated
    }

    fn launch(&self, executable: &Path) {
        let mut command = Command::new(executable);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = executable.parent() {
            command.current_dir(dir);
        }

        match command.spawn() {
            Ok(child) => info!("Restarted {} (PID: {})", executable.display(), child.id()),
            Err(e) => warn!("Failed to restart {}: {}", executable.display(), e),
        }
    }
}

/// Process guard that never finds anything running
#[derive(Debug, Default)]
pub struct NoProcessGuard;

impl ProcessGuard for NoProcessGuard {
    fn terminate_by_name_substring(&self, _name: &str) -> usize {
        0
    }

    fn launch(&self, _executable: &Path) {}
}

/// Launcher entries as freedesktop `.desktop` files
#[derive(Debug, Clone)]
pub struct DesktopEntryShortcuts {
    dir: PathBuf,
}

impl DesktopEntryShortcuts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn entry_path(&self, package_name: &str) -> PathBuf {
        self.dir.join(format!("{}.desktop", package_name))
    }
}

impl ShortcutManager for DesktopEntryShortcuts {
    fn create(&self, package_name: &str, executable: &Path) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::filesystem(&self.dir, e))?;

        let working_dir = executable.parent().unwrap_or(executable);
        let entry = format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name={name}\n\
             Exec=\"{exec}\"\n\
             Path={path}\n\
             Icon={exec}\n\
             Terminal=false\n",
            name = package_name,
            exec = executable.display(),
            path = working_dir.display(),
        );

        let path = self.entry_path(package_name);
        fs::write(&path, entry).map_err(|e| Error::filesystem(&path, e))?;
        info!("Created launcher entry {}", path.display());
        Ok(())
    }

    fn delete(&self, package_name: &str) -> Result<()> {
        let path = self.entry_path(package_name);
        if !path.exists() {
            debug!("No launcher entry at {}", path.display());
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| Error::filesystem(&path, e))?;
        info!("Deleted launcher entry {}", path.display());
        Ok(())
    }
}

/// Shortcut manager that does nothing
#[derive(Debug, Default)]
pub struct NoShortcuts;

impl ShortcutManager for NoShortcuts {
    fn create(&self, _package_name: &str, _executable: &Path) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _package_name: &str) -> Result<()> {
        Ok(())
    }
}

/// Locate the main executable of an installed package
///
/// Prefers a file named after the package, then any executable file, looking
/// only at the top level of the package directory.
pub fn find_executable(package_dir: &Path, package_name: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(package_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_executable(path))
        .collect();
    candidates.sort();

    let named_after_package = candidates.iter().position(|path| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().eq_ignore_ascii_case(package_name))
            .unwrap_or(false)
    });

    match named_after_package {
        Some(index) => Some(candidates.swap_remove(index)),
        None => candidates.into_iter().next(),
    }
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("exe"))
            .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
