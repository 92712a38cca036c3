// src/main.rs

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use opm::config::Config;
use opm::coordinator::{Capabilities, PackageCoordinator, PackageReport};
use opm::progress::{ProgressSink, fraction};
use opm::system::{DesktopEntryShortcuts, SystemProcessGuard};
use opm::transport::HttpClient;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "opm")]
#[command(author, version, about = "Install, upgrade and remove apps from the OPM catalog", long_about = None)]
struct Cli {
    #[command(flatten)]
    locations: Locations,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Locations {
    /// Directory holding the manifest cache and installed registry
    #[arg(long, global = true, env = "OPM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory packages are unpacked into
    #[arg(long, global = true, env = "OPM_INSTALL_ROOT")]
    install_root: Option<PathBuf>,

    /// Catalog endpoint
    #[arg(long, global = true, env = "OPM_MANIFEST_URL")]
    manifest_url: Option<String>,

    /// Directory launcher entries are written to
    #[arg(long, global = true, env = "OPM_SHORTCUT_DIR")]
    shortcut_dir: Option<PathBuf>,

    /// Fetch the manifest without asking when none is cached
    #[arg(short, long, global = true)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull the latest app manifest and check for available upgrades
    Update,
    /// List all available packages with their versions
    List,
    /// Install one or more packages
    Install {
        /// Package names (case-insensitive)
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove one or more installed packages
    Remove {
        /// Package names (case-insensitive)
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Upgrade installed packages to the manifest versions
    Upgrade,
}

impl Locations {
    fn resolve(&self) -> Result<Config> {
        let mut config = Config::from_user_dirs()?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.install_root {
            config.install_root = dir.clone();
        }
        if let Some(url) = &self.manifest_url {
            config.manifest_url = url.clone();
        }
        if let Some(dir) = &self.shortcut_dir {
            config.shortcut_dir = dir.clone();
        }
        Ok(config)
    }
}

/// Renders download and extraction progress as a terminal bar
#[derive(Default)]
struct TerminalProgress {
    bar: Option<ProgressBar>,
    label: String,
}

impl TerminalProgress {
    fn start(&mut self, total: u64, label: &str) -> &ProgressBar {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
        let style = ProgressStyle::with_template("{msg} [{bar:40.green/red}] {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#-");
        let bar = ProgressBar::new(total).with_style(style).with_message(label.to_string());
        self.label = label.to_string();
        self.bar.insert(bar)
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn progress(&mut self, current: u64, total: u64, label: &str) {
        let restart = match &self.bar {
            // New phase, or the next package in a batch
            Some(bar) => self.label != label || bar.is_finished() || current < bar.position(),
            None => true,
        };
        let bar = if restart {
            self.start(total, label)
        } else {
            match &self.bar {
                Some(bar) => bar,
                None => return,
            }
        };

        // Total becomes known after the first chunk on some servers
        if total > 0 && bar.length() != Some(total) {
            bar.set_length(total);
        }
        bar.set_position(current);
        if fraction(current, total) >= 1.0 {
            bar.finish();
        }
    }
}

fn print_reports(reports: &[PackageReport]) -> bool {
    let mut failed = false;
    for report in reports {
        println!("{}", report);
        for note in &report.notes {
            println!("  {}", note);
        }
        failed |= report.is_failure();
    }
    failed
}

/// Fetch the manifest and print what changed; false if the fetch failed
fn run_update(coordinator: &mut PackageCoordinator) -> bool {
    println!("Fetching manifest from the server...");
    let report = match coordinator.update() {
        Ok(report) => report,
        Err(e) => {
            println!("Failed to fetch manifest: {}", e);
            return false;
        }
    };

    if report.manifest_changed {
        println!("Manifest updated.");
    } else {
        println!("Manifest is already up to date.");
    }

    if report.upgradeable.is_empty() {
        println!("All installed packages are up to date.");
    }
    for entry in &report.upgradeable {
        println!(
            "Update available for package: {} - Installed: {}, Latest: {}",
            entry.name, entry.installed_version, entry.latest_version
        );
    }
    true
}

/// Offer to fetch the manifest when none is cached; false if still empty
fn ensure_manifest(coordinator: &mut PackageCoordinator, assume_yes: bool) -> Result<bool> {
    if !coordinator.manifest_is_empty() {
        return Ok(true);
    }

    let fetch = assume_yes
        || Confirm::new()
            .with_prompt("App manifest not found, would you like to update it?")
            .interact()
            .context("Failed to read answer")?;

    if !fetch {
        println!("Manifest update skipped.");
        return Ok(false);
    }

    run_update(coordinator);
    Ok(!coordinator.manifest_is_empty())
}

fn main() -> Result<ExitCode> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        // No command provided, show help
        println!("OPM Package Manager v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'opm --help' for usage information");
        return Ok(ExitCode::SUCCESS);
    };

    let config = cli.locations.resolve()?;
    info!("Using data directory {}", config.data_dir.display());

    let capabilities = Capabilities {
        transport: Box::new(HttpClient::new()?),
        processes: Box::new(SystemProcessGuard),
        shortcuts: Box::new(DesktopEntryShortcuts::new(&config.shortcut_dir)),
    };
    let mut coordinator = PackageCoordinator::open(&config, capabilities)
        .context("Failed to load package state")?;
    let assume_yes = cli.locations.yes;

    let succeeded = match command {
        Commands::Update => run_update(&mut coordinator),
        Commands::List => {
            if !ensure_manifest(&mut coordinator, assume_yes)? {
                return Ok(ExitCode::FAILURE);
            }

            println!("Listing all available packages:");
            println!();
            for listed in coordinator.list() {
                let descriptor = &listed.descriptor;
                match &listed.installed_version {
                    Some(installed) => println!(
                        "{:<20} {} (Installed: {})",
                        descriptor.name, descriptor.version, installed
                    ),
                    None => println!("{:<20} {}", descriptor.name, descriptor.version),
                }
                println!("{}\n", descriptor.description);
            }
            true
        }
        Commands::Install { names } => {
            if !ensure_manifest(&mut coordinator, assume_yes)? {
                return Ok(ExitCode::FAILURE);
            }

            let mut progress = TerminalProgress::default();
            let reports = coordinator.install(names.as_slice(), &mut progress)?;
            progress.finish();
            !print_reports(&reports)
        }
        Commands::Remove { names } => {
            let reports = coordinator.remove(names.as_slice())?;
            !print_reports(&reports)
        }
        Commands::Upgrade => {
            if !ensure_manifest(&mut coordinator, assume_yes)? {
                return Ok(ExitCode::FAILURE);
            }

            let mut progress = TerminalProgress::default();
            let reports = coordinator.upgrade(&mut progress)?;
            progress.finish();
            if reports.is_empty() {
                println!("All installed packages are up to date.");
            }
            !print_reports(&reports)
        }
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_batch_install() {
        let cli = Cli::try_parse_from(["opm", "install", "Widget", "gadget"]).unwrap();
        match cli.command {
            Some(Commands::Install { names }) => assert_eq!(names, vec!["Widget", "gadget"]),
            _ => panic!("expected install command"),
        }
    }

    #[test]
    fn test_cli_requires_names_for_remove() {
        assert!(Cli::try_parse_from(["opm", "remove"]).is_err());
    }

    #[test]
    fn test_cli_location_overrides() {
        let cli = Cli::try_parse_from([
            "opm",
            "list",
            "--data-dir",
            "/tmp/opm-data",
            "--manifest-url",
            "http://localhost/manifest.json",
        ])
        .unwrap();

        let config = cli.locations.resolve().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/opm-data"));
        assert_eq!(config.manifest_url, "http://localhost/manifest.json");
    }

    #[test]
    fn test_progress_sink_switches_bars_between_phases() {
        let mut progress = TerminalProgress::default();
        progress.progress(512, 1024, "Downloading:");
        progress.progress(1024, 1024, "Downloading:");
        progress.progress(1, 3, "Extracting: ");

        let bar = progress.bar.as_ref().unwrap();
        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 1);
        assert_eq!(progress.label, "Extracting: ");
    }

    #[test]
    fn test_progress_bar_stays_open_while_total_unknown() {
        let mut progress = TerminalProgress::default();
        progress.progress(4096, 0, "Downloading:");
        assert!(!progress.bar.as_ref().unwrap().is_finished());

        progress.progress(3, 3, "Extracting: ");
        assert!(progress.bar.as_ref().unwrap().is_finished());
    }
}
