// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn location_args() -> [Arg; 5] {
    [
        Arg::new("data_dir")
            .long("data-dir")
            .value_name("PATH")
            .global(true)
            .help("Directory holding the manifest cache and installed registry"),
        Arg::new("install_root")
            .long("install-root")
            .value_name("PATH")
            .global(true)
            .help("Directory packages are unpacked into"),
        Arg::new("manifest_url")
            .long("manifest-url")
            .value_name("URL")
            .global(true)
            .help("Catalog endpoint"),
        Arg::new("shortcut_dir")
            .long("shortcut-dir")
            .value_name("PATH")
            .global(true)
            .help("Directory launcher entries are written to"),
        Arg::new("yes")
            .short('y')
            .long("yes")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Fetch the manifest without asking when none is cached"),
    ]
}

fn build_cli() -> Command {
    Command::new("opm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("OPM Contributors")
        .about("Install, upgrade and remove apps from the OPM catalog")
        .subcommand_required(false)
        .args(location_args())
        .subcommand(
            Command::new("update")
                .about("Pull the latest app manifest and check for available upgrades"),
        )
        .subcommand(Command::new("list").about("List all available packages with their versions"))
        .subcommand(
            Command::new("install")
                .about("Install one or more packages")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names (case-insensitive)"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove one or more installed packages")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names (case-insensitive)"),
                ),
        )
        .subcommand(
            Command::new("upgrade").about("Upgrade installed packages to the manifest versions"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("opm.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
