//! `ember-cli <PACKAGE_DIR> [--verbose|-v] [--gc-floor-mib <N>]`.

use anyhow::Context;
use clap::{ArgAction, Parser};
use ember_kernel::{Runtime, RuntimeError};
use ember_loader::Loader;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "ember-cli", about = "Loads a directory of Ember packages and runs App::Main")]
struct Cli {
    /// Directory of shared libraries to load.
    package_dir: Option<PathBuf>,

    /// Raise log verbosity (repeatable: -v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Overrides the collector's minimum threshold floor, in MiB.
    #[arg(long = "gc-floor-mib")]
    gc_floor_mib: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(package_dir) = cli.package_dir else {
        println!("error: no package directory argument given");
        return ExitCode::from(1);
    };

    init_tracing(cli.verbose);

    match run(&package_dir, cli.gc_floor_mib) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(package_dir: &std::path::Path, gc_floor_mib: Option<u64>) -> anyhow::Result<()> {
    if !package_dir.is_dir() {
        anyhow::bail!(
            "package directory {} does not exist or is not readable",
            package_dir.display()
        );
    }

    let mut runtime = Runtime::with_gc_floor(gc_floor_mib);
    let mut loader = Loader::new();
    loader
        .load_from_directory(&mut runtime, package_dir)
        .with_context(|| format!("reading package directory {}", package_dir.display()))?;

    // SAFETY: `run_entry_point` is the only call that invokes a
    // package-supplied function pointer, and it is only ever called once,
    // here, after every package has finished its handshake.
    match unsafe { runtime.run_entry_point() } {
        Ok(()) => {}
        Err(RuntimeError::MissingEntryPoint) => {
            println!("App::Main not found; nothing to run");
        }
        Err(err) => return Err(err.into()),
    }

    runtime.free_all();
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stdout)
        .without_time()
        .init();
}
