//! unseal - rebuild a plaintext app bundle from store-encrypted binaries
//!
//! Walks an installed `.app`, copies it into `Payload/`, and replaces every
//! encrypted range of its Mach-O binaries with the plaintext found in images
//! captured from the running app. The result is packaged as an `.ipa`.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use unseal_macho::LiveAddress;

mod bundle;
mod config;
mod dumper;
mod errors;
mod live;
mod package;
mod sink;

use config::Config;
use errors::{AppError, AppResult};
use live::DumpDirectory;
use sink::DirectorySink;

/// Rebuild a plaintext bundle from store-encrypted binaries and their live images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Installed application bundle (the .app directory)
    app: PathBuf,

    /// Directory of images captured from the running app, one per binary
    #[arg(short, long)]
    dumps: PathBuf,

    /// Output directory (overrides general.output_dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Name of the .ipa, without extension (defaults to the bundle name)
    #[arg(short, long)]
    name: Option<String>,

    /// Leave the result as a Payload/ directory
    #[arg(long)]
    no_package: bool,

    /// Keep Payload/ next to the .ipa
    #[arg(long)]
    keep_payload: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Failed to decrypt: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

/// Returns whether every binary was handled
fn run(args: Args) -> AppResult<bool> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(output) = args.output {
        config.general.output_dir = output;
    }
    if args.no_package {
        config.general.package = false;
    }
    if args.keep_payload {
        config.general.keep_payload = true;
    }

    let app = fs::canonicalize(&args.app)?;
    let name = match args.name {
        Some(name) => name,
        None => app
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Bundle(format!("{} has no name", app.display())))?,
    };

    let entries = bundle::walk(&app, &config.bundle.skip_dirs)?;
    info!(
        "{}: {} entries, {} bytes",
        app.display(),
        entries.len(),
        bundle::total_size(&entries)
    );
    let live = DumpDirectory::open(&args.dumps, LiveAddress::new(config.live.dump_base))?;

    let payload = config.general.output_dir.join("Payload");
    if payload.exists() {
        return Err(AppError::Config(format!(
            "{} already exists, refusing to overwrite",
            payload.display()
        )));
    }
    let mut sink = DirectorySink::create(payload.clone(), config.general.preserve_mtime)?;

    let started = Instant::now();
    let report = match dumper::run(&entries, &live, &mut sink) {
        Ok(report) => report,
        Err(e) => {
            // A partially decrypted bundle looks like a good one; don't leave it around
            let _ = fs::remove_dir_all(&payload);
            return Err(e);
        }
    };
    let stats = sink.stats();
    let duration = started.elapsed().as_secs_f64();
    info!(
        "{} file{} pulled, {} decrypted. {:.1} MB/s ({} bytes in {:.3}s)",
        stats.files,
        if stats.files != 1 { "s" } else { "" },
        report.decrypted.len(),
        stats.bytes as f64 / (1024.0 * 1024.0) / duration.max(f64::EPSILON),
        stats.bytes,
        duration
    );
    debug!(
        "{} directories, {} unencrypted binaries, {} other files",
        stats.directories, report.plain_binaries, report.other_files
    );
    for failure in &report.failures {
        warn!("{}: {}", failure.path.display(), failure.error);
    }

    if config.general.package {
        let ipa = config.general.output_dir.join(format!("{name}.ipa"));
        package::package(sink.root(), &ipa)?;
        if !config.general.keep_payload {
            fs::remove_dir_all(&payload)?;
        }
        info!("IPA saved @ {}", ipa.display());
    } else {
        info!("Payload saved @ {}", payload.display());
    }

    Ok(report.is_success())
}
