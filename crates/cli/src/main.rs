use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

mod inspect;
mod monitor;

const EXIT_PASS: u8 = 0;
pub(crate) const EXIT_CHECK_FAILED: u8 = 1;
pub(crate) const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Springboard generated-code harness tooling",
    long_about = None
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a harness manifest and print the memory.x it links with.
    Layout(LayoutArgs),

    /// Report what a built harness image will do.
    Inspect(InspectArgs),

    /// Watch a diagnostic stream for the readiness marker.
    Watch(WatchArgs),
}

#[derive(Parser, Debug)]
struct LayoutArgs {
    /// Path to the harness manifest (YAML)
    #[arg(short, long)]
    manifest: PathBuf,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Path to the harness firmware ELF file
    #[arg(short, long)]
    firmware: PathBuf,

    /// Check the image against this harness manifest (YAML)
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct WatchArgs {
    /// Raw diagnostic stream to read, `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Expected readiness marker; accepts \n, \r, \t, \\ and \xNN escapes
    #[arg(long, conflicts_with = "manifest")]
    marker: Option<String>,

    /// Take the expected marker from this harness manifest (YAML)
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Stop watching after this many milliseconds of wall time
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries reports.
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Layout(args) => run_layout(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Watch(args) => run_watch(args),
    }
}

fn run_layout(args: LayoutArgs) -> ExitCode {
    info!("Loading harness manifest: {:?}", args.manifest);
    let manifest = match springboard_config::HarnessManifest::from_file(&args.manifest) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match manifest.linker_script() {
        Ok(script) => {
            print!("{}", script);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn run_inspect(args: InspectArgs) -> ExitCode {
    info!("Inspecting harness image: {:?}", args.firmware);
    let image = match springboard_loader::inspect(&args.firmware) {
        Ok(image) => image,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(inspect::failure_code(&e));
        }
    };

    let problems = match &args.manifest {
        Some(path) => match springboard_config::HarnessManifest::from_file(path) {
            Ok(manifest) => inspect::verify(&image, &manifest),
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        },
        None => Vec::new(),
    };

    if args.json {
        let report = serde_json::json!({
            "image": image,
            "problems": problems,
        });
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        print!("{}", inspect::render(&image));
        for p in &problems {
            println!("mismatch    : {}", p);
        }
    }

    if problems.is_empty() {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_CHECK_FAILED)
    }
}

fn run_watch(args: WatchArgs) -> ExitCode {
    let marker = match (&args.marker, &args.manifest) {
        (Some(m), _) => {
            let bytes = match monitor::unescape(m) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("{}", e);
                    return ExitCode::from(EXIT_CONFIG_ERROR);
                }
            };
            if let Err(e) = springboard_config::validate_marker(&bytes) {
                error!("{}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
            bytes
        }
        (None, Some(path)) => match springboard_config::HarnessManifest::from_file(path) {
            Ok(manifest) => manifest.marker.into_bytes(),
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        },
        (None, None) => springboard_core::DEFAULT_MARKER.to_vec(),
    };

    let input: Box<dyn Read + Send> = if args.input == "-" {
        Box::new(std::io::stdin())
    } else {
        match File::open(&args.input) {
            Ok(f) => Box::new(f),
            Err(e) => {
                error!("Failed to open diagnostic stream {:?}: {}", args.input, e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    };

    info!(
        "Watching for marker \"{}\" ({} bytes)",
        marker.escape_ascii(),
        marker.len()
    );
    let deadline = args.deadline_ms.map(Duration::from_millis);
    let report = match monitor::watch(input, &marker, deadline) {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        println!("outcome  : {}", report.outcome.as_str());
        println!("received : \"{}\" ({} bytes)", report.received, report.received_bytes);
        if report.timed_out {
            println!("deadline : reached after {} ms", report.elapsed_ms);
        }
    }

    if report.outcome.is_pass() {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_CHECK_FAILED)
    }
}
