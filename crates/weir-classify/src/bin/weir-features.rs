//! Feature extractor: packet snapshots in, per-flow feature CSV out.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use weir_classify::{flows, snapshot, ClassifyError};

/// Extract bidirectional flow features from packet snapshot files.
#[derive(Parser, Debug)]
#[command(name = "weir-features", about = "weir flow feature extractor")]
struct Cli {
    /// Snapshot files, or directories to scan for them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Feature CSV to write.
    #[arg(long, short)]
    output: PathBuf,

    /// Enable debug logging.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose { "debug" } else { "info" })
        }))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<(), ClassifyError> {
    let snapshots = snapshot::collect_snapshots(&cli.inputs)?;
    let packets = snapshot::load_packets(&snapshots)?;
    let rows = flows::aggregate(&packets);
    flows::write_features(&cli.output, &rows)?;
    info!(
        snapshots = snapshots.len(),
        packets = packets.len(),
        flows = rows.len(),
        output = %cli.output.display(),
        "feature extraction complete"
    );
    Ok(())
}
