//! Classifier: feature CSV + model + host map in, classification table out.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use weir_common::config::Config;
use weir_common::hostmap::HostMap;
use weir_classify::model::Classifier;
use weir_classify::{export, flows, ClassifyError};

/// Classify extracted flows and export the controller's table.
#[derive(Parser, Debug)]
#[command(name = "weir-classify", about = "weir traffic classifier")]
struct Cli {
    /// Feature CSV produced by weir-features.
    features: PathBuf,

    /// Classification table to (atomically) replace.
    #[arg(long, short)]
    output: PathBuf,

    /// Serialised model blob (JSON).
    #[arg(long)]
    model: PathBuf,

    /// Host map used to join flows to symbolic host ids.
    #[arg(long)]
    host_map: PathBuf,

    /// Optional controller config, read for port overrides.
    #[arg(long)]
    config: Option<PathBuf>,

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
    let overrides = match &cli.config {
        Some(path) => Config::load(path)
            .map_err(|e| ClassifyError::Model(format!("bad config: {e}")))?
            .port_override_table(),
        None => Default::default(),
    };
    let classifier = Classifier::load(&cli.model)?;
    let hosts = HostMap::load(&cli.host_map)
        .map_err(|e| ClassifyError::Model(format!("bad host map: {e}")))?;

    let rows = flows::read_features(&cli.features)?;
    let records = export::classify_rows(&rows, &classifier, &hosts, &overrides);
    export::write_table(&cli.output, &records)
}
