//! weir controller daemon.
//!
//! Boot sequence: config → host map → listener, then one thread per role
//! (compute worker, stats poller, capture flusher, table reloader, accept
//! loop) wired together with bounded channels. Ctrl-C closes the shutdown
//! channel, which every periodic thread selects on.
//!
//! Exit codes: 0 never (the daemon runs until signalled), 1 configuration
//! error, 2 IO error, 130 on SIGINT.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;
use crossbeam_channel::bounded;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use weir_common::config::Config;
use weir_common::hostmap::HostMap;
use weir_controller::capture::{spawn_flusher, CaptureRing, SnapshotWriter};
use weir_controller::events::Event;
use weir_controller::session::{spawn_session, SessionRegistry};
use weir_controller::worker::ComputeWorker;
use weir_controller::{monitor, reload};

/// weir SDN controller.
#[derive(Parser, Debug)]
#[command(name = "weir-controller", about = "OpenFlow 1.3 controller with FPLF routing")]
struct Cli {
    /// Path to the TOML configuration.
    #[arg(long, default_value = "weir.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

/// Worker events tolerated in flight before session readers back off.
const EVENT_QUEUE_DEPTH: usize = 1024;

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose { "debug" } else { "info" })
        }))
        .init();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    let hosts = match HostMap::load(&config.paths.host_map) {
        Ok(hosts) => hosts,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    if hosts.is_empty() {
        warn!("host map is empty; all hosts will be learned from traffic");
    }

    let listener = match TcpListener::bind(&config.listen_addr) {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_addr, "cannot bind OpenFlow listener: {e}");
            return ExitCode::from(2);
        }
    };
    let writer = match SnapshotWriter::new(
        config.paths.snapshot_dir.clone(),
        config.capture.max_snapshots,
        std::time::Duration::from_secs(config.capture.max_snapshot_age_secs),
    ) {
        Ok(writer) => writer,
        Err(e) => {
            error!(dir = %config.paths.snapshot_dir.display(), "cannot prepare snapshot directory: {e}");
            return ExitCode::from(2);
        }
    };

    info!(
        addr = %config.listen_addr,
        hosts = hosts.len(),
        threshold = config.monitor.congestion_threshold,
        "weir-controller starting"
    );

    // ── Shutdown: ctrl-c drops the sender, every receiver unblocks ─────
    let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
    let handler_slot = Mutex::new(Some(shutdown_tx));
    if let Err(e) = ctrlc::set_handler(move || {
        if let Some(tx) = handler_slot.lock().expect("handler slot poisoned").take() {
            drop(tx);
        }
    }) {
        warn!("cannot install SIGINT handler: {e}");
    }

    // ── Shared state and channels ──────────────────────────────────────
    let (events_tx, events_rx) = bounded::<Event>(EVENT_QUEUE_DEPTH);
    let registry = Arc::new(SessionRegistry::new());
    let (ring, flush_rx) = CaptureRing::new(config.capture.ring_capacity);
    let table = reload::initial_table(&config.paths.classification_table);

    // ── Task 1: compute worker ─────────────────────────────────────────
    let worker = ComputeWorker::new(&config, hosts, table.clone(), registry.clone(), ring.clone());
    let worker_handle = thread::Builder::new()
        .name("compute-worker".into())
        .spawn(move || worker.run(events_rx))
        .expect("failed to spawn compute worker");

    // ── Task 2: stats poller ───────────────────────────────────────────
    let poller_handle = monitor::spawn(
        registry.clone(),
        events_tx.clone(),
        config.sampling_interval(),
        shutdown_rx.clone(),
    );

    // ── Task 3: capture flusher ────────────────────────────────────────
    let flusher_handle = spawn_flusher(
        ring,
        flush_rx,
        writer,
        config.flush_period(),
        shutdown_rx.clone(),
    );

    // ── Task 4: classification reloader ────────────────────────────────
    let reloader_handle = reload::spawn(
        config.paths.classification_table.clone(),
        table,
        config.reload_period(),
        shutdown_rx.clone(),
    );

    // ── Task 5: accept loop (detached; dies with the process) ──────────
    {
        let registry = registry.clone();
        let events_tx = events_tx.clone();
        let _ = thread::Builder::new().name("of-listener".into()).spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        spawn_session(stream, registry.clone(), events_tx.clone());
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        });
    }

    // Block until SIGINT closes the shutdown channel.
    let _ = shutdown_rx.recv();
    info!("received SIGINT, shutting down");

    let _ = events_tx.send(Event::Shutdown);
    let _ = worker_handle.join();
    let _ = poller_handle.join();
    let _ = flusher_handle.join();
    let _ = reloader_handle.join();

    info!("weir-controller stopped");
    ExitCode::from(130)
}
