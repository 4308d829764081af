//! # Classification table reloader
//!
//! The offline pipeline rewrites the classification CSV atomically; this
//! thread rescans it on a period and publishes the parsed table as an
//! immutable snapshot behind an `ArcSwap`. The router reads the latest
//! snapshot with a single pointer load, which breaks the observation cycle
//! between classifier and router.
//!
//! A missing or unparsable file publishes the empty table: every flow
//! routes as Unknown at priority 0, purely on utilisation, until the
//! pipeline produces a fresh one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{tick, Receiver};
use tracing::{debug, info, warn};

use weir_common::table::ClassificationTable;

/// The shared, atomically swapped classification snapshot.
pub type SharedTable = Arc<ArcSwap<ClassificationTable>>;

/// Load the table now, falling back to empty; used once at startup.
pub fn initial_table(path: &PathBuf) -> SharedTable {
    let table = match ClassificationTable::load(path) {
        Ok(table) => {
            info!(path = %path.display(), pairs = table.len(), "classification table loaded");
            table
        }
        Err(e) => {
            warn!(path = %path.display(), "starting without a classification table: {e}");
            ClassificationTable::default()
        }
    };
    Arc::new(ArcSwap::from_pointee(table))
}

pub fn spawn(
    path: PathBuf,
    shared: SharedTable,
    period: Duration,
    shutdown: Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("table-reloader".into())
        .spawn(move || {
            let ticker = tick(period);
            let mut was_ok = true;
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => reload(&path, &shared, &mut was_ok),
                    recv(shutdown) -> _ => {
                        info!("table reloader stopped");
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn table reloader")
}

fn reload(path: &PathBuf, shared: &SharedTable, was_ok: &mut bool) {
    match ClassificationTable::load(path) {
        Ok(table) => {
            if !*was_ok {
                info!(path = %path.display(), pairs = table.len(), "classification table is back");
            }
            *was_ok = true;
            debug!(pairs = table.len(), "classification table refreshed");
            shared.store(Arc::new(table));
        }
        Err(e) => {
            // Only warn on the transition so a long outage stays quiet.
            if *was_ok {
                warn!(
                    path = %path.display(),
                    "classification table unavailable, all flows are Unknown: {e}"
                );
            }
            *was_ok = false;
            shared.store(Arc::new(ClassificationTable::default()));
        }
    }
}
