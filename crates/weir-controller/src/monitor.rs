//! # Port-statistics poller
//!
//! One periodic thread asks every live session for its port counters; the
//! replies come back through the session readers as `PortStats` events and
//! are folded into the graph by the compute worker. The same tick carries
//! an `Event::Tick` so the worker drains its install-retry queue on the
//! sampling cadence.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{tick, Receiver, Sender};
use tracing::{debug, info};

use weir_common::ids::PortNo;
use weir_proto::messages::{MultipartRequest, OfMessage};

use crate::events::Event;
use crate::session::SessionRegistry;

pub fn spawn(
    registry: Arc<SessionRegistry>,
    events: Sender<Event>,
    interval: Duration,
    shutdown: Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("stats-poller".into())
        .spawn(move || {
            let ticker = tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => {
                        poll_once(&registry);
                        if events.send(Event::Tick).is_err() {
                            return;
                        }
                    }
                    recv(shutdown) -> _ => {
                        info!("stats poller stopped");
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn stats poller")
}

fn poll_once(registry: &SessionRegistry) {
    let request = OfMessage::MultipartRequest(MultipartRequest::PortStats {
        port_no: PortNo::ANY,
    });
    for dpid in registry.dpids() {
        if registry.send_to(dpid, &request).is_err() {
            // The session is on its way down; its reader emits SwitchDown.
            debug!(%dpid, "skipping stats poll for a dying session");
        }
    }
}
