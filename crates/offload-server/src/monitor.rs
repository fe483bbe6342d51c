//! Monitoring sessions: baseline capture, arrival detection, offload.
//!
//! A session snapshots the deck's listing once at start (the baseline) and
//! then re-lists on an interval, diffing against that snapshot. The
//! baseline is never mutated; clips detected during the session go into a
//! separate handled-set so they are not re-reported on the next tick.
//! Stopping performs one last listing diff so a clip that finished
//! recording just before the operator hit stop is still picked up.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};

use deck_offload_types::{StopReport, TransferredFile};

use crate::error::OffloadError;
use crate::events::EventBus;
use crate::transfer::{self, ClipSource, RemoteClip};

/// Default interval between listing diffs.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

type ClipKey = (u8, String);

pub struct MonitorOptions {
    /// Slots to watch; must not be empty.
    pub slots: Vec<u8>,
    /// Pre-existing directory that receives offloaded clips.
    pub destination: PathBuf,
    /// Interval between listing diffs.
    pub interval: Duration,
}

pub struct MonitorSession {
    source: Arc<dyn ClipSource>,
    slots: Vec<u8>,
    destination: PathBuf,
    events: EventBus,
    baseline: Arc<HashSet<ClipKey>>,
    handled: Arc<Mutex<HashSet<ClipKey>>>,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
    stopped: bool,
}

impl MonitorSession {
    /// Capture the baseline and begin watching for new clips.
    pub fn start(
        source: Arc<dyn ClipSource>,
        opts: MonitorOptions,
        events: EventBus,
    ) -> Result<Self, OffloadError> {
        if opts.slots.is_empty() {
            return Err(OffloadError::Precondition("no slot selected".into()));
        }
        if !opts.destination.is_dir() {
            return Err(OffloadError::Precondition(format!(
                "destination path {} does not exist",
                opts.destination.display()
            )));
        }

        let listing = source.list_clips(&opts.slots)?;
        let baseline: Arc<HashSet<ClipKey>> = Arc::new(
            listing
                .into_iter()
                .map(|clip| (clip.slot, clip.name))
                .collect(),
        );
        tracing::info!(
            clips = baseline.len(),
            slots = ?opts.slots,
            "baseline captured"
        );

        let handled: Arc<Mutex<HashSet<ClipKey>>> = Arc::new(Mutex::new(HashSet::new()));
        let (stop_tx, stop_rx) = bounded(1);

        let worker = {
            let source = source.clone();
            let slots = opts.slots.clone();
            let destination = opts.destination.clone();
            let events = events.clone();
            let baseline = baseline.clone();
            let handled = handled.clone();
            let ticker = tick(opts.interval);
            std::thread::spawn(move || {
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            detect_and_offload(
                                source.as_ref(),
                                &slots,
                                &destination,
                                &baseline,
                                &handled,
                                &events,
                            );
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            })
        };

        events.monitoring_started(&opts.slots, &opts.destination);
        Ok(Self {
            source,
            slots: opts.slots,
            destination: opts.destination,
            events,
            baseline,
            handled,
            stop_tx,
            worker: Some(worker),
            stopped: false,
        })
    }

    /// Stop watching: join the worker (an in-flight transfer runs to
    /// completion), run the final listing check, and report what it moved.
    /// Calling this on an already-stopped session is a no-op.
    pub fn stop(&mut self) -> StopReport {
        if self.stopped {
            return StopReport::default();
        }
        self.stopped = true;

        let _ = self.stop_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        tracing::info!("running final transfer check");
        let last_transferred = detect_and_offload(
            self.source.as_ref(),
            &self.slots,
            &self.destination,
            &self.baseline,
            &self.handled,
            &self.events,
        );
        self.events.monitoring_stopped(last_transferred.clone());
        StopReport { last_transferred }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// One detection pass: list, diff against baseline and handled-set, and
/// offload the single newest new clip. Listing and transfer failures are
/// reported as error events; neither ends the session.
fn detect_and_offload(
    source: &dyn ClipSource,
    slots: &[u8],
    destination: &Path,
    baseline: &HashSet<ClipKey>,
    handled: &Mutex<HashSet<ClipKey>>,
    events: &EventBus,
) -> Option<TransferredFile> {
    let listing = match source.list_clips(slots) {
        Ok(listing) => listing,
        Err(e) => {
            tracing::warn!("clip listing failed: {e}");
            events.error(format!("clip listing failed: {e}"));
            return None;
        }
    };

    let newest = {
        let Ok(mut seen) = handled.lock() else {
            return None;
        };
        // The listing is newest-first, so the first fresh entry wins.
        let mut fresh: Vec<RemoteClip> = listing
            .iter()
            .filter(|clip| {
                let key = (clip.slot, clip.name.clone());
                !baseline.contains(&key) && !seen.contains(&key)
            })
            .cloned()
            .collect();
        if fresh.is_empty() {
            return None;
        }
        for clip in &fresh {
            seen.insert((clip.slot, clip.name.clone()));
        }
        fresh.swap_remove(0)
    };

    tracing::info!(slot = newest.slot, name = %newest.name, "new clip detected");
    events.file_detected(newest.slot, &newest.name);

    match transfer::offload_clip(source, &newest, destination, events) {
        Ok(path) => Some(TransferredFile {
            name: newest.name,
            path: path.display().to_string(),
        }),
        Err(e) => {
            tracing::warn!(name = %newest.name, "transfer failed: {e}");
            events.error(format!("transfer of {} failed: {e}", newest.name));
            None
        }
    }
}
