//! # Location Reporting Channel
//!
//! Debounced publisher for a participant's live position. A burst of GPS
//! fixes collapses into at most one store write per quiet window, always the
//! freshest fix (trailing edge). Tearing the publisher down cancels any
//! pending write, so nothing fires after the tracking session ends.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Coordinate, Role};
use crate::traits::{PositionSource, RideRequestRepo, WatchOptions};

/// Reference publish cadence: at most one write per second.
pub const PUBLISH_QUIET_WINDOW: Duration = Duration::from_secs(1);

/// One publisher per (ride, participant). `offer` is fire-and-forget; the
/// worker owns the debounce state (latest value + window timer).
pub struct LocationPublisher {
    tx: mpsc::UnboundedSender<Coordinate>,
    worker: JoinHandle<()>,
}

impl LocationPublisher {
    pub fn new(repo: Arc<dyn RideRequestRepo>, ride_id: Uuid, role: Role) -> Self {
        Self::with_quiet_window(repo, ride_id, role, PUBLISH_QUIET_WINDOW)
    }

    pub fn with_quiet_window(
        repo: Arc<dyn RideRequestRepo>,
        ride_id: Uuid,
        role: Role,
        quiet: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(publish_loop(repo, ride_id, role, rx, quiet));
        Self { tx, worker }
    }

    /// Hands the newest fix to the worker. Never blocks and never fails
    /// from the caller's point of view; telemetry is best-effort.
    pub fn offer(&self, position: Coordinate) {
        let _ = self.tx.send(position);
    }

    /// Forwards a device position stream into the publisher until the
    /// watch ends on the device side.
    pub async fn pump(&self, source: &dyn PositionSource, options: WatchOptions) -> Result<()> {
        let mut positions = source.watch(options).await?;
        while let Some(position) = positions.recv().await {
            self.offer(position);
        }
        Ok(())
    }

    /// Cancels the publisher. A write already in flight completes; a fix
    /// still waiting out its quiet window is discarded.
    pub async fn stop(self) {
        let LocationPublisher { tx, worker } = self;
        drop(tx);
        let _ = worker.await;
    }
}

async fn publish_loop(
    repo: Arc<dyn RideRequestRepo>,
    ride_id: Uuid,
    role: Role,
    mut rx: mpsc::UnboundedReceiver<Coordinate>,
    quiet: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut latest = first;
        let window = tokio::time::sleep(quiet);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                next = rx.recv() => match next {
                    // Newer fix inside the window supersedes the held one.
                    Some(position) => latest = position,
                    // Publisher stopped mid-window: discard, write nothing.
                    None => return,
                },
            }
        }
        if let Err(err) = repo.set_location(ride_id, role, latest).await {
            // Lossy by design: the next interval self-heals.
            warn!("dropping {} update for ride {ride_id}: {err}", role.location_field());
        } else {
            debug!("published {} for ride {ride_id}", role.location_field());
        }
    }
}
