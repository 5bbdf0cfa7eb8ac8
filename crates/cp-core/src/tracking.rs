//! # Ride State Machine
//!
//! Interprets the live request document plus both parties' positions and
//! decides when the pickup and drop-off confirmations should be offered.
//! Prompts are single-shot per ride: once eligibility fires, hovering in
//! and out of the radius must not re-prompt.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::{mpsc, watch};

use crate::geo::{haversine_distance_meters, resolve_location};
use crate::models::{Coordinate, RidePhase, RideRequest};
use crate::traits::{Geocoder, Notifier};

/// Confirmation becomes available within this distance of the other party
/// (pickup) or the destination (drop-off).
pub const PROXIMITY_RADIUS_METERS: f64 = 50.0;

/// Minimum time after pickup before the drop-off prompt may fire. Guards
/// against an immediate prompt when pickup and destination are close.
pub const DROP_OFF_DWELL_SECONDS: i64 = 30;

/// UX-only: how long the confirmation button stays unpressable once shown.
/// Not a correctness gate; exported for the UI layer.
pub const CONFIRM_DISPLAY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingEvent {
    /// Driver is within the pickup radius of the rider.
    PickupPromptReady,
    /// Driver is within the drop-off radius of the destination and the
    /// dwell time has elapsed.
    DropOffPromptReady,
    /// The request document was deleted (cancelled or archived).
    RideClosed,
}

/// Per-session prompt evaluator. Holds the single-shot flags and the
/// memoized origin/destination resolutions for one ride.
pub struct RideMonitor {
    geocoder: Arc<dyn Geocoder>,
    notifier: Arc<dyn Notifier>,
    origin_coords: Option<Coordinate>,
    destination_coords: Option<Coordinate>,
    pickup_prompted: bool,
    drop_off_prompted: bool,
}

impl RideMonitor {
    pub fn new(geocoder: Arc<dyn Geocoder>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            geocoder,
            notifier,
            origin_coords: None,
            destination_coords: None,
            pickup_prompted: false,
            drop_off_prompted: false,
        }
    }

    /// Re-evaluates the gates against a fresh document snapshot.
    /// `now` is injected so the dwell gate is testable.
    pub async fn evaluate(
        &mut self,
        request: &RideRequest,
        now: DateTime<Utc>,
    ) -> Option<TrackingEvent> {
        match &request.phase {
            RidePhase::Accepted { driver } if !self.pickup_prompted => {
                let driver_position = driver.location?;
                let rider_position = match request.rider_location {
                    Some(position) => position,
                    None => self.origin_coords(request).await,
                };
                let distance = haversine_distance_meters(driver_position, rider_position);
                if distance <= PROXIMITY_RADIUS_METERS {
                    self.pickup_prompted = true;
                    Some(TrackingEvent::PickupPromptReady)
                } else {
                    None
                }
            }
            RidePhase::PickedUp {
                driver,
                picked_up_at,
            } if !self.drop_off_prompted => {
                let driver_position = driver.location?;
                let elapsed = (now - *picked_up_at).num_seconds();
                if elapsed < DROP_OFF_DWELL_SECONDS {
                    debug!(
                        "ride {}: waiting out drop-off dwell ({elapsed}s elapsed)",
                        request.id
                    );
                    return None;
                }
                let destination = self.destination_coords(request).await;
                let distance = haversine_distance_meters(driver_position, destination);
                if distance <= PROXIMITY_RADIUS_METERS {
                    self.drop_off_prompted = true;
                    Some(TrackingEvent::DropOffPromptReady)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Consumes the document change feed, emitting prompt events until the
    /// ride closes or the listener goes away. Dropping the events receiver
    /// tears the session down.
    pub async fn run(
        mut self,
        mut updates: watch::Receiver<Option<RideRequest>>,
        events: mpsc::Sender<TrackingEvent>,
    ) {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            match snapshot {
                None => {
                    let _ = events.send(TrackingEvent::RideClosed).await;
                    return;
                }
                Some(request) => {
                    if let Some(event) = self.evaluate(&request, Utc::now()).await {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if updates.changed().await.is_err() {
                return;
            }
        }
    }

    async fn origin_coords(&mut self, request: &RideRequest) -> Coordinate {
        if let Some(position) = self.origin_coords {
            return position;
        }
        let position =
            resolve_location(&request.origin, &*self.geocoder, &*self.notifier).await;
        self.origin_coords = Some(position);
        position
    }

    /// Resolved once when the destination first matters, then reused.
    async fn destination_coords(&mut self, request: &RideRequest) -> Coordinate {
        if let Some(position) = self.destination_coords {
            return position;
        }
        let position =
            resolve_location(&request.destination, &*self.geocoder, &*self.notifier).await;
        self.destination_coords = Some(position);
        position
    }
}
