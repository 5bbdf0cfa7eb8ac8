//! # Core Traits (Ports)
//!
//! Any collaborator must implement these traits to be used by the core.
//! The store, geocoder, directions and notification services are external
//! systems; the core is written against these contracts so the ride logic
//! is testable without any of them live.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Assignment, CompletedRide, Coordinate, DriverProfile, RidePhase, RideRequest, Role,
};

/// Persistence contract for live ride-request documents.
///
/// Subscriptions are tokio `watch` receivers: every change to the observed
/// document (or pending set) is pushed to the reader, and dropping the
/// receiver is the unsubscribe.
#[async_trait]
pub trait RideRequestRepo: Send + Sync {
    /// Stores a new request. Fails with `Validation` if the rider already
    /// has a live request; the check and the insert happen under the same
    /// store-side guard.
    async fn create(&self, request: RideRequest) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Option<RideRequest>>;

    /// The rider's live request, if any. At most one exists by invariant.
    async fn find_active_for_rider(&self, rider_id: &str) -> Result<Option<RideRequest>>;

    async fn list_pending(&self) -> Result<Vec<RideRequest>>;

    /// Atomic `pending -> accepted`. If two drivers race, exactly one call
    /// returns the claimed request; the loser gets `AlreadyClaimed`.
    async fn claim(&self, id: Uuid, driver: Assignment) -> Result<RideRequest>;

    /// Applies a forward status transition. Illegal transitions fail with
    /// `InvalidTransition`; the legal table lives on `RideStatus`.
    async fn update_phase(&self, id: Uuid, next: RidePhase) -> Result<RideRequest>;

    /// Last-write-wins overwrite of one participant's location field.
    /// A driver location arriving after the assignment is gone is dropped.
    async fn set_location(&self, id: Uuid, role: Role, position: Coordinate) -> Result<()>;

    /// Driver-side cancellation: back to `pending`, assignment cleared,
    /// so the request re-enters the available pool.
    async fn reset_to_pending(&self, id: Uuid) -> Result<()>;

    /// Rider-side cancellation and archival both end here.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Change feed for one document. Yields `None` once it is deleted.
    async fn watch(&self, id: Uuid) -> Result<watch::Receiver<Option<RideRequest>>>;

    /// Change feed for the pending pool (the driver-home list).
    async fn watch_pending(&self) -> Result<watch::Receiver<Vec<RideRequest>>>;
}

/// Account storage contract: driver profiles and per-user ride histories.
/// Owned elsewhere; the core only reads profiles, updates the rating
/// average, and appends archival records.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn driver_profile(&self, driver_id: &str) -> Result<Option<DriverProfile>>;

    /// Blind write of a freshly computed average. The read-compute-write
    /// cycle is the caller's; see `RideService::submit_rating`.
    async fn update_driver_rating(&self, driver_id: &str, rating: f64, count: u32) -> Result<()>;

    /// Appends one archival record under `owner_email`'s history.
    async fn record_completed_ride(&self, owner_email: &str, ride: &CompletedRide) -> Result<()>;

    async fn completed_rides(&self, owner_email: &str) -> Result<Vec<CompletedRide>>;
}

/// Address resolution contract. `Ok(None)` means the service answered but
/// found nothing.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>>;
}

/// Turn-by-turn route contract. Returns the route as an ordered point list,
/// already decoded from whatever encoding the provider uses.
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn route(&self, origin: Coordinate, destination: Coordinate) -> Result<Vec<Coordinate>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
    Info,
}

/// Fire-and-forget user notification sink (the toast channel).
/// No return contract: a lost toast is not an error anyone can act on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: NoticeKind, title: &str, message: &str);
}

/// Device GPS watch parameters.
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub interval: std::time::Duration,
    pub min_distance_meters: f64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        // The tracking screens watch at 5 s / 10 m.
        Self {
            interval: std::time::Duration::from_secs(5),
            min_distance_meters: 10.0,
        }
    }
}

/// Device position stream contract. The receiver ends when the watch is
/// torn down on the device side.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn watch(&self, options: WatchOptions) -> Result<mpsc::Receiver<Coordinate>>;

    async fn current_position(&self) -> Result<Coordinate>;
}
