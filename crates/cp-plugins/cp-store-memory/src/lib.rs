//! # cp-store-memory
//!
//! In-process implementation of the ride-request store and the account
//! directory. The single write lock is the transaction boundary: the
//! duplicate-request guard and the claim both check-and-mutate under it,
//! which gives the atomicity the matching flow requires without a real
//! document store behind it.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use cp_core::error::{AppError, Result};
use cp_core::models::{
    Assignment, CompletedRide, Coordinate, DriverProfile, RidePhase, RideRequest, RideStatus, Role,
};
use cp_core::traits::{AccountDirectory, RideRequestRepo};

#[derive(Default)]
struct StoreInner {
    requests: HashMap<Uuid, RideRequest>,
    watchers: HashMap<Uuid, watch::Sender<Option<RideRequest>>>,
}

impl StoreInner {
    fn pending_snapshot(&self) -> Vec<RideRequest> {
        let mut pending: Vec<RideRequest> = self
            .requests
            .values()
            .filter(|r| r.status() == RideStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    fn publish(&mut self, id: Uuid) {
        let snapshot = self.requests.get(&id).cloned();
        if let Some(tx) = self.watchers.get(&id) {
            let _ = tx.send(snapshot);
        }
    }
}

pub struct MemoryRideStore {
    inner: RwLock<StoreInner>,
    pending_tx: watch::Sender<Vec<RideRequest>>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        let (pending_tx, _) = watch::channel(Vec::new());
        Self {
            inner: RwLock::new(StoreInner::default()),
            pending_tx,
        }
    }

    fn publish_pending(&self, inner: &StoreInner) {
        let _ = self.pending_tx.send(inner.pending_snapshot());
    }
}

impl Default for MemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideRequestRepo for MemoryRideStore {
    /// Insert guarded by the one-live-request-per-rider invariant. The
    /// check and the insert share the write lock, so two racing submits
    /// from the same rider cannot both land.
    async fn create(&self, request: RideRequest) -> Result<Uuid> {
        let mut inner = self.inner.write().await;
        if inner
            .requests
            .values()
            .any(|r| r.rider_id == request.rider_id)
        {
            return Err(AppError::Validation(format!(
                "rider {} already has an active ride request",
                request.rider_id
            )));
        }
        let id = request.id;
        inner.requests.insert(id, request);
        inner.publish(id);
        self.publish_pending(&inner);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RideRequest>> {
        Ok(self.inner.read().await.requests.get(&id).cloned())
    }

    async fn find_active_for_rider(&self, rider_id: &str) -> Result<Option<RideRequest>> {
        Ok(self
            .inner
            .read()
            .await
            .requests
            .values()
            .find(|r| r.rider_id == rider_id)
            .cloned())
    }

    async fn list_pending(&self) -> Result<Vec<RideRequest>> {
        Ok(self.inner.read().await.pending_snapshot())
    }

    /// The atomic claim. Whoever reaches the write lock first on a
    /// `pending` request wins; the loser finds the status already moved
    /// and gets `AlreadyClaimed`.
    async fn claim(&self, id: Uuid, driver: Assignment) -> Result<RideRequest> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("ride request", id.to_string()))?;
        if request.status() != RideStatus::Pending {
            return Err(AppError::AlreadyClaimed(id.to_string()));
        }
        request.phase = RidePhase::Accepted { driver };
        let claimed = request.clone();
        inner.publish(id);
        self.publish_pending(&inner);
        Ok(claimed)
    }

    async fn update_phase(&self, id: Uuid, next: RidePhase) -> Result<RideRequest> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("ride request", id.to_string()))?;
        let from = request.status();
        let to = next.status();
        if !from.can_transition_to(to) {
            return Err(AppError::InvalidTransition { from, to });
        }
        request.phase = next;
        let updated = request.clone();
        inner.publish(id);
        self.publish_pending(&inner);
        Ok(updated)
    }

    async fn set_location(&self, id: Uuid, role: Role, position: Coordinate) -> Result<()> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("ride request", id.to_string()))?;
        match role {
            Role::Rider => request.rider_location = Some(position),
            Role::Driver => match request.phase.assignment_mut() {
                Some(assignment) => assignment.location = Some(position),
                None => {
                    // Stale report after a reset; there is no driver to
                    // attach it to anymore.
                    debug!("dropping driver location for unassigned ride {id}");
                    return Ok(());
                }
            },
        }
        inner.publish(id);
        Ok(())
    }

    /// Only a trip that is underway can be handed back. A completed ride
    /// belongs to the rating flow, and a pending one has nothing to reset.
    async fn reset_to_pending(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let request = inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("ride request", id.to_string()))?;
        match request.status() {
            RideStatus::Accepted | RideStatus::PickedUp => {}
            from => {
                return Err(AppError::InvalidTransition {
                    from,
                    to: RideStatus::Pending,
                })
            }
        }
        request.phase = RidePhase::Pending;
        inner.publish(id);
        self.publish_pending(&inner);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.requests.remove(&id).is_none() {
            return Err(AppError::NotFound("ride request", id.to_string()));
        }
        // Closing notification, then the channel itself goes away.
        if let Some(tx) = inner.watchers.remove(&id) {
            let _ = tx.send(None);
        }
        self.publish_pending(&inner);
        Ok(())
    }

    async fn watch(&self, id: Uuid) -> Result<watch::Receiver<Option<RideRequest>>> {
        let mut inner = self.inner.write().await;
        let current = inner.requests.get(&id).cloned();
        let tx = inner
            .watchers
            .entry(id)
            .or_insert_with(|| watch::channel(current).0);
        Ok(tx.subscribe())
    }

    async fn watch_pending(&self) -> Result<watch::Receiver<Vec<RideRequest>>> {
        Ok(self.pending_tx.subscribe())
    }
}

#[derive(Default)]
struct AccountsInner {
    drivers: HashMap<String, DriverProfile>,
    histories: HashMap<String, Vec<CompletedRide>>,
}

/// In-process account directory: driver profiles by uid, ride histories
/// by owner email.
#[derive(Default)]
pub struct MemoryAccounts {
    inner: RwLock<AccountsInner>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a driver profile (registration is out of scope
    /// for the core; tests and the demo wiring use this).
    pub async fn upsert_driver(&self, profile: DriverProfile) {
        self.inner
            .write()
            .await
            .drivers
            .insert(profile.uid.clone(), profile);
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccounts {
    async fn driver_profile(&self, driver_id: &str) -> Result<Option<DriverProfile>> {
        Ok(self.inner.read().await.drivers.get(driver_id).cloned())
    }

    async fn update_driver_rating(&self, driver_id: &str, rating: f64, count: u32) -> Result<()> {
        let mut inner = self.inner.write().await;
        let profile = inner
            .drivers
            .get_mut(driver_id)
            .ok_or_else(|| AppError::NotFound("driver profile", driver_id.to_string()))?;
        profile.rating = rating;
        profile.rating_count = count;
        Ok(())
    }

    async fn record_completed_ride(&self, owner_email: &str, ride: &CompletedRide) -> Result<()> {
        self.inner
            .write()
            .await
            .histories
            .entry(owner_email.to_string())
            .or_default()
            .push(ride.clone());
        Ok(())
    }

    async fn completed_rides(&self, owner_email: &str) -> Result<Vec<CompletedRide>> {
        Ok(self
            .inner
            .read()
            .await
            .histories
            .get(owner_email)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use cp_core::models::{CancelActor, FuelGrade, SessionUser};
    use cp_core::rides::RideService;
    use cp_core::tracking::TrackingEvent;
    use cp_core::traits::{Geocoder, NoticeKind, Notifier};
    use std::sync::Arc;

    const LIBRARY_WEST: Coordinate = Coordinate {
        latitude: 29.6516,
        longitude: -82.3248,
    };

    struct CampusGeocoder;

    #[async_trait]
    impl Geocoder for CampusGeocoder {
        async fn geocode(&self, address: &str) -> Result<Option<Coordinate>> {
            if address == "Library West" {
                Ok(Some(LIBRARY_WEST))
            } else {
                Ok(None)
            }
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        async fn notify(&self, _kind: NoticeKind, _title: &str, _message: &str) {}
    }

    fn rider() -> SessionUser {
        SessionUser {
            uid: "rider-1".into(),
            name: "Sam Rider".into(),
            email: "sam@ufl.edu".into(),
            driver: false,
        }
    }

    fn driver_session(uid: &str, email: &str) -> SessionUser {
        SessionUser {
            uid: uid.into(),
            name: "Dana Driver".into(),
            email: email.into(),
            driver: true,
        }
    }

    fn driver_profile(uid: &str, email: &str) -> DriverProfile {
        DriverProfile {
            uid: uid.into(),
            email: email.into(),
            first_name: "Dana".into(),
            last_name: "Driver".into(),
            car_image_url: None,
            car_seats: 4,
            fuel: FuelGrade::Regular,
            mpg: 25.0,
            rating: 4.0,
            rating_count: 2,
        }
    }

    struct Harness {
        store: Arc<MemoryRideStore>,
        accounts: Arc<MemoryAccounts>,
        service: Arc<RideService>,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryRideStore::new());
        let accounts = Arc::new(MemoryAccounts::new());
        accounts
            .upsert_driver(driver_profile("driver-a", "a@ufl.edu"))
            .await;
        accounts
            .upsert_driver(driver_profile("driver-b", "b@ufl.edu"))
            .await;
        let service = Arc::new(RideService::new(
            store.clone(),
            accounts.clone(),
            Arc::new(CampusGeocoder),
            Arc::new(SilentNotifier),
        ));
        Harness {
            store,
            accounts,
            service,
        }
    }

    #[tokio::test]
    async fn rider_cannot_hold_two_live_requests() {
        let h = harness().await;
        h.service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        let err = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Reitz Union", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();

        let s1 = h.service.clone();
        let s2 = h.service.clone();
        let first = tokio::spawn(async move {
            s1.accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
                .await
        });
        let second = tokio::spawn(async move {
            s2.accept_request(id, &driver_session("driver-b", "b@ufl.edu"))
                .await
        });

        let results = [first.await.unwrap(), second.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let losses = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::AlreadyClaimed(_))))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(losses, 1);

        let request = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(request.status(), RideStatus::Accepted);
        let assignment = request.driver().unwrap();
        assert_eq!(
            assignment.profile.first_name, "Dana",
            "winner's snapshot is embedded"
        );
    }

    #[tokio::test]
    async fn confirm_pickup_requires_accepted_status() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();

        let err = h.service.confirm_pickup(id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: RideStatus::Pending,
                to: RideStatus::PickedUp,
            }
        ));

        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();
        let updated = h.service.confirm_pickup(id).await.unwrap();
        assert_eq!(updated.status(), RideStatus::PickedUp);
    }

    #[tokio::test]
    async fn driver_cancel_returns_request_to_the_pool() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();
        assert!(h.service.list_available().await.unwrap().is_empty());

        h.service.cancel(id, CancelActor::Driver).await.unwrap();

        let pool = h.service.list_available().await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].id, id);
        assert_eq!(pool[0].status(), RideStatus::Pending);
        assert!(pool[0].driver().is_none(), "assignment fully cleared");
    }

    #[tokio::test]
    async fn driver_cancel_after_drop_off_is_rejected() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();
        h.service.confirm_pickup(id).await.unwrap();
        h.service.confirm_drop_off(id).await.unwrap();

        let err = h.service.cancel(id, CancelActor::Driver).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: RideStatus::DropOffConfirmed,
                to: RideStatus::Pending,
            }
        ));

        // The completed trip never re-enters the pool and can still be
        // rated and archived.
        let request = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(request.status(), RideStatus::DropOffConfirmed);
        assert!(h.service.list_available().await.unwrap().is_empty());
        h.service.submit_rating(id, Some(4)).await.unwrap();
        assert!(h.store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_on_a_pending_request_is_rejected() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();

        let err = h.store.reset_to_pending(id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: RideStatus::Pending,
                to: RideStatus::Pending,
            }
        ));
        assert_eq!(h.service.list_available().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rider_cancel_deletes_the_request() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();

        let watcher = h.store.watch(id).await.unwrap();
        h.service.cancel(id, CancelActor::Rider).await.unwrap();

        assert!(h.store.get(id).await.unwrap().is_none());
        assert!(watcher.borrow().is_none(), "watchers saw the delete");
        assert!(h.service.list_available().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_driver_location_after_reset_is_dropped() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();
        h.service.cancel(id, CancelActor::Driver).await.unwrap();

        // The debounced write that raced the cancel must not resurrect
        // a driver location on a pending request.
        h.store
            .set_location(id, Role::Driver, LIBRARY_WEST)
            .await
            .unwrap();
        let request = h.store.get(id).await.unwrap().unwrap();
        assert!(request.driver_location().is_none());
    }

    #[tokio::test]
    async fn declining_to_rate_skips_the_average() {
        let h = harness().await;
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();
        h.service.confirm_pickup(id).await.unwrap();
        h.service.confirm_drop_off(id).await.unwrap();

        h.service.submit_rating(id, None).await.unwrap();

        let profile = h.accounts.driver_profile("driver-a").await.unwrap().unwrap();
        assert_eq!(profile.rating, 4.0);
        assert_eq!(profile.rating_count, 2);
        // The ride still archived and the live request is gone.
        assert_eq!(h.accounts.completed_rides("sam@ufl.edu").await.unwrap().len(), 1);
        assert!(h.store.get(id).await.unwrap().is_none());
    }

    /// The full trip: submit, race the claim, converge on the rider,
    /// pickup, dwell, converge on the destination, drop off, rate,
    /// archive.
    #[tokio::test]
    async fn end_to_end_ride_flow() {
        let h = harness().await;
        let origin = Coordinate {
            latitude: 29.64,
            longitude: -82.35,
        };
        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", Some(origin))
            .await
            .unwrap();

        // Two drivers race; exactly one wins.
        let s1 = h.service.clone();
        let s2 = h.service.clone();
        let a = tokio::spawn(async move {
            s1.accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
                .await
        });
        let b = tokio::spawn(async move {
            s2.accept_request(id, &driver_session("driver-b", "b@ufl.edu"))
                .await
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let winner = h.store.get(id).await.unwrap().unwrap();
        let winner_assignment = winner.driver().unwrap().clone();

        let (mut events, monitor) = h.service.monitor_ride(id).await.unwrap();

        // Driver converges on the rider: pickup prompt fires once.
        h.store.set_location(id, Role::Driver, origin).await.unwrap();
        assert_eq!(events.recv().await, Some(TrackingEvent::PickupPromptReady));

        // Pickup confirmed 40 s ago (backdated so the dwell gate is open).
        h.store
            .update_phase(
                id,
                RidePhase::PickedUp {
                    driver: winner_assignment.clone(),
                    picked_up_at: Utc::now() - Duration::seconds(40),
                },
            )
            .await
            .unwrap();

        // Driver converges on the geocoded destination.
        h.store
            .set_location(id, Role::Driver, LIBRARY_WEST)
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(TrackingEvent::DropOffPromptReady));

        let dropped = h.service.confirm_drop_off(id).await.unwrap();
        assert_eq!(dropped.status(), RideStatus::DropOffConfirmed);

        // Five stars: 4.0 over 2 ratings becomes 4.33 over 3.
        let record = h.service.submit_rating(id, Some(5)).await.unwrap();
        assert_eq!(record.driver_rating, 4.33);

        let winner_uid = &winner_assignment.driver_id;
        let profile = h.accounts.driver_profile(winner_uid).await.unwrap().unwrap();
        assert_eq!(profile.rating, 4.33);
        assert_eq!(profile.rating_count, 3);

        let rider_history = h.accounts.completed_rides("sam@ufl.edu").await.unwrap();
        let driver_history = h
            .accounts
            .completed_rides(&winner_assignment.driver_email)
            .await
            .unwrap();
        assert_eq!(rider_history.len(), 1);
        assert_eq!(driver_history.len(), 1);
        assert_eq!(rider_history[0].ride_id, id);

        assert!(h.store.get(id).await.unwrap().is_none());
        assert_eq!(events.recv().await, Some(TrackingEvent::RideClosed));
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn pending_pool_feed_tracks_claims() {
        let h = harness().await;
        let mut pool = h.store.watch_pending().await.unwrap();
        assert!(pool.borrow().is_empty());

        let id = h
            .service
            .submit_request(&rider(), "29.64,-82.35", "Library West", None)
            .await
            .unwrap();
        pool.changed().await.unwrap();
        assert_eq!(pool.borrow_and_update().len(), 1);

        h.service
            .accept_request(id, &driver_session("driver-a", "a@ufl.edu"))
            .await
            .unwrap();
        pool.changed().await.unwrap();
        assert!(pool.borrow_and_update().is_empty());
    }
}
