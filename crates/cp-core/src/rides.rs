//! # RideService
//!
//! The service facade over the collaborator ports: request submission,
//! matching (broadcast-claim), confirmations, cancellation, and the rating
//! and archival finalization. This is the whole produced interface of the
//! core; the API layer is a thin JSON mapping over it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::info;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Assignment, CancelActor, CompletedRide, Coordinate, RidePhase, RideRequest, RideStatus, Role,
    SessionUser,
};
use crate::publish::LocationPublisher;
use crate::tracking::{RideMonitor, TrackingEvent};
use crate::traits::{
    AccountDirectory, DirectionsProvider, Geocoder, NoticeKind, Notifier, RideRequestRepo,
};

pub struct RideService {
    repo: Arc<dyn RideRequestRepo>,
    accounts: Arc<dyn AccountDirectory>,
    geocoder: Arc<dyn Geocoder>,
    notifier: Arc<dyn Notifier>,
    /// Optional; only the route endpoint needs it.
    directions: Option<Arc<dyn DirectionsProvider>>,
    /// One debounced publisher per (ride, participant), created lazily on
    /// the first report and torn down with the ride.
    publishers: Mutex<HashMap<(Uuid, Role), LocationPublisher>>,
}

impl RideService {
    pub fn new(
        repo: Arc<dyn RideRequestRepo>,
        accounts: Arc<dyn AccountDirectory>,
        geocoder: Arc<dyn Geocoder>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repo,
            accounts,
            geocoder,
            notifier,
            directions: None,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_directions(mut self, directions: Arc<dyn DirectionsProvider>) -> Self {
        self.directions = Some(directions);
        self
    }

    /// Creates a new `pending` request for the rider.
    ///
    /// A rider holds at most one live request: checked here for a friendly
    /// error, and again inside the store's create guard for the race.
    pub async fn submit_request(
        &self,
        rider: &SessionUser,
        origin: &str,
        destination: &str,
        rider_location: Option<Coordinate>,
    ) -> Result<Uuid> {
        if origin.trim().is_empty() || destination.trim().is_empty() {
            let err = AppError::Validation("origin and destination are required".into());
            return Err(self.surface("Request Failed", err).await);
        }
        if let Some(existing) = self.repo.find_active_for_rider(&rider.uid).await? {
            let err = AppError::Validation(format!(
                "you already have an active ride request (status {})",
                existing.status()
            ));
            return Err(self.surface("Request Failed", err).await);
        }

        let request = RideRequest::new(rider, origin, destination, rider_location);
        let id = match self.repo.create(request).await {
            Ok(id) => id,
            Err(err) => return Err(self.surface("Request Failed", err).await),
        };
        info!("rider {} submitted ride request {id}", rider.uid);
        self.notifier
            .notify(
                NoticeKind::Success,
                "Ride Requested",
                "Your ride request is now visible to drivers.",
            )
            .await;
        Ok(id)
    }

    /// The broadcast pool every available driver sees.
    pub async fn list_available(&self) -> Result<Vec<RideRequest>> {
        self.repo.list_pending().await
    }

    pub async fn watch_available(&self) -> Result<watch::Receiver<Vec<RideRequest>>> {
        self.repo.watch_pending().await
    }

    /// First driver to claim a pending request wins; everyone else gets
    /// `AlreadyClaimed` and sees the request disappear from the pool.
    pub async fn accept_request(&self, id: Uuid, driver: &SessionUser) -> Result<RideRequest> {
        let profile = self
            .accounts
            .driver_profile(&driver.uid)
            .await?
            .ok_or_else(|| AppError::NotFound("driver profile", driver.uid.clone()))?;

        let assignment = Assignment {
            driver_id: driver.uid.clone(),
            driver_email: driver.email.clone(),
            profile: profile.snapshot(),
            location: None,
        };

        match self.repo.claim(id, assignment).await {
            Ok(request) => {
                info!("driver {} claimed ride request {id}", driver.uid);
                self.notifier
                    .notify(
                        NoticeKind::Success,
                        "Ride Accepted",
                        &format!("You are now driving {}.", request.rider_name),
                    )
                    .await;
                Ok(request)
            }
            Err(err @ AppError::AlreadyClaimed(_)) => {
                Err(self.surface("Request No Longer Available", err).await)
            }
            Err(err) => Err(self.surface("Accept Failed", err).await),
        }
    }

    /// Fire-and-forget, debounced position report. Failures downstream are
    /// logged and dropped by the publisher; the next report self-heals.
    pub fn report_location(&self, id: Uuid, role: Role, position: Coordinate) {
        let mut publishers = self.publishers.lock().unwrap();
        let publisher = publishers
            .entry((id, role))
            .or_insert_with(|| LocationPublisher::new(self.repo.clone(), id, role));
        publisher.offer(position);
    }

    /// Stops one participant's publisher, discarding any pending write.
    pub async fn stop_reporting(&self, id: Uuid, role: Role) {
        let publisher = self.publishers.lock().unwrap().remove(&(id, role));
        if let Some(publisher) = publisher {
            publisher.stop().await;
        }
    }

    /// Driver confirms the rider is on board: `accepted -> picked_up`.
    /// The proximity gate governs when the UI offers this; the status
    /// check here is the correctness boundary.
    pub async fn confirm_pickup(&self, id: Uuid) -> Result<RideRequest> {
        let request = self.get_request(id).await?;
        let next = match request.phase {
            RidePhase::Accepted { driver } => RidePhase::PickedUp {
                driver,
                picked_up_at: Utc::now(),
            },
            other => {
                let err = AppError::InvalidTransition {
                    from: other.status(),
                    to: RideStatus::PickedUp,
                };
                return Err(self.surface("Pickup Failed", err).await);
            }
        };
        match self.repo.update_phase(id, next).await {
            Ok(updated) => {
                self.notifier
                    .notify(
                        NoticeKind::Success,
                        "Pickup Confirmed",
                        "You have confirmed picking up the rider.",
                    )
                    .await;
                Ok(updated)
            }
            Err(err) => Err(self.surface("Pickup Failed", err).await),
        }
    }

    /// Driver confirms arrival: `picked_up -> drop_off_confirmed`. The
    /// rider's rating submission finishes the ride from here.
    pub async fn confirm_drop_off(&self, id: Uuid) -> Result<RideRequest> {
        let request = self.get_request(id).await?;
        let next = match request.phase {
            RidePhase::PickedUp {
                driver,
                picked_up_at,
            } => RidePhase::DropOffConfirmed {
                driver,
                picked_up_at,
                dropped_off_at: Utc::now(),
            },
            other => {
                let err = AppError::InvalidTransition {
                    from: other.status(),
                    to: RideStatus::DropOffConfirmed,
                };
                return Err(self.surface("Drop-off Failed", err).await);
            }
        };
        match self.repo.update_phase(id, next).await {
            Ok(updated) => {
                self.notifier
                    .notify(
                        NoticeKind::Success,
                        "Drop-off Confirmed",
                        "You have confirmed dropping off the rider.",
                    )
                    .await;
                Ok(updated)
            }
            Err(err) => Err(self.surface("Drop-off Failed", err).await),
        }
    }

    /// Rider cancellation deletes the request outright; driver
    /// cancellation resets it to `pending` so it re-enters the pool.
    pub async fn cancel(&self, id: Uuid, actor: CancelActor) -> Result<()> {
        let outcome = match actor {
            CancelActor::Rider => self.repo.delete(id).await,
            CancelActor::Driver => self.repo.reset_to_pending(id).await,
        };
        if let Err(err) = outcome {
            return Err(self.surface("Cancellation Failed", err).await);
        }

        self.stop_reporting(id, Role::Rider).await;
        self.stop_reporting(id, Role::Driver).await;

        match actor {
            CancelActor::Rider => {
                self.notifier
                    .notify(
                        NoticeKind::Success,
                        "Ride Request Cancelled",
                        "Your ride request has been cancelled.",
                    )
                    .await
            }
            CancelActor::Driver => {
                self.notifier
                    .notify(
                        NoticeKind::Success,
                        "Ride Cancelled",
                        "The request is available to other drivers again.",
                    )
                    .await
            }
        }
        Ok(())
    }

    /// Finalizes a dropped-off ride: fold the stars into the driver's
    /// running average (skipped entirely when the rider declines), archive
    /// the trip under both histories, then delete the live request.
    ///
    /// The live request is only deleted after both history writes land, so
    /// a partial failure leaves something to retry from; every failure is
    /// surfaced, never swallowed.
    pub async fn submit_rating(&self, id: Uuid, stars: Option<u8>) -> Result<CompletedRide> {
        if let Some(stars) = stars {
            if !(1..=5).contains(&stars) {
                let err = AppError::Validation(format!("rating must be 1-5 stars, got {stars}"));
                return Err(self.surface("Rating Failed", err).await);
            }
        }

        let request = self.get_request(id).await?;
        let assignment = match &request.phase {
            RidePhase::DropOffConfirmed { driver, .. } => driver.clone(),
            other => {
                let err = AppError::Validation(format!(
                    "ride is not awaiting a rating (status {})",
                    other.status()
                ));
                return Err(self.surface("Rating Failed", err).await);
            }
        };

        // 1. Rating average: read, compute, write back.
        let mut profile = self
            .accounts
            .driver_profile(&assignment.driver_id)
            .await?
            .ok_or_else(|| AppError::NotFound("driver profile", assignment.driver_id.clone()))?;
        if let Some(stars) = stars {
            profile.apply_rating(stars);
            if let Err(err) = self
                .accounts
                .update_driver_rating(&profile.uid, profile.rating, profile.rating_count)
                .await
            {
                return Err(self.surface("Rating Failed", err).await);
            }
        }

        // 2. Archive under both parties' histories.
        let record = CompletedRide::from_request(
            &request,
            assignment.profile.clone(),
            profile.rating,
            Utc::now(),
        );
        if let Err(err) = self
            .accounts
            .record_completed_ride(&request.rider_email, &record)
            .await
        {
            return Err(self.surface("Ride Archive Failed", err).await);
        }
        if let Err(err) = self
            .accounts
            .record_completed_ride(&assignment.driver_email, &record)
            .await
        {
            return Err(self.surface("Ride Archive Failed", err).await);
        }

        // 3. Remove the live request last.
        if let Err(err) = self.repo.delete(id).await {
            return Err(self.surface("Ride Archive Failed", err).await);
        }

        self.stop_reporting(id, Role::Rider).await;
        self.stop_reporting(id, Role::Driver).await;

        info!("ride {id} completed in {} min", record.ride_time);
        self.notifier
            .notify(
                NoticeKind::Success,
                "Ride Completed",
                "Thanks for riding; the trip was added to your history.",
            )
            .await;
        Ok(record)
    }

    /// Spawns a prompt monitor on the request's change feed. The returned
    /// receiver yields `TrackingEvent`s; dropping it ends the session.
    pub async fn monitor_ride(
        &self,
        id: Uuid,
    ) -> Result<(mpsc::Receiver<TrackingEvent>, JoinHandle<()>)> {
        let updates = self.repo.watch(id).await?;
        let monitor = RideMonitor::new(self.geocoder.clone(), self.notifier.clone());
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(monitor.run(updates, tx));
        Ok((rx, handle))
    }

    /// The active leg of the trip as an ordered point list: driver to rider
    /// while heading for pickup, driver to destination once underway.
    pub async fn ride_route(&self, id: Uuid) -> Result<Vec<Coordinate>> {
        let directions = self
            .directions
            .as_ref()
            .ok_or_else(|| AppError::Internal("no directions provider configured".into()))?
            .clone();

        let request = self.get_request(id).await?;
        let driver_position = request.driver_location().ok_or_else(|| {
            AppError::Validation("driver has not reported a position yet".into())
        })?;
        let target = match request.status() {
            RideStatus::Accepted => match request.rider_location {
                Some(position) => position,
                None => {
                    crate::geo::resolve_location(&request.origin, &*self.geocoder, &*self.notifier)
                        .await
                }
            },
            RideStatus::PickedUp => {
                crate::geo::resolve_location(&request.destination, &*self.geocoder, &*self.notifier)
                    .await
            }
            status => {
                return Err(AppError::Validation(format!(
                    "ride has no active leg to route (status {status})"
                )))
            }
        };
        directions.route(driver_position, target).await
    }

    /// Archived trips for one account, rider or driver side.
    pub async fn ride_history(&self, owner_email: &str) -> Result<Vec<CompletedRide>> {
        self.accounts.completed_rides(owner_email).await
    }

    pub async fn watch_request(&self, id: Uuid) -> Result<watch::Receiver<Option<RideRequest>>> {
        self.repo.watch(id).await
    }

    pub async fn get_request(&self, id: Uuid) -> Result<RideRequest> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound("ride request", id.to_string()))
    }

    async fn surface(&self, title: &str, err: AppError) -> AppError {
        self.notifier
            .notify(NoticeKind::Error, title, &err.to_string())
            .await;
        err
    }
}
