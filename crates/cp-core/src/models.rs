//! # Domain Models
//!
//! These structs represent the core entities of the Campus-Pool ride flow.
//! The wire shape (snake_case status tags, flat request document) matches the
//! document schema the mobile clients already read and write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A WGS-84 position. No altitude; the campus is flat enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Lifecycle states of a live ride request.
///
/// Completed and cancelled rides have no status of their own: completion
/// moves the record into the parties' histories and cancellation deletes or
/// resets it, so a live document is always in one of these four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    PickedUp,
    DropOffConfirmed,
}

impl RideStatus {
    /// The forward transition table. Driver cancellation (reset to pending)
    /// and rider cancellation (delete) are separate repo operations, not
    /// status updates, and are deliberately absent here.
    pub fn can_transition_to(self, next: RideStatus) -> bool {
        matches!(
            (self, next),
            (RideStatus::Pending, RideStatus::Accepted)
                | (RideStatus::Accepted, RideStatus::PickedUp)
                | (RideStatus::PickedUp, RideStatus::DropOffConfirmed)
        )
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::PickedUp => "picked_up",
            RideStatus::DropOffConfirmed => "drop_off_confirmed",
        };
        f.write_str(tag)
    }
}

/// Which participant a location report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
}

impl Role {
    /// Document field the report overwrites.
    pub fn location_field(self) -> &'static str {
        match self {
            Role::Rider => "rider_location",
            Role::Driver => "driver_location",
        }
    }
}

/// Who is cancelling a ride. Rider cancellation deletes the request;
/// driver cancellation resets it to the available pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Rider,
    Driver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelGrade {
    Regular,
    Premium,
}

impl FuelGrade {
    /// Per-gallon price assumption used by the fare estimate.
    pub fn price_per_gallon(self) -> f64 {
        match self {
            FuelGrade::Regular => 3.16,
            FuelGrade::Premium => 3.87,
        }
    }
}

/// Denormalized driver/vehicle copy embedded into a request at claim time.
/// A snapshot, not a live reference: later profile edits must not rewrite
/// rides that are already underway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSnapshot {
    pub driver_id: String,
    pub first_name: String,
    pub last_name: String,
    pub car_image_url: Option<String>,
    pub car_seats: u8,
    pub fuel: FuelGrade,
    pub mpg: f64,
    pub rating: f64,
}

/// Everything that exists about the driver side of a claimed request.
///
/// Grouping these under one struct means driver fields cannot drift out of
/// sync with the status tag: resetting a ride to pending drops the whole
/// assignment, location included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub driver_id: String,
    pub driver_email: String,
    pub profile: DriverSnapshot,
    pub location: Option<Coordinate>,
}

/// Status-discriminated portion of a ride request. Each state carries
/// exactly the fields that are valid in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RidePhase {
    Pending,
    Accepted {
        driver: Assignment,
    },
    PickedUp {
        driver: Assignment,
        picked_up_at: DateTime<Utc>,
    },
    DropOffConfirmed {
        driver: Assignment,
        picked_up_at: DateTime<Utc>,
        dropped_off_at: DateTime<Utc>,
    },
}

impl RidePhase {
    pub fn status(&self) -> RideStatus {
        match self {
            RidePhase::Pending => RideStatus::Pending,
            RidePhase::Accepted { .. } => RideStatus::Accepted,
            RidePhase::PickedUp { .. } => RideStatus::PickedUp,
            RidePhase::DropOffConfirmed { .. } => RideStatus::DropOffConfirmed,
        }
    }

    pub fn assignment(&self) -> Option<&Assignment> {
        match self {
            RidePhase::Pending => None,
            RidePhase::Accepted { driver }
            | RidePhase::PickedUp { driver, .. }
            | RidePhase::DropOffConfirmed { driver, .. } => Some(driver),
        }
    }

    pub fn assignment_mut(&mut self) -> Option<&mut Assignment> {
        match self {
            RidePhase::Pending => None,
            RidePhase::Accepted { driver }
            | RidePhase::PickedUp { driver, .. }
            | RidePhase::DropOffConfirmed { driver, .. } => Some(driver),
        }
    }
}

/// The central mutable entity: one live document per active trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub rider_id: String,
    pub rider_name: String,
    pub rider_email: String,
    /// Raw `"lat,lon"` string or a free-text address needing geocoding.
    pub origin: String,
    /// Same encoding as `origin`.
    pub destination: String,
    /// Last reported rider position; overrides `origin` when present.
    pub rider_location: Option<Coordinate>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub phase: RidePhase,
}

impl RideRequest {
    pub fn new(
        rider: &SessionUser,
        origin: impl Into<String>,
        destination: impl Into<String>,
        rider_location: Option<Coordinate>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id: rider.uid.clone(),
            rider_name: rider.name.clone(),
            rider_email: rider.email.clone(),
            origin: origin.into(),
            destination: destination.into(),
            rider_location,
            created_at: Utc::now(),
            phase: RidePhase::Pending,
        }
    }

    pub fn status(&self) -> RideStatus {
        self.phase.status()
    }

    pub fn driver(&self) -> Option<&Assignment> {
        self.phase.assignment()
    }

    pub fn driver_location(&self) -> Option<Coordinate> {
        self.driver().and_then(|d| d.location)
    }
}

/// The identity object threaded through every core call. There is no
/// ambient "current user"; callers always say who is acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub driver: bool,
}

/// External account record for a registered driver. Owned by the account
/// collaborator; this core only reads it and updates the rating average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub uid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub car_image_url: Option<String>,
    pub car_seats: u8,
    pub fuel: FuelGrade,
    pub mpg: f64,
    /// Running average, kept to two decimals.
    pub rating: f64,
    pub rating_count: u32,
}

impl DriverProfile {
    pub fn snapshot(&self) -> DriverSnapshot {
        DriverSnapshot {
            driver_id: self.uid.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            car_image_url: self.car_image_url.clone(),
            car_seats: self.car_seats,
            fuel: self.fuel,
            mpg: self.mpg,
            rating: self.rating,
        }
    }

    /// Folds one 1-5 star submission into the running average:
    /// `(old * count + stars) / (count + 1)`, rounded to two decimals.
    pub fn apply_rating(&mut self, stars: u8) {
        let total = self.rating * f64::from(self.rating_count) + f64::from(stars);
        self.rating_count += 1;
        self.rating = (total / f64::from(self.rating_count) * 100.0).round() / 100.0;
    }
}

/// Average highway speed assumed when estimating trip distance from elapsed
/// time. Inherited from the ride-card fare math.
pub const ASSUMED_SPEED_MPH: f64 = 55.0;

/// Immutable archival copy of a finished trip. Written once under the
/// rider's history and once under the driver's; the two copies age
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRide {
    pub ride_id: Uuid,
    pub rider_id: String,
    pub rider_name: String,
    pub rider_email: String,
    pub origin: String,
    pub destination: String,
    pub driver: DriverSnapshot,
    /// Elapsed minutes between request creation and completion.
    pub ride_time: i64,
    pub distance_miles: f64,
    pub fuel_cost_per_mile: f64,
    pub total_fare: f64,
    /// Driver's rating average as of completion, rider's submission included.
    pub driver_rating: f64,
    pub completed_at: DateTime<Utc>,
}

impl CompletedRide {
    /// Builds the archival record. Callers pass the driver's rating as it
    /// stands after folding in the rider's submission (if any).
    pub fn from_request(
        request: &RideRequest,
        driver: DriverSnapshot,
        driver_rating: f64,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let ride_time = (completed_at - request.created_at).num_minutes().max(0);
        let distance_miles = ride_time as f64 / 60.0 * ASSUMED_SPEED_MPH;
        let fuel_cost_per_mile = driver.fuel.price_per_gallon() / driver.mpg;
        Self {
            ride_id: request.id,
            rider_id: request.rider_id.clone(),
            rider_name: request.rider_name.clone(),
            rider_email: request.rider_email.clone(),
            origin: request.origin.clone(),
            destination: request.destination.clone(),
            ride_time,
            distance_miles,
            fuel_cost_per_mile,
            total_fare: distance_miles * fuel_cost_per_mile,
            driver_rating,
            driver,
            completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rider() -> SessionUser {
        SessionUser {
            uid: "rider-1".into(),
            name: "Sam Rider".into(),
            email: "sam@ufl.edu".into(),
            driver: false,
        }
    }

    fn snapshot() -> DriverSnapshot {
        DriverSnapshot {
            driver_id: "driver-1".into(),
            first_name: "Dana".into(),
            last_name: "Driver".into(),
            car_image_url: None,
            car_seats: 4,
            fuel: FuelGrade::Regular,
            mpg: 25.0,
            rating: 4.5,
        }
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use RideStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Accepted.can_transition_to(PickedUp));
        assert!(PickedUp.can_transition_to(DropOffConfirmed));

        assert!(!Pending.can_transition_to(PickedUp));
        assert!(!Accepted.can_transition_to(DropOffConfirmed));
        assert!(!DropOffConfirmed.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Accepted));
    }

    #[test]
    fn status_tags_keep_wire_compatibility() {
        let mut request = RideRequest::new(&rider(), "29.64,-82.35", "Library West", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("driver").is_none());

        request.phase = RidePhase::Accepted {
            driver: Assignment {
                driver_id: "driver-1".into(),
                driver_email: "dana@ufl.edu".into(),
                profile: snapshot(),
                location: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["driver"]["driver_email"], "dana@ufl.edu");

        let back: RideRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.status(), RideStatus::Accepted);
    }

    #[test]
    fn rating_average_is_weighted_and_rounded() {
        let mut profile = DriverProfile {
            uid: "driver-1".into(),
            email: "dana@ufl.edu".into(),
            first_name: "Dana".into(),
            last_name: "Driver".into(),
            car_image_url: None,
            car_seats: 4,
            fuel: FuelGrade::Premium,
            mpg: 30.0,
            rating: 4.0,
            rating_count: 2,
        };
        profile.apply_rating(5);
        assert_eq!(profile.rating, 4.33);
        assert_eq!(profile.rating_count, 3);
    }

    #[test]
    fn completed_ride_fare_math() {
        let mut request = RideRequest::new(&rider(), "29.64,-82.35", "Library West", None);
        let completed_at = request.created_at + Duration::minutes(30);
        request.phase = RidePhase::DropOffConfirmed {
            driver: Assignment {
                driver_id: "driver-1".into(),
                driver_email: "dana@ufl.edu".into(),
                profile: snapshot(),
                location: None,
            },
            picked_up_at: request.created_at + Duration::minutes(5),
            dropped_off_at: completed_at,
        };

        let record = CompletedRide::from_request(&request, snapshot(), 4.6, completed_at);
        assert_eq!(record.ride_time, 30);
        // 30 minutes at 55 mph -> 27.5 miles; regular gas at 25 mpg.
        assert!((record.distance_miles - 27.5).abs() < 1e-9);
        assert!((record.fuel_cost_per_mile - 3.16 / 25.0).abs() < 1e-9);
        assert!((record.total_fare - 27.5 * 3.16 / 25.0).abs() < 1e-9);
        assert_eq!(record.driver_rating, 4.6);
    }
}
