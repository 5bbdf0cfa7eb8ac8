//! # AppError
//!
//! Centralized error taxonomy for the Campus-Pool core.
//! Lifecycle failures must always reach the user via the notifier;
//! location-telemetry failures are logged and dropped.

use crate::models::RideStatus;
use thiserror::Error;

/// The primary error type for all cp-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or duplicate request (e.g., rider already has an active trip)
    #[error("validation error: {0}")]
    Validation(String),

    /// Lost the race to claim a pending request
    #[error("ride request {0} is no longer available")]
    AlreadyClaimed(String),

    /// Attempted a status change not permitted from the current state
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    /// Resource not found (e.g., ride request, driver profile)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, String),

    /// Downstream address resolution failed
    #[error("geocoding failed: {0}")]
    Geocoding(String),

    /// Backing store unavailable or rejected the operation
    #[error("store error: {0}")]
    Store(String),

    /// Everything else (a bug, not a user-recoverable condition)
    #[error("internal service error: {0}")]
    Internal(String),
}

/// A specialized Result type for Campus-Pool logic.
pub type Result<T> = std::result::Result<T, AppError>;
