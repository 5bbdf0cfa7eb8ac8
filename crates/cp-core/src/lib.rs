//! cp-core
//!
//! The central domain logic and interface definitions for Campus-Pool:
//! ride-request lifecycle, matching, live tracking, and the collaborator
//! ports the plugins implement.

pub mod error;
pub mod geo;
pub mod models;
pub mod publish;
pub mod rides;
pub mod tracking;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use rides::RideService;
pub use traits::*;
