//! # cp-api
//!
//! The web routing and orchestration layer for Campus-Pool.

pub mod handlers;
pub mod middleware;

use actix_web::web;

/// Configures the ride routes.
///
/// Scoped so the main binary can mount the API under a different prefix
/// (e.g. /api/v1/) without touching this crate.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/rides", web::post().to(handlers::submit_ride))
            .route("/rides/available", web::get().to(handlers::available_rides))
            .route("/rides/{id}", web::get().to(handlers::get_ride))
            .route("/rides/{id}/accept", web::post().to(handlers::accept_ride))
            .route(
                "/rides/{id}/location",
                web::post().to(handlers::report_location),
            )
            .route("/rides/{id}/pickup", web::post().to(handlers::confirm_pickup))
            .route(
                "/rides/{id}/dropoff",
                web::post().to(handlers::confirm_drop_off),
            )
            .route("/rides/{id}/cancel", web::post().to(handlers::cancel_ride))
            .route("/rides/{id}/rating", web::post().to(handlers::rate_ride))
            .route("/rides/{id}/route", web::get().to(handlers::ride_route))
            .route("/history/{email}", web::get().to(handlers::ride_history)),
    );
}
