//! # Campus-Pool Binary
//!
//! The entry point that assembles the ride service from compile-time
//! feature-selected plugins.

use actix_web::{web, App, HttpServer};
use cp_api::handlers::AppState;
use cp_core::rides::RideService;
use std::sync::Arc;

#[cfg(feature = "store-memory")]
use cp_store_memory::{MemoryAccounts, MemoryRideStore};

#[cfg(feature = "geo-google")]
use cp_geo_google::GoogleMapsClient;

#[cfg(feature = "notify-log")]
use cp_notify_log::LogNotifier;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 1. Ride request store and account directory
    #[cfg(feature = "store-memory")]
    let (repo, accounts) = (
        Arc::new(MemoryRideStore::new()),
        Arc::new(MemoryAccounts::new()),
    );

    // 2. Geocoding and directions
    #[cfg(feature = "geo-google")]
    let maps = Arc::new(GoogleMapsClient::new(
        std::env::var("GOOGLE_MAPS_API_KEY").unwrap_or_default(),
    ));

    // 3. Notification sink
    #[cfg(feature = "notify-log")]
    let notifier = Arc::new(LogNotifier::new());

    let service = Arc::new(
        RideService::new(repo, accounts, maps.clone(), notifier).with_directions(maps),
    );
    let state = web::Data::new(AppState { service });

    let bind = std::env::var("CAMPUS_POOL_BIND").unwrap_or_else(|_| "127.0.0.1:8080".into());
    log::info!("campus-pool listening on http://{bind}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cp_api::middleware::standard_middleware())
            .wrap(cp_api::middleware::cors_policy())
            .configure(cp_api::configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}
