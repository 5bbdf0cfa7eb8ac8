//! # cp-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the core
//! RideService. Bodies are JSON in, JSON out; the mobile clients render
//! their own UI from these responses.

use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use cp_core::error::AppError;
use cp_core::models::{CancelActor, Coordinate, Role, SessionUser};
use cp_core::rides::RideService;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub service: Arc<RideService>,
}

/// Wraps the core error so the HTTP mapping lives in this crate.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyClaimed(_) | AppError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::Geocoding(_) | AppError::Store(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.0.to_string() }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

#[derive(Deserialize)]
pub struct SubmitRideBody {
    pub rider: SessionUser,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub rider_location: Option<Coordinate>,
}

#[derive(Deserialize)]
pub struct AcceptBody {
    pub driver: SessionUser,
}

#[derive(Deserialize)]
pub struct LocationBody {
    pub role: Role,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
pub struct CancelBody {
    pub actor: CancelActor,
}

#[derive(Deserialize)]
pub struct RatingBody {
    #[serde(default)]
    pub stars: Option<u8>,
}

/// Rider opens a new request; responds with the generated id.
pub async fn submit_ride(data: web::Data<AppState>, body: web::Json<SubmitRideBody>) -> ApiResult {
    let body = body.into_inner();
    let id = data
        .service
        .submit_request(&body.rider, &body.origin, &body.destination, body.rider_location)
        .await?;
    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

/// The pending pool drivers poll from the home screen.
pub async fn available_rides(data: web::Data<AppState>) -> ApiResult {
    let rides = data.service.list_available().await?;
    Ok(HttpResponse::Ok().json(rides))
}

pub async fn get_ride(data: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let request = data.service.get_request(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request))
}

/// First claim wins; losers get a 409 and should refresh their pool.
pub async fn accept_ride(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<AcceptBody>,
) -> ApiResult {
    let request = data
        .service
        .accept_request(path.into_inner(), &body.driver)
        .await?;
    Ok(HttpResponse::Ok().json(request))
}

/// Position report. Always 202: the write is debounced and asynchronous,
/// so acceptance here only means the report was queued.
pub async fn report_location(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<LocationBody>,
) -> ApiResult {
    let position = Coordinate {
        latitude: body.latitude,
        longitude: body.longitude,
    };
    data.service
        .report_location(path.into_inner(), body.role, position);
    Ok(HttpResponse::Accepted().finish())
}

pub async fn confirm_pickup(data: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let request = data.service.confirm_pickup(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request))
}

pub async fn confirm_drop_off(data: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let request = data.service.confirm_drop_off(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request))
}

pub async fn cancel_ride(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CancelBody>,
) -> ApiResult {
    data.service.cancel(path.into_inner(), body.actor).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Finishes the ride: rating (optional), archival, deletion of the live
/// request. Responds with the archival record both parties will see in
/// their histories.
pub async fn rate_ride(
    data: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<RatingBody>,
) -> ApiResult {
    let record = data
        .service
        .submit_rating(path.into_inner(), body.stars)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

/// Active-leg route polyline for the tracking map.
pub async fn ride_route(data: web::Data<AppState>, path: web::Path<Uuid>) -> ApiResult {
    let points = data.service.ride_route(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(points))
}

/// Completed-trip history for one account (rider or driver side).
pub async fn ride_history(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult {
    let rides = data.service.ride_history(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rides))
}
