//! # cp-geo-google
//!
//! Google Maps web-service adapter: the Geocoding API behind the
//! `Geocoder` port and the Directions API behind `DirectionsProvider`.
//! Routes come back as an encoded overview polyline; decoding lives in
//! `cp_core::geo` so the wire format never leaks past this crate.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use cp_core::error::{AppError, Result};
use cp_core::geo::decode_polyline;
use cp_core::models::Coordinate;
use cp_core::traits::{DirectionsProvider, Geocoder};

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

pub struct GoogleMapsClient {
    http: reqwest::Client,
    api_key: String,
}

impl GoogleMapsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct Route {
    overview_polyline: OverviewPolyline,
}

#[derive(Deserialize)]
struct OverviewPolyline {
    points: String,
}

fn service_error(api: &str, status: &str, detail: Option<String>) -> AppError {
    match detail {
        Some(message) => AppError::Geocoding(format!("{api} returned {status}: {message}")),
        None => AppError::Geocoding(format!("{api} returned {status}")),
    }
}

#[async_trait]
impl Geocoder for GoogleMapsClient {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>> {
        let response = self
            .http
            .get(GEOCODE_URL)
            .query(&[("address", address), ("key", &self.api_key)])
            .send()
            .await
            .map_err(|e| AppError::Geocoding(e.to_string()))?;
        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Geocoding(e.to_string()))?;

        match body.status.as_str() {
            "OK" => {
                let location = body
                    .results
                    .first()
                    .map(|r| Coordinate {
                        latitude: r.geometry.location.lat,
                        longitude: r.geometry.location.lng,
                    });
                debug!("geocoded {address:?} -> {location:?}");
                Ok(location)
            }
            "ZERO_RESULTS" => Ok(None),
            status => Err(service_error("geocoding", status, body.error_message)),
        }
    }
}

#[async_trait]
impl DirectionsProvider for GoogleMapsClient {
    async fn route(&self, origin: Coordinate, destination: Coordinate) -> Result<Vec<Coordinate>> {
        let origin_param = format!("{},{}", origin.latitude, origin.longitude);
        let destination_param = format!("{},{}", destination.latitude, destination.longitude);
        let response = self
            .http
            .get(DIRECTIONS_URL)
            .query(&[
                ("origin", origin_param.as_str()),
                ("destination", destination_param.as_str()),
                ("key", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| AppError::Geocoding(e.to_string()))?;
        let body: DirectionsResponse = response
            .json()
            .await
            .map_err(|e| AppError::Geocoding(e.to_string()))?;

        if body.status != "OK" {
            return Err(service_error("directions", &body.status, body.error_message));
        }
        let route = body
            .routes
            .first()
            .ok_or_else(|| AppError::Geocoding("directions returned no routes".into()))?;
        Ok(decode_polyline(&route.overview_polyline.points))
    }
}
