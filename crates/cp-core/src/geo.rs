//! # Geospatial Utilities
//!
//! Great-circle distance, `"lat,lon"` parsing with geocoder fallback, and
//! the Google encoded-polyline codec (5-bit chunks, zig-zag signs, 1e5
//! scale) used when a richer directions payload is unavailable.

use log::warn;

use crate::models::Coordinate;
use crate::traits::{Geocoder, NoticeKind, Notifier};

/// Mean earth radius in meters, matching the tracking screens' inline math.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Campus-area default used when every way of resolving an address fails.
/// Masks the failure on purpose; `resolve_location` warns before using it.
pub const CAMPUS_FALLBACK: Coordinate = Coordinate {
    latitude: 29.6516,
    longitude: -82.3248,
};

/// Great-circle distance between two positions, in meters.
pub fn haversine_distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Parses a syntactic `"<float>,<float>"` pair. Anything else (an address,
/// an empty string) is `None` and needs the geocoder.
pub fn parse_latlon(input: &str) -> Option<Coordinate> {
    let mut parts = input.split(',');
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() || !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    Some(Coordinate {
        latitude: lat,
        longitude: lon,
    })
}

/// Resolves a location string: direct parse, else geocoding, else the
/// campus fallback. The fallback path never fails the caller but is
/// surfaced through the notifier so a wrong-destination trip is at least
/// visible to the user.
pub async fn resolve_location(
    input: &str,
    geocoder: &dyn Geocoder,
    notifier: &dyn Notifier,
) -> Coordinate {
    if let Some(position) = parse_latlon(input) {
        return position;
    }
    match geocoder.geocode(input).await {
        Ok(Some(position)) => position,
        Ok(None) => {
            warn!("geocoder returned no results for {input:?}; using campus fallback");
            notifier
                .notify(
                    NoticeKind::Error,
                    "Invalid Address",
                    "Could not locate that address; using the campus area instead.",
                )
                .await;
            CAMPUS_FALLBACK
        }
        Err(err) => {
            warn!("geocoding {input:?} failed: {err}; using campus fallback");
            notifier
                .notify(
                    NoticeKind::Error,
                    "Invalid Address",
                    "Address lookup failed; using the campus area instead.",
                )
                .await;
            CAMPUS_FALLBACK
        }
    }
}

/// Decodes a Google-encoded polyline into coordinate pairs.
pub fn decode_polyline(encoded: &str) -> Vec<Coordinate> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::new();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lon: i64 = 0;

    while index < bytes.len() {
        lat += next_delta(bytes, &mut index);
        lon += next_delta(bytes, &mut index);
        points.push(Coordinate {
            latitude: lat as f64 / 1e5,
            longitude: lon as f64 / 1e5,
        });
    }
    points
}

/// Encodes coordinate pairs with the same algorithm. Companion to
/// `decode_polyline`; handy for fixtures and provider stubs.
pub fn encode_polyline(points: &[Coordinate]) -> String {
    let mut encoded = String::new();
    let mut prev_lat: i64 = 0;
    let mut prev_lon: i64 = 0;

    for point in points {
        let lat = (point.latitude * 1e5).round() as i64;
        let lon = (point.longitude * 1e5).round() as i64;
        push_delta(&mut encoded, lat - prev_lat);
        push_delta(&mut encoded, lon - prev_lon);
        prev_lat = lat;
        prev_lon = lon;
    }
    encoded
}

/// Reads one signed varint delta: 5-bit chunks, low bits first, continuation
/// flagged by 0x20, zig-zag sign in the lowest bit.
fn next_delta(bytes: &[u8], index: &mut usize) -> i64 {
    let mut shift = 0;
    let mut result: i64 = 0;
    while *index < bytes.len() {
        let b = i64::from(bytes[*index]) - 63;
        *index += 1;
        result |= (b & 0x1f) << shift;
        shift += 5;
        if b < 0x20 {
            break;
        }
    }
    if result & 1 == 1 {
        !(result >> 1)
    } else {
        result >> 1
    }
}

fn push_delta(out: &mut String, delta: i64) {
    let mut value = delta << 1;
    if delta < 0 {
        value = !value;
    }
    while value >= 0x20 {
        out.push((((0x20 | (value & 0x1f)) + 63) as u8) as char);
        value >>= 5;
    }
    out.push(((value + 63) as u8) as char);
}
