//! # cp-api Middleware
//!
//! Request logging and CORS for the ride API.

use actix_cors::Cors;
use actix_web::middleware::Logger;

// Standard access log:
// remote-ip "request-line" status-code response-size "referrer" "user-agent"
pub fn standard_middleware() -> Logger {
    Logger::default()
}

// The mobile clients are served from a different origin than the API, so
// CORS stays permissive on methods the routes actually use.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST"])
        .allow_any_header()
        .max_age(3600)
}
