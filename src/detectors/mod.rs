//! Pure detector functions over a fleet snapshot: ghost buses, bunching
//! pairs, and route-level crowding aggregation. None of these touch the
//! store directly — callers fetch vehicles once and pass them in, which
//! keeps the detectors trivially testable.

pub mod bunching;
pub mod ghost;

use chrono::{DateTime, Utc};

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6_371_000.0;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    R * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Parses an RFC3339 timestamp, falling back to `now` (treated as fresh)
/// when the feed sent something unparseable.
pub fn parse_timestamp_or_now(ts: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).map(|dt| dt.with_timezone(&Utc)).unwrap_or(now)
}
