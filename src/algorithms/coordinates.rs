//! Conversions between GPS coordinates and the local East-North-Up tangent plane
//!
//! All conversions use the flat-earth approximation used throughout the game:
//! one degree of latitude is 111 km and one degree of longitude is 111 km scaled by
//! the cosine of the origin latitude. Play areas are a few hundred meters across, so
//! the error is far below GPS noise.
//!
//! Axis convention, shared by every module in the crate:
//! - bearing 0° is north, 90° is east, measured clockwise
//! - AR space +X is east, +Z is north, +Y is up
//!
//! [`bearing_to_ar_axes`] and [`ar_axes_to_bearing`] are the only place this mapping
//! is written down. Everything else goes through them.

use crate::core::{AnchorOffset, GeoPoint, METERS_PER_DEGREE, MIN_COS_LATITUDE};

/// Mean earth radius for great-circle distances
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of longitude at the given latitude
pub fn meters_per_degree_longitude(latitude: f64) -> f64 {
    METERS_PER_DEGREE * latitude.to_radians().cos().max(MIN_COS_LATITUDE)
}

/// Map a ground distance and compass bearing to AR (x, z)
pub fn bearing_to_ar_axes(distance_m: f64, bearing_deg: f64) -> (f64, f64) {
    let bearing = bearing_deg.to_radians();
    (distance_m * bearing.sin(), distance_m * bearing.cos())
}

/// Map AR (x, z) to a ground distance and compass bearing in [0, 360)
pub fn ar_axes_to_bearing(x: f64, z: f64) -> (f64, f64) {
    let distance = x.hypot(z);
    if distance == 0.0 {
        return (0.0, 0.0);
    }
    (distance, normalize_bearing(x.atan2(z).to_degrees()))
}

/// Wrap any angle into [0, 360)
pub fn normalize_bearing(bearing_deg: f64) -> f64 {
    let wrapped = bearing_deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Ground distance (meters) and bearing (degrees clockwise from north) between two points
pub fn distance_and_bearing(from: &GeoPoint, to: &GeoPoint) -> (f64, f64) {
    let offset = offset_from_origin(from, to);
    ar_axes_to_bearing(offset.x, offset.z)
}

/// ENU offset of `target` relative to `origin`. Y is always 0.
pub fn offset_from_origin(origin: &GeoPoint, target: &GeoPoint) -> AnchorOffset {
    offset_from_origin_with_height(origin, target, 0.0)
}

/// ENU offset of `target` relative to `origin` with an explicit height
pub fn offset_from_origin_with_height(origin: &GeoPoint, target: &GeoPoint, y: f64) -> AnchorOffset {
    let north = (target.latitude - origin.latitude) * METERS_PER_DEGREE;
    let east = wrap_longitude_delta(target.longitude - origin.longitude)
        * meters_per_degree_longitude(origin.latitude);
    AnchorOffset::new(east, y, north)
}

/// Project the point at `offset` from `origin`. The vertical component is ignored.
pub fn point_from_offset(origin: &GeoPoint, offset: &AnchorOffset) -> GeoPoint {
    let (distance, bearing) = ar_axes_to_bearing(offset.x, offset.z);
    let (east, north) = bearing_to_ar_axes(distance, bearing);

    let latitude = origin.latitude + north / METERS_PER_DEGREE;
    let longitude = origin.longitude + east / meters_per_degree_longitude(origin.latitude);

    GeoPoint {
        latitude: latitude.clamp(-90.0, 90.0),
        longitude: wrap_longitude(longitude),
    }
}

/// Great-circle distance in meters.
///
/// Used to sanity-check long baselines where the flat-earth error is no longer negligible.
pub fn haversine_distance(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = wrap_longitude_delta(to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Bring a longitude back into [-180, 180]
fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        longitude
    } else {
        (longitude + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Shortest signed longitude difference, so offsets across the antimeridian stay small
fn wrap_longitude_delta(delta: f64) -> f64 {
    if delta > 180.0 {
        delta - 360.0
    } else if delta < -180.0 {
        delta + 360.0
    } else {
        delta
    }
}
