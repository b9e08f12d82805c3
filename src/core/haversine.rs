// Great-circle distance between two (longitude, latitude) points in degrees.
use crate::core::decode::CoordinatePair;

/// Reference sphere radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6372.8;

const DEGREES_TO_RADIANS: f64 = 0.017453292519943295;

#[inline]
pub fn to_radians(degrees: f64) -> f64 {
    degrees * DEGREES_TO_RADIANS
}

#[inline]
fn square(x: f64) -> f64 {
    x * x
}

/// Haversine distance in the unit of `radius`. Degrees are not range-reduced.
pub fn distance(x0: f64, y0: f64, x1: f64, y1: f64, radius: f64) -> f64 {
    let d_lat = to_radians(y1 - y0);
    let d_lon = to_radians(x1 - x0);
    let lat0 = to_radians(y0);
    let lat1 = to_radians(y1);

    let a = square((d_lat / 2.0).sin()) + lat0.cos() * lat1.cos() * square((d_lon / 2.0).sin());
    2.0 * radius * a.sqrt().asin()
}

pub fn pair_distance(pair: &CoordinatePair, radius: f64) -> f64 {
    distance(pair.x0, pair.y0, pair.x1, pair.y1, radius)
}
