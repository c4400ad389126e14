//! Great-circle helpers shared by the scorers and the analyzer.

use crate::error::ValidationError;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance between two points in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let a =
        (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `a` marginally past 1.0 for antipodal points
    let c = 2.0 * a.min(1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Latitude span of `km` along a meridian. No two points further apart in
/// latitude than this can be within `km` of each other.
pub fn latitude_span_deg(km: f64) -> f64 {
    (km / EARTH_RADIUS_KM).to_degrees()
}

/// Initial great-circle bearing from the first point to the second, in
/// degrees clockwise from north within [0, 360).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let y = dlon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * dlon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Absolute difference between two bearings, within [0, 180].
pub fn bearing_change_deg(from: f64, to: f64) -> f64 {
    let change = (to - from).rem_euclid(360.0);
    if change > 180.0 {
        360.0 - change
    } else {
        change
    }
}

/// Mean position of `points` on the sphere.
///
/// Points are averaged as unit vectors, so groups straddling the
/// antimeridian keep their centroid between their members. Returns `None`
/// for an empty input or when the vectors cancel out.
pub fn spherical_centroid<I>(points: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
    let mut n = 0usize;
    for (lat, lon) in points {
        let (lat, lon) = (lat.to_radians(), lon.to_radians());
        x += lat.cos() * lon.cos();
        y += lat.cos() * lon.sin();
        z += lat.sin();
        n += 1;
    }
    if n == 0 {
        return None;
    }

    let norm = (x * x + y * y + z * z).sqrt() / n as f64;
    if norm < 1e-12 {
        return None;
    }
    let latitude = z.atan2((x * x + y * y).sqrt()).to_degrees();
    let longitude = y.atan2(x).to_degrees();
    Some((latitude, longitude))
}

/// True for finite coordinates with |lat| <= 90 and |lon| <= 180.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && latitude.abs() <= 90.0
        && longitude.abs() <= 180.0
}

/// Validate a coordinate pair, reporting `index` on failure.
pub fn validate_coordinate(
    index: usize,
    latitude: f64,
    longitude: f64,
) -> Result<(), ValidationError> {
    if is_valid_coordinate(latitude, longitude) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCoordinates {
            index,
            latitude,
            longitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_paris_to_london() {
        let distance = haversine_km(48.8566, 2.3522, 51.5074, -0.1278);
        assert!((distance - 340.0).abs() < 20.0);
    }

    #[test]
    fn test_haversine_same_location() {
        assert!(haversine_km(20.30, 85.82, 20.30, 85.82) < 1e-9);
    }

    #[test]
    fn test_degree_of_latitude() {
        // 0.6 degrees of latitude is roughly 66.7 km
        let distance = haversine_km(20.30, 85.82, 20.90, 85.82);
        assert!((distance - 66.7).abs() < 0.5);
    }

    #[test]
    fn test_bearings() {
        assert!(initial_bearing_deg(20.0, 85.0, 20.1, 85.0).abs() < 1e-9);
        assert!((initial_bearing_deg(0.0, 85.0, 0.0, 85.1) - 90.0).abs() < 1e-9);
        assert!((initial_bearing_deg(20.1, 85.0, 20.0, 85.0) - 180.0).abs() < 1e-9);
        // Crossing the antimeridian eastwards
        assert!((initial_bearing_deg(0.0, 179.99, 0.0, -179.99) - 90.0).abs() < 1e-6);

        assert_eq!(bearing_change_deg(10.0, 350.0), 20.0);
        assert_eq!(bearing_change_deg(0.0, 180.0), 180.0);
        assert_eq!(bearing_change_deg(270.0, 90.0), 180.0);
    }

    #[test]
    fn test_centroid_across_antimeridian() {
        let (lat, lon) =
            spherical_centroid([(-17.0, 179.9999), (-17.0, -179.9999)]).unwrap();
        assert!((lat + 17.0).abs() < 1e-6);
        assert!(lon.abs() > 179.999);

        let (lat, lon) = spherical_centroid([(20.0, 85.0), (20.2, 85.2)]).unwrap();
        assert!((lat - 20.1).abs() < 1e-3);
        assert!((lon - 85.1).abs() < 1e-3);

        assert_eq!(spherical_centroid(std::iter::empty()), None);
        assert_eq!(spherical_centroid([(0.0, 0.0), (0.0, 180.0)]), None);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(is_valid_coordinate(90.0, -180.0));
        assert!(!is_valid_coordinate(90.1, 0.0));
        assert!(!is_valid_coordinate(0.0, 180.5));
        assert!(!is_valid_coordinate(f64::NAN, 0.0));
        assert_eq!(
            validate_coordinate(4, 91.0, 0.0),
            Err(ValidationError::InvalidCoordinates {
                index: 4,
                latitude: 91.0,
                longitude: 0.0
            })
        );
    }
}
