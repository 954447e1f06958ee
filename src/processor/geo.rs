/// Mean earth radius (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Great-circle distance in meters between two WGS84 coordinates in degrees.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Latitude reached by moving `meters` due north from `lat`.
#[cfg(test)]
pub fn offset_north(lat: f64, meters: f64) -> f64 {
    lat + (meters / EARTH_RADIUS_METERS).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_meters(14.5995, 120.9842, 14.5995, 120.9842), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_meters(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.08).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_longitude_shrinks_with_latitude() {
        let at_equator = haversine_meters(0.0, 0.0, 0.0, 1.0);
        let at_sixty = haversine_meters(60.0, 0.0, 60.0, 1.0);
        assert!((at_sixty / at_equator - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_offset_north_round_trips_distance() {
        let lat = offset_north(14.5995, 99.0);
        let d = haversine_meters(14.5995, 120.9842, lat, 120.9842);
        assert!((d - 99.0).abs() < 1e-6, "got {}", d);
    }
}
