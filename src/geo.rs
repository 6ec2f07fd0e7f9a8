//! Geographic primitives: coordinates, great-circle distance, circular fences

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Largest accepted geofence radius in meters
pub const MAX_RADIUS_M: f64 = 100_000.0;

/// A validated WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting non-finite or out-of-range values
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if latitude is outside [-90, 90] or
    /// longitude is outside [-180, 180]
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidInput(format!(
                "latitude must be between -90 and 90, got {latitude}"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidInput(format!(
                "longitude must be between -180 and 180, got {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to another coordinate in meters
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        haversine_distance_m(self, other)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// Haversine distance between two coordinates in meters
#[must_use]
pub fn haversine_distance_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards asin against rounding just above 1.0 for antipodal points
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A circular region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fence {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Fence {
    /// Create a fence, validating the radius
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the radius is not positive or exceeds
    /// [`MAX_RADIUS_M`]
    pub fn new(center: Coordinate, radius_m: f64) -> Result<Self> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "radius must be a positive number of meters, got {radius_m}"
            )));
        }
        if radius_m > MAX_RADIUS_M {
            return Err(Error::InvalidInput(format!(
                "radius must be at most {MAX_RADIUS_M} meters, got {radius_m}"
            )));
        }
        Ok(Self { center, radius_m })
    }

    /// Whether a point lies inside the fence; the boundary counts as inside
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// Change of fence membership between two positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Exit,
}

/// Membership change for one fence
///
/// Without a previous position, starting inside is an `Enter` and starting
/// outside is no transition.
#[must_use]
pub fn transition(
    fence: &Fence,
    previous: Option<&Coordinate>,
    current: &Coordinate,
) -> Option<Transition> {
    let was_inside = previous.is_some_and(|p| fence.contains(p));
    let is_inside = fence.contains(current);

    match (was_inside, is_inside) {
        (false, true) => Some(Transition::Enter),
        (true, false) => Some(Transition::Exit),
        _ => None,
    }
}

/// Membership changes across many fences, as `(index, transition)` pairs
pub fn transitions<'a, I>(
    fences: I,
    previous: Option<&Coordinate>,
    current: &Coordinate,
) -> Vec<(usize, Transition)>
where
    I: IntoIterator<Item = &'a Fence>,
{
    fences
        .into_iter()
        .enumerate()
        .filter_map(|(i, fence)| transition(fence, previous, current).map(|t| (i, t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(Coordinate::new(0.0, 0.0).is_ok());
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(90.1, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_distance_known_value() {
        // London to Paris is roughly 343.5 km
        let london = coord(51.5074, -0.1278);
        let paris = coord(48.8566, 2.3522);
        let d = london.distance_m(&paris);
        assert!((d - 343_500.0).abs() < 1_500.0, "got {d}");
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let a = coord(37.7749, -122.4194);
        let b = coord(34.0522, -118.2437);
        assert!((a.distance_m(&b) - b.distance_m(&a)).abs() < 1e-6);
        assert!(a.distance_m(&a).abs() < 1e-9);
    }

    #[test]
    fn test_distance_antipodal() {
        let d = coord(0.0, 0.0).distance_m(&coord(0.0, 180.0));
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!((d - half_circumference).abs() < 1.0);
    }

    #[test]
    fn test_fence_validation() {
        let center = coord(0.0, 0.0);
        assert!(Fence::new(center, 0.0).is_err());
        assert!(Fence::new(center, -5.0).is_err());
        assert!(Fence::new(center, f64::NAN).is_err());
        assert!(Fence::new(center, MAX_RADIUS_M + 1.0).is_err());
        assert!(Fence::new(center, 250.0).is_ok());
    }

    #[test]
    fn test_fence_contains_boundary() {
        let center = coord(10.0, 10.0);
        let edge = coord(10.001, 10.0);
        let radius = center.distance_m(&edge);

        let fence = Fence::new(center, radius).unwrap();
        assert!(fence.contains(&center));
        assert!(fence.contains(&edge));
        assert!(!fence.contains(&coord(10.002, 10.0)));
    }

    #[test]
    fn test_transition() {
        let fence = Fence::new(coord(0.0, 0.0), 500.0).unwrap();
        let inside = coord(0.001, 0.0);
        let outside = coord(0.1, 0.0);

        assert_eq!(transition(&fence, None, &inside), Some(Transition::Enter));
        assert_eq!(transition(&fence, None, &outside), None);
        assert_eq!(transition(&fence, Some(&inside), &inside), None);
        assert_eq!(transition(&fence, Some(&outside), &outside), None);
        assert_eq!(
            transition(&fence, Some(&outside), &inside),
            Some(Transition::Enter)
        );
        assert_eq!(
            transition(&fence, Some(&inside), &outside),
            Some(Transition::Exit)
        );
    }

    #[test]
    fn test_transitions_across_fences() {
        let home = Fence::new(coord(0.0, 0.0), 500.0).unwrap();
        let school = Fence::new(coord(0.05, 0.0), 500.0).unwrap();

        let at_home = coord(0.0, 0.0);
        let at_school = coord(0.05, 0.0);

        let changes = transitions([&home, &school], Some(&at_home), &at_school);
        assert_eq!(
            changes,
            vec![(0, Transition::Exit), (1, Transition::Enter)]
        );
    }
}
