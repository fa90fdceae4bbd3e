//! Short-range geographic offsets.
//!
//! Uses the equirectangular approximation: one degree of latitude is taken as
//! [`METERS_PER_DEGREE`] and longitude degrees shrink with `cos(latitude)`.
//! Error grows east-west at high latitude, which is acceptable over a
//! competition field and nothing larger.

use serde::{Deserialize, Serialize};

use crate::error::{MissionError, MissionResult};

/// Approximate meters per degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_111.0;

pub const METERS_PER_YARD: f64 = 0.9144;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Meters,
    Yards,
}

impl DistanceUnit {
    pub fn to_meters(self, value: f64) -> f64 {
        match self {
            DistanceUnit::Meters => value,
            DistanceUnit::Yards => value * METERS_PER_YARD,
        }
    }
}

/// Position in the global frame with altitude relative to home.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
    altitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> MissionResult<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(MissionError::InvalidCoordinate(format!(
                "non-finite position ({}, {})",
                latitude, longitude
            )));
        }
        if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
            return Err(MissionError::InvalidCoordinate(format!(
                "position out of range ({}, {})",
                latitude, longitude
            )));
        }
        if !altitude.is_finite() {
            return Err(MissionError::InvalidCoordinate(format!(
                "non-finite altitude {}",
                altitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
            altitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    /// Same horizontal position at a different altitude.
    pub fn with_altitude(&self, altitude: f64) -> MissionResult<Self> {
        Self::new(self.latitude, self.longitude, altitude)
    }

    /// Ground distance in meters, ignoring altitude.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let mean_lat = ((self.latitude + other.latitude) / 2.0).to_radians();
        let north = (other.latitude - self.latitude) * METERS_PER_DEGREE;
        let east = (other.longitude - self.longitude) * METERS_PER_DEGREE * mean_lat.cos();
        north.hypot(east)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.7}, {:.7}, {:.2}m)",
            self.latitude, self.longitude, self.altitude
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Pure north/south displacement.
    Latitude,
    /// Pure east/west displacement.
    Longitude,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    /// Degrees clockwise from true north.
    Bearing(f64),
    Axis(Axis),
}

impl Direction {
    /// Unit vector as (north, east).
    fn unit(self) -> (f64, f64) {
        match self {
            Direction::Bearing(degrees) => {
                let radians = degrees.to_radians();
                (radians.cos(), radians.sin())
            }
            Direction::Axis(Axis::Latitude) => (1.0, 0.0),
            Direction::Axis(Axis::Longitude) => (0.0, 1.0),
        }
    }

    fn is_finite(self) -> bool {
        match self {
            Direction::Bearing(degrees) => degrees.is_finite(),
            Direction::Axis(_) => true,
        }
    }
}

/// Moves `origin` by `distance` meters along `direction`.
///
/// Longitude wraps across the antimeridian and latitude stops at the poles.
pub fn offset(
    origin: &Coordinate,
    distance: f64,
    direction: Direction,
) -> MissionResult<Coordinate> {
    if !distance.is_finite() || !direction.is_finite() {
        return Err(MissionError::InvalidCoordinate(format!(
            "non-finite offset {} along {:?}",
            distance, direction
        )));
    }
    if distance == 0.0 {
        return Ok(*origin);
    }

    let (north, east) = direction.unit();
    let d_lat = distance * north / METERS_PER_DEGREE;
    let d_lon = distance * east / (METERS_PER_DEGREE * origin.latitude.to_radians().cos());

    let latitude = (origin.latitude + d_lat).clamp(-90.0, 90.0);
    let mut longitude = origin.longitude + d_lon;
    if longitude.abs() > 180.0 {
        longitude = (longitude + 180.0).rem_euclid(360.0) - 180.0;
    }
    Coordinate::new(latitude, longitude, origin.altitude)
}

/// [`offset`] with the distance given in `unit`.
pub fn offset_in(
    origin: &Coordinate,
    distance: f64,
    unit: DistanceUnit,
    direction: Direction,
) -> MissionResult<Coordinate> {
    offset(origin, unit.to_meters(distance), direction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Coordinate {
        Coordinate::new(29.7604, -95.3698, 2.0).unwrap()
    }

    #[test]
    fn test_zero_distance_returns_origin() {
        let zero = Coordinate::new(0.0, 0.0, 0.0).unwrap();
        for bearing in [0.0, 45.0, 123.4, 270.0, -90.0] {
            let moved = offset(&zero, 0.0, Direction::Bearing(bearing)).unwrap();
            assert_eq!(moved, zero);
        }
    }

    #[test]
    fn test_north_offset_moves_latitude_only() {
        let moved = offset(&origin(), 111_111.0, Direction::Bearing(0.0)).unwrap();
        assert!((moved.latitude() - (origin().latitude() + 1.0)).abs() < 1e-12);
        assert!((moved.longitude() - origin().longitude()).abs() < 1e-12);
        assert_eq!(moved.altitude(), 2.0);
    }

    #[test]
    fn test_east_offset_scales_with_latitude() {
        let moved = offset(&origin(), 100.0, Direction::Axis(Axis::Longitude)).unwrap();
        let expected =
            100.0 / (METERS_PER_DEGREE * origin().latitude().to_radians().cos());
        assert!((moved.longitude() - origin().longitude() - expected).abs() < 1e-12);
        assert_eq!(moved.latitude(), origin().latitude());
    }

    #[test]
    fn test_axis_matches_cardinal_bearing() {
        let by_axis = offset(&origin(), 42.0, Direction::Axis(Axis::Latitude)).unwrap();
        let by_bearing = offset(&origin(), 42.0, Direction::Bearing(0.0)).unwrap();
        assert!((by_axis.latitude() - by_bearing.latitude()).abs() < 1e-12);
        assert!((by_axis.longitude() - by_bearing.longitude()).abs() < 1e-12);
    }

    #[test]
    fn test_negative_distance_inverts() {
        let out = offset(&origin(), 30.0, Direction::Bearing(37.0)).unwrap();
        let back = offset(&out, -30.0, Direction::Bearing(37.0)).unwrap();
        assert!((back.latitude() - origin().latitude()).abs() < 1e-8);
        assert!((back.longitude() - origin().longitude()).abs() < 1e-8);
    }

    #[test]
    fn test_yards_convert_to_meters() {
        let yards = offset_in(&origin(), 30.1, DistanceUnit::Yards, Direction::Bearing(90.0))
            .unwrap();
        let meters = offset(&origin(), 30.1 * 0.9144, Direction::Bearing(90.0)).unwrap();
        assert_eq!(yards, meters);
        assert!((origin().distance_to(&yards) - 27.52344).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_non_finite_input() {
        assert!(matches!(
            Coordinate::new(f64::NAN, 0.0, 0.0),
            Err(MissionError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            Coordinate::new(0.0, f64::INFINITY, 0.0),
            Err(MissionError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            offset(&origin(), f64::NAN, Direction::Bearing(0.0)),
            Err(MissionError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn test_offset_wraps_across_antimeridian() {
        let east_edge = Coordinate::new(0.0, 179.9999, 0.0).unwrap();
        let moved = offset(&east_edge, 100.0, Direction::Axis(Axis::Longitude)).unwrap();
        assert!(moved.longitude() < -179.999, "{}", moved);
        assert!((moved.longitude() - (179.9999 + 100.0 / METERS_PER_DEGREE - 360.0)).abs() < 1e-9);

        let west_edge = Coordinate::new(10.0, -179.9999, 0.0).unwrap();
        let moved = offset(&west_edge, 100.0, Direction::Bearing(270.0)).unwrap();
        assert!(moved.longitude() > 179.999, "{}", moved);
        assert_eq!(moved.latitude(), 10.0);
    }

    #[test]
    fn test_offset_stops_at_pole() {
        let near_pole = Coordinate::new(89.9999, 20.0, 1.0).unwrap();
        let moved = offset(&near_pole, 1_000.0, Direction::Bearing(0.0)).unwrap();
        assert_eq!(moved.latitude(), 90.0);

        let polar = Coordinate::new(89.999_999_9, 0.0, 0.0).unwrap();
        let moved = offset(&polar, 50.0, Direction::Bearing(90.0)).unwrap();
        assert!(moved.longitude().abs() <= 180.0);
    }

    #[test]
    fn test_distance_to_is_symmetric() {
        let target = offset(&origin(), 250.0, Direction::Bearing(200.0)).unwrap();
        let there = origin().distance_to(&target);
        let back = target.distance_to(&origin());
        assert!((there - 250.0).abs() < 0.05);
        assert!((there - back).abs() < 1e-9);
    }
}
