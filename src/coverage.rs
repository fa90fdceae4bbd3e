//! Boustrophedon ("lawnmower") coverage over a rectangular field.
//!
//! Lanes are stacked northward from the start point, one `lateral_step`
//! apart, and each lane is sampled eastward every `sample_step`. Even lanes
//! sweep east, odd lanes sweep west, so every lane ends next to where the
//! following one begins.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MissionError, MissionResult};
use crate::geo::{offset, Axis, Coordinate, Direction, DistanceUnit, METERS_PER_DEGREE};

pub const DEFAULT_SAMPLE_STEP: f64 = 5.0;
pub const DEFAULT_MARGIN: f64 = 1.0;
/// Largest route [`plan`] will build.
pub const MAX_WAYPOINTS: usize = 100_000;

/// Field dimensions, all expressed in `unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub width: f64,
    pub length: f64,
    #[serde(default)]
    pub unit: DistanceUnit,
    pub lateral_step: f64,
    #[serde(default = "default_sample_step")]
    pub sample_step: f64,
    #[serde(default = "default_margin")]
    pub margin: f64,
}

fn default_sample_step() -> f64 {
    DEFAULT_SAMPLE_STEP
}

fn default_margin() -> f64 {
    DEFAULT_MARGIN
}

impl FieldSpec {
    pub fn new(width: f64, length: f64, unit: DistanceUnit, lateral_step: f64) -> Self {
        Self {
            width,
            length,
            unit,
            lateral_step,
            sample_step: DEFAULT_SAMPLE_STEP,
            margin: DEFAULT_MARGIN,
        }
    }

    pub fn with_sample_step(mut self, sample_step: f64) -> Self {
        self.sample_step = sample_step;
        self
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    pub fn validate(&self) -> MissionResult<()> {
        for (name, value) in [
            ("width", self.width),
            ("length", self.length),
            ("lateral_step", self.lateral_step),
            ("sample_step", self.sample_step),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(MissionError::InvalidFieldSpec(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(MissionError::InvalidFieldSpec(format!(
                "margin must be non-negative, got {}",
                self.margin
            )));
        }

        let lanes = (self.width / self.lateral_step).ceil();
        let samples = (self.length / self.sample_step).ceil();
        let fits = lanes <= MAX_WAYPOINTS as f64
            && samples <= MAX_WAYPOINTS as f64
            && (lanes as usize)
                .checked_mul(samples as usize)
                .is_some_and(|count| count + 2 <= MAX_WAYPOINTS);
        if !fits {
            return Err(MissionError::InvalidFieldSpec(format!(
                "{} lanes x {} samples exceeds {} waypoints",
                lanes, samples, MAX_WAYPOINTS
            )));
        }
        Ok(())
    }

    pub fn lane_count(&self) -> usize {
        (self.width / self.lateral_step).ceil() as usize
    }

    pub fn samples_per_lane(&self) -> usize {
        (self.length / self.sample_step).ceil() as usize
    }

    /// Total waypoints produced by [`plan`], approach and overrun included.
    pub fn waypoint_count(&self) -> usize {
        self.lane_count() * self.samples_per_lane() + 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    /// Lead-in before the first lane.
    Approach,
    Lane { lane: usize, sample: usize },
    /// Run-out past the last sample.
    Overrun,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Waypoint {
    pub index: usize,
    pub kind: WaypointKind,
    pub coordinate: Coordinate,
}

/// Lane sweep direction: even lanes forward (east), odd lanes reverse.
pub fn lane_is_forward(lane: usize) -> bool {
    lane % 2 == 0
}

pub fn plan(field: &FieldSpec, start: &Coordinate) -> MissionResult<Vec<Waypoint>> {
    field.validate()?;

    let lateral_step = field.unit.to_meters(field.lateral_step);
    let sample_step = field.unit.to_meters(field.sample_step);
    let margin = field.unit.to_meters(field.margin);
    let lanes = field.lane_count();
    let samples = field.samples_per_lane();
    let lon_scale = METERS_PER_DEGREE * start.latitude().to_radians().cos();

    let mut route = Vec::with_capacity(field.waypoint_count());

    let approach = offset(start, -margin, Direction::Axis(Axis::Longitude))?;
    route.push(Waypoint {
        index: 0,
        kind: WaypointKind::Approach,
        coordinate: approach,
    });

    for lane in 0..lanes {
        let x = lane as f64 * lateral_step;
        let latitude = start.latitude() + x / METERS_PER_DEGREE;
        for sample in 0..samples {
            // Odd lanes visit the same sample columns, mirrored.
            let column = if lane_is_forward(lane) {
                sample
            } else {
                samples - 1 - sample
            };
            let y = column as f64 * sample_step;
            let coordinate = Coordinate::new(
                latitude,
                start.longitude() + y / lon_scale,
                start.altitude(),
            )?;
            route.push(Waypoint {
                index: route.len(),
                kind: WaypointKind::Lane { lane, sample },
                coordinate,
            });
        }
    }

    // lanes and samples are both >= 1 after validation
    let last = route[route.len() - 1].coordinate;
    let run_out = if lane_is_forward(lanes - 1) {
        margin
    } else {
        -margin
    };
    route.push(Waypoint {
        index: route.len(),
        kind: WaypointKind::Overrun,
        coordinate: offset(&last, run_out, Direction::Axis(Axis::Longitude))?,
    });

    debug!(
        "Planned {} waypoints over {} lanes x {} samples",
        route.len(),
        lanes,
        samples
    );
    Ok(route)
}

/// Ground length of the route in meters.
pub fn path_length(route: &[Waypoint]) -> f64 {
    route
        .windows(2)
        .map(|pair| pair[0].coordinate.distance_to(&pair[1].coordinate))
        .sum()
}
