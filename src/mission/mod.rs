//! Mission state machine and the types it is configured with.

mod executor;
pub mod poll;


use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coverage::FieldSpec;
use crate::geo::DistanceUnit;
use crate::soak::SoakLogger;
use crate::vehicle::{VehicleKind, VehicleLink};

pub use self::executor::MissionExecutor;
pub use self::poll::{poll_until, CancelHandle, CancelToken, PollOptions, Ready};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissionState {
    Idle,
    Precheck,
    Armed,
    EnRoute,
    Arrived,
    /// Landing for copters, stopping for rovers.
    Landing,
    Done,
    Failed,
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What counts as having reached the end of the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalPolicy {
    /// Every target issued and, for straight lines, the nominal-speed ETA
    /// elapsed. Nothing is measured.
    #[default]
    TimeBased,
    /// The reported position is within `arrival_radius` of the last target.
    PositionConfirmed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Route {
    /// Take off, hover and land in place.
    Hold,
    /// One target `distance` away from the start along `bearing`.
    StraightLine {
        distance: f64,
        #[serde(default)]
        unit: DistanceUnit,
        /// Degrees clockwise from north.
        #[serde(default)]
        bearing: f64,
    },
    Coverage(FieldSpec),
}

impl Route {
    pub fn name(&self) -> &'static str {
        match self {
            Route::Hold => "hold",
            Route::StraightLine { .. } => "straight_line",
            Route::Coverage(_) => "coverage",
        }
    }
}

/// Timing and behaviour knobs for one run. Timeouts of `None` wait forever.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionSettings {
    /// Takeoff altitude for copters, meters above home.
    pub target_altitude: f64,
    pub poll_interval: Duration,
    pub ready_timeout: Option<Duration>,
    pub arm_timeout: Option<Duration>,
    pub ascent_timeout: Option<Duration>,
    pub arrival_timeout: Option<Duration>,
    pub landing_timeout: Option<Duration>,
    /// Pause after each navigation command.
    pub dwell: Duration,
    /// Hold time once arrived.
    pub hover: Duration,
    pub arrival: ArrivalPolicy,
    /// Assumed ground speed for progress and time-based arrival, m/s.
    pub nominal_speed: f64,
    pub arrival_radius: f64,
    /// Copters: wait for the autopilot to report STANDBY after landing.
    pub wait_for_standby: bool,
    /// Soak record written on arrival when set.
    pub soak_marker: Option<String>,
    pub soak_action: String,
}

impl Default for MissionSettings {
    fn default() -> Self {
        Self {
            target_altitude: 2.0,
            poll_interval: Duration::from_secs(1),
            ready_timeout: Some(Duration::from_secs(120)),
            arm_timeout: Some(Duration::from_secs(30)),
            ascent_timeout: Some(Duration::from_secs(60)),
            arrival_timeout: Some(Duration::from_secs(600)),
            landing_timeout: Some(Duration::from_secs(120)),
            dwell: Duration::from_secs(3),
            hover: Duration::ZERO,
            arrival: ArrivalPolicy::TimeBased,
            nominal_speed: 1.0,
            arrival_radius: 1.0,
            wait_for_standby: true,
            soak_marker: None,
            soak_action: "Soaked".to_string(),
        }
    }
}

/// Everything a mission owns for its lifetime.
#[derive(Debug)]
pub struct MissionContext<L: VehicleLink> {
    pub mission_id: Uuid,
    pub link: L,
    pub soak: Option<SoakLogger>,
}

impl<L: VehicleLink> MissionContext<L> {
    pub fn new(link: L) -> Self {
        Self {
            mission_id: Uuid::new_v4(),
            link,
            soak: None,
        }
    }

    pub fn with_soak(mut self, soak: SoakLogger) -> Self {
        self.soak = Some(soak);
        self
    }
}

/// Outcome of one run, logged as JSON when the mission ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionReport {
    pub mission_id: Uuid,
    pub vehicle: VehicleKind,
    pub route: String,
    pub final_state: MissionState,
    pub transitions: Vec<MissionState>,
    pub waypoints_issued: usize,
    pub path_length_m: f64,
    pub elapsed_seconds: f64,
    pub error: Option<String>,
}

impl MissionReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == MissionState::Done
    }
}
