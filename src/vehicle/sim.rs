//! In-process vehicle used when no endpoint is given.
//!
//! Kinematics are integrated lazily on every call against `tokio::time`, so
//! a paused test clock drives the simulation deterministically.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{FlightMode, SystemStatus, VehicleKind, VehicleLink};
use crate::error::{MissionError, MissionResult};
use crate::geo::Coordinate;

/// Altitude below which a copter counts as on the ground.
const GROUND_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub kind: VehicleKind,
    pub home_latitude: f64,
    pub home_longitude: f64,
    /// Horizontal speed in guided mode, m/s.
    pub ground_speed: f64,
    /// Vertical speed for takeoff and landing, m/s.
    pub climb_rate: f64,
    pub boot_delay_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            kind: VehicleKind::Copter,
            home_latitude: 29.7604,
            home_longitude: -95.3698,
            ground_speed: 1.0,
            climb_rate: 0.5,
            boot_delay_ms: 2_000,
        }
    }
}

/// Commands accepted by the simulator, in the order received.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    SetMode(FlightMode),
    Arm(bool),
    Takeoff(f64),
    NavigateTo(Coordinate),
    Close,
}

#[derive(Debug)]
struct SimState {
    mode: Option<FlightMode>,
    armed: bool,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    target: Option<Coordinate>,
    takeoff_altitude: Option<f64>,
    ready_at: Instant,
    last_step: Instant,
    closed: bool,
    journal: Vec<SimCommand>,
}

#[derive(Debug, Clone)]
pub struct SimulatedLink {
    config: SimConfig,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedLink {
    pub fn start(config: SimConfig) -> MissionResult<Self> {
        // validates the home position
        Coordinate::new(config.home_latitude, config.home_longitude, 0.0)?;
        let now = Instant::now();
        info!(
            "Starting simulated {:?} at ({}, {})",
            config.kind, config.home_latitude, config.home_longitude
        );
        let state = SimState {
            mode: None,
            armed: false,
            latitude: config.home_latitude,
            longitude: config.home_longitude,
            altitude: 0.0,
            target: None,
            takeoff_altitude: None,
            ready_at: now + Duration::from_millis(config.boot_delay_ms),
            last_step: now,
            closed: false,
            journal: Vec::new(),
        };
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Commands received so far.
    pub fn journal(&self) -> Vec<SimCommand> {
        self.state
            .lock()
            .map(|state| state.journal.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|state| state.closed).unwrap_or(true)
    }

    /// Locks the state and integrates motion up to now.
    fn advance(&self) -> MissionResult<MutexGuard<'_, SimState>> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| MissionError::Link(format!("Lock error: {}", e)))?;
        if state.closed {
            return Err(MissionError::LinkUnavailable(
                "simulated link closed".to_string(),
            ));
        }
        let now = Instant::now();
        let dt = now.saturating_duration_since(state.last_step).as_secs_f64();
        state.last_step = now;
        self.step(&mut state, dt);
        Ok(state)
    }

    fn step(&self, state: &mut SimState, dt: f64) {
        if !state.armed || dt <= 0.0 {
            return;
        }
        let climb = self.config.climb_rate * dt;

        if self.config.kind == VehicleKind::Copter {
            if state.mode == Some(FlightMode::Land) {
                state.target = None;
                state.takeoff_altitude = None;
                state.altitude = (state.altitude - climb).max(0.0);
                if state.altitude <= GROUND_EPSILON {
                    state.altitude = 0.0;
                    state.armed = false;
                    debug!("Simulated copter landed and disarmed");
                }
                return;
            }
            if let Some(goal) = state.takeoff_altitude {
                state.altitude = approach(state.altitude, goal, climb);
                if (state.altitude - goal).abs() < f64::EPSILON {
                    state.takeoff_altitude = None;
                }
                return;
            }
        }

        if state.mode != Some(FlightMode::Guided) {
            return;
        }
        let Some(target) = state.target else {
            return;
        };
        if self.config.kind == VehicleKind::Copter {
            state.altitude = approach(state.altitude, target.altitude(), climb);
        }

        let here = Coordinate::new(state.latitude, state.longitude, state.altitude);
        let Ok(here) = here else {
            return;
        };
        let remaining = here.distance_to(&target);
        let travel = self.config.ground_speed * dt;
        if travel >= remaining {
            state.latitude = target.latitude();
            state.longitude = target.longitude();
        } else {
            let fraction = travel / remaining;
            state.latitude += (target.latitude() - state.latitude) * fraction;
            state.longitude += (target.longitude() - state.longitude) * fraction;
        }
    }

    fn reject(&self, state: &SimState, reason: &str) -> MissionError {
        debug!("Simulator rejected command: {} (mode {:?})", reason, state.mode);
        MissionError::CommandRejected(reason.to_string())
    }
}

fn approach(current: f64, goal: f64, step: f64) -> f64 {
    if (goal - current).abs() <= step {
        goal
    } else if goal > current {
        current + step
    } else {
        current - step
    }
}

#[async_trait]
impl VehicleLink for SimulatedLink {
    /// Accepts `sim`, `sim:copter` and `sim:rover`.
    async fn connect(endpoint: &str) -> MissionResult<Self> {
        let kind = match endpoint {
            "sim" | "sim:copter" => VehicleKind::Copter,
            "sim:rover" => VehicleKind::Rover,
            other => {
                return Err(MissionError::LinkUnavailable(format!(
                    "not a simulator endpoint: {}",
                    other
                )))
            }
        };
        Self::start(SimConfig {
            kind,
            ..SimConfig::default()
        })
    }

    fn kind(&self) -> VehicleKind {
        self.config.kind
    }

    async fn set_mode(&self, mode: FlightMode) -> MissionResult<()> {
        let mut state = self.advance()?;
        if self.config.kind == VehicleKind::Rover && mode == FlightMode::Land {
            return Err(self.reject(&state, "rover has no LAND mode"));
        }
        state.mode = Some(mode);
        state.journal.push(SimCommand::SetMode(mode));
        Ok(())
    }

    async fn arm(&self, armed: bool) -> MissionResult<()> {
        let mut state = self.advance()?;
        if armed {
            if Instant::now() < state.ready_at {
                return Err(self.reject(&state, "autopilot still initialising"));
            }
            if state.mode != Some(FlightMode::Guided) {
                return Err(self.reject(&state, "arming requires GUIDED mode"));
            }
        } else if state.altitude > GROUND_EPSILON {
            return Err(self.reject(&state, "cannot disarm while airborne"));
        }
        state.armed = armed;
        if !armed {
            state.target = None;
        }
        state.journal.push(SimCommand::Arm(armed));
        Ok(())
    }

    async fn is_armed(&self) -> MissionResult<bool> {
        Ok(self.advance()?.armed)
    }

    async fn is_ready(&self) -> MissionResult<bool> {
        let state = self.advance()?;
        Ok(Instant::now() >= state.ready_at)
    }

    async fn takeoff(&self, altitude: f64) -> MissionResult<()> {
        let mut state = self.advance()?;
        if self.config.kind != VehicleKind::Copter {
            return Err(self.reject(&state, "only copters take off"));
        }
        if !state.armed || state.mode != Some(FlightMode::Guided) {
            return Err(self.reject(&state, "takeoff requires armed GUIDED vehicle"));
        }
        state.takeoff_altitude = Some(altitude);
        state.journal.push(SimCommand::Takeoff(altitude));
        Ok(())
    }

    async fn navigate_to(&self, target: &Coordinate) -> MissionResult<()> {
        let mut state = self.advance()?;
        if !state.armed || state.mode != Some(FlightMode::Guided) {
            return Err(self.reject(&state, "navigation requires armed GUIDED vehicle"));
        }
        state.target = Some(*target);
        state.journal.push(SimCommand::NavigateTo(*target));
        Ok(())
    }

    async fn current_location(&self) -> MissionResult<Coordinate> {
        let state = self.advance()?;
        Coordinate::new(state.latitude, state.longitude, state.altitude)
    }

    async fn current_altitude(&self) -> MissionResult<f64> {
        Ok(self.advance()?.altitude)
    }

    async fn status(&self) -> MissionResult<SystemStatus> {
        let state = self.advance()?;
        let status = if Instant::now() < state.ready_at {
            SystemStatus::Boot
        } else if state.armed {
            SystemStatus::Active
        } else {
            SystemStatus::Standby
        };
        Ok(status)
    }

    async fn close(&self) -> MissionResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| MissionError::Link(format!("Lock error: {}", e)))?;
        if !state.closed {
            state.closed = true;
            state.journal.push(SimCommand::Close);
            info!("Simulated link closed");
        }
        Ok(())
    }
}
