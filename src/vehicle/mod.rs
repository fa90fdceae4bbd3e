pub mod mav;
pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MissionResult;
use crate::geo::Coordinate;

pub use self::mav::MavlinkLink;
pub use self::sim::{SimConfig, SimulatedLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleKind {
    /// Multirotor: takes off before navigating and lands at the end.
    #[default]
    Copter,
    /// Ground vehicle: drives straight away and disarms at the end.
    Rover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightMode {
    Guided,
    Land,
    Hold,
    Rtl,
    Manual,
}

impl std::fmt::Display for FlightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlightMode::Guided => "GUIDED",
            FlightMode::Land => "LAND",
            FlightMode::Hold => "HOLD",
            FlightMode::Rtl => "RTL",
            FlightMode::Manual => "MANUAL",
        };
        f.write_str(name)
    }
}

/// Autopilot system status as reported in the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    Uninit,
    Boot,
    Calibrating,
    Standby,
    Active,
    Critical,
    Emergency,
    Poweroff,
    Unknown,
}

/// Telemetry snapshot kept by link implementations.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    pub system_id: u8,
    pub kind: VehicleKind,
    pub armed: bool,
    pub flight_mode: Option<FlightMode>,
    pub system_status: SystemStatus,
    pub gps_fix: u8,
    pub location: Option<Coordinate>,
    pub altitude: f64,

    // Link status
    pub last_heartbeat: Option<std::time::SystemTime>,
    pub errors: Vec<String>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            system_id: 1,
            kind: VehicleKind::Copter,
            armed: false,
            flight_mode: None,
            system_status: SystemStatus::Unknown,
            gps_fix: 0,
            location: None,
            altitude: 0.0,
            last_heartbeat: None,
            errors: Vec::new(),
        }
    }
}

/// Command and telemetry surface of one vehicle.
///
/// Every method is a single request to the autopilot; waiting for the
/// vehicle to react is the caller's job.
#[async_trait]
pub trait VehicleLink: Send + Sync {
    async fn connect(endpoint: &str) -> MissionResult<Self>
    where
        Self: Sized;

    fn kind(&self) -> VehicleKind;

    async fn set_mode(&self, mode: FlightMode) -> MissionResult<()>;

    async fn arm(&self, armed: bool) -> MissionResult<()>;

    async fn is_armed(&self) -> MissionResult<bool>;

    /// Autopilot initialised with a usable position fix.
    async fn is_ready(&self) -> MissionResult<bool>;

    async fn takeoff(&self, altitude: f64) -> MissionResult<()>;

    async fn navigate_to(&self, target: &Coordinate) -> MissionResult<()>;

    async fn current_location(&self) -> MissionResult<Coordinate>;

    /// Altitude relative to home, meters.
    async fn current_altitude(&self) -> MissionResult<f64>;

    async fn status(&self) -> MissionResult<SystemStatus>;

    async fn close(&self) -> MissionResult<()>;
}
