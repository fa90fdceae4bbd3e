use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Environment, File};
use serde::Deserialize;
use tracing::{info, warn};

use crate::geo::DistanceUnit;
use crate::mission::{ArrivalPolicy, MissionSettings, Route};
use crate::soak::DEFAULT_PREFIX;
use crate::vehicle::mav::{DEFAULT_ACK_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT};
use crate::vehicle::SimConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default = "default_route")]
    pub route: Route,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub soak: SoakConfig,
}

fn default_route() -> Route {
    Route::Hold
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// MAVLink address such as `udpin:0.0.0.0:14550`; unset runs the simulator.
    pub connection_string: Option<String>,
    pub ack_timeout_ms: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT.as_millis() as u64,
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT.as_secs(),
        }
    }
}

impl LinkConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Mission timings. A timeout of 0 waits forever.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub target_altitude: f64,
    pub poll_interval_ms: u64,
    pub ready_timeout_secs: u64,
    pub arm_timeout_secs: u64,
    pub ascent_timeout_secs: u64,
    pub arrival_timeout_secs: u64,
    pub landing_timeout_secs: u64,
    pub dwell_secs: f64,
    pub hover_secs: f64,
    pub arrival: ArrivalPolicy,
    pub nominal_speed: f64,
    pub speed_unit: DistanceUnit,
    pub arrival_radius: f64,
    pub wait_for_standby: bool,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            target_altitude: 2.0,
            poll_interval_ms: 1_000,
            ready_timeout_secs: 120,
            arm_timeout_secs: 30,
            ascent_timeout_secs: 60,
            arrival_timeout_secs: 600,
            landing_timeout_secs: 120,
            dwell_secs: 3.0,
            hover_secs: 0.0,
            arrival: ArrivalPolicy::TimeBased,
            nominal_speed: 1.0,
            speed_unit: DistanceUnit::Meters,
            arrival_radius: 1.0,
            wait_for_standby: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SoakConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub prefix: String,
    pub marker_id: Option<String>,
    pub action: String,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("logs/soak.log"),
            prefix: DEFAULT_PREFIX.to_string(),
            marker_id: None,
            action: "Soaked".to_string(),
        }
    }
}

fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("Invalid {}: {}", name, value))
}

impl Config {
    /// Loads `config/{RUST_ENV}.toml`, falling back to the system and user
    /// config directories, then applies `FIELD_MISSION__*` overrides.
    pub fn load() -> Result<Self> {
        let env = std::env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        let file_name = format!("{}.toml", env);

        let mut candidates = vec![
            PathBuf::from("config").join(&file_name),
            PathBuf::from("/etc/field-mission").join(&file_name),
        ];
        if let Some(user_dir) = dirs::config_dir() {
            candidates.push(user_dir.join("field-mission").join(&file_name));
        }

        let path = candidates.into_iter().find(|path| path.exists());
        match &path {
            Some(path) => info!("Loading configuration from {:?}", path),
            None => warn!("No {} found, using defaults", file_name),
        }
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("FIELD_MISSION").separator("__"))
            .build()
            .context("Failed to build configuration")?;
        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mission = &self.mission;
        if mission.poll_interval_ms == 0 {
            bail!("mission.poll_interval_ms must be positive");
        }
        if !(mission.target_altitude.is_finite() && mission.target_altitude > 0.0) {
            bail!(
                "mission.target_altitude must be positive, got {}",
                mission.target_altitude
            );
        }
        if !(mission.nominal_speed.is_finite() && mission.nominal_speed > 0.0) {
            bail!(
                "mission.nominal_speed must be positive, got {}",
                mission.nominal_speed
            );
        }
        if !(mission.arrival_radius.is_finite() && mission.arrival_radius > 0.0) {
            bail!(
                "mission.arrival_radius must be positive, got {}",
                mission.arrival_radius
            );
        }
        if self.soak.enabled && self.soak.marker_id.is_none() {
            bail!("soak.enabled requires soak.marker_id");
        }
        Ok(())
    }

    pub fn to_settings(&self) -> Result<MissionSettings> {
        let mission = &self.mission;
        let soak_marker = if self.soak.enabled {
            self.soak.marker_id.clone()
        } else {
            None
        };
        Ok(MissionSettings {
            target_altitude: mission.target_altitude,
            poll_interval: Duration::from_millis(mission.poll_interval_ms),
            ready_timeout: timeout(mission.ready_timeout_secs),
            arm_timeout: timeout(mission.arm_timeout_secs),
            ascent_timeout: timeout(mission.ascent_timeout_secs),
            arrival_timeout: timeout(mission.arrival_timeout_secs),
            landing_timeout: timeout(mission.landing_timeout_secs),
            dwell: seconds("mission.dwell_secs", mission.dwell_secs)?,
            hover: seconds("mission.hover_secs", mission.hover_secs)?,
            arrival: mission.arrival,
            nominal_speed: mission.speed_unit.to_meters(mission.nominal_speed),
            arrival_radius: mission.arrival_radius,
            wait_for_standby: mission.wait_for_standby,
            soak_marker,
            soak_action: self.soak.action.clone(),
        })
    }
}
