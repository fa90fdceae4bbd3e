use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use mavlink::common::{
    MavAutopilot, MavCmd, MavFrame, MavMessage, MavModeFlag, MavResult, MavState, MavType,
    PositionTargetTypemask, COMMAND_LONG_DATA, HEARTBEAT_DATA, REQUEST_DATA_STREAM_DATA,
    SET_POSITION_TARGET_GLOBAL_INT_DATA,
};
use mavlink::{MavConnection, MavHeader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{FlightMode, SystemStatus, VehicleKind, VehicleLink, VehicleState};
use crate::error::{MissionError, MissionResult};
use crate::geo::Coordinate;

const GCS_SYSTEM_ID: u8 = 255;
const GCS_COMPONENT_ID: u8 = 190;
const AUTOPILOT_COMPONENT_ID: u8 = 1;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const STREAM_RATE_HZ: u16 = 4;

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

type Connection = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandAck {
    pub command: MavCmd,
    pub result: MavResult,
}

/// ArduPilot custom mode number for `mode` on a vehicle of `kind`.
pub fn custom_mode(kind: VehicleKind, mode: FlightMode) -> u32 {
    match (kind, mode) {
        (VehicleKind::Copter, FlightMode::Manual) => 0,
        (VehicleKind::Copter, FlightMode::Guided) => 4,
        (VehicleKind::Copter, FlightMode::Hold) => 5,
        (VehicleKind::Copter, FlightMode::Rtl) => 6,
        (VehicleKind::Copter, FlightMode::Land) => 9,
        (VehicleKind::Rover, FlightMode::Manual) => 0,
        (VehicleKind::Rover, FlightMode::Hold) => 4,
        (VehicleKind::Rover, FlightMode::Rtl) => 11,
        (VehicleKind::Rover, FlightMode::Guided) => 15,
        // rovers have no LAND; HOLD stops in place
        (VehicleKind::Rover, FlightMode::Land) => 4,
    }
}

pub fn decode_mode(kind: VehicleKind, custom: u32) -> Option<FlightMode> {
    match (kind, custom) {
        (VehicleKind::Copter, 0) => Some(FlightMode::Manual),
        (VehicleKind::Copter, 4) => Some(FlightMode::Guided),
        (VehicleKind::Copter, 5) => Some(FlightMode::Hold),
        (VehicleKind::Copter, 6) => Some(FlightMode::Rtl),
        (VehicleKind::Copter, 9) => Some(FlightMode::Land),
        (VehicleKind::Rover, 0) => Some(FlightMode::Manual),
        (VehicleKind::Rover, 4) => Some(FlightMode::Hold),
        (VehicleKind::Rover, 11) => Some(FlightMode::Rtl),
        (VehicleKind::Rover, 15) => Some(FlightMode::Guided),
        _ => None,
    }
}

fn system_status(state: MavState) -> SystemStatus {
    match state {
        MavState::MAV_STATE_UNINIT => SystemStatus::Uninit,
        MavState::MAV_STATE_BOOT => SystemStatus::Boot,
        MavState::MAV_STATE_CALIBRATING => SystemStatus::Calibrating,
        MavState::MAV_STATE_STANDBY => SystemStatus::Standby,
        MavState::MAV_STATE_ACTIVE => SystemStatus::Active,
        MavState::MAV_STATE_CRITICAL => SystemStatus::Critical,
        MavState::MAV_STATE_EMERGENCY => SystemStatus::Emergency,
        MavState::MAV_STATE_POWEROFF => SystemStatus::Poweroff,
        #[allow(unreachable_patterns)]
        _ => SystemStatus::Unknown,
    }
}

/// Folds one received message into the telemetry snapshot.
///
/// Returns the acknowledgement when the message is a COMMAND_ACK.
pub fn apply_message(
    state: &mut VehicleState,
    header: &MavHeader,
    message: &MavMessage,
) -> Option<CommandAck> {
    match message {
        MavMessage::HEARTBEAT(hb) => {
            if hb.mavtype == MavType::MAV_TYPE_GCS
                || hb.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID
            {
                return None;
            }
            state.kind = match hb.mavtype {
                MavType::MAV_TYPE_GROUND_ROVER | MavType::MAV_TYPE_SURFACE_BOAT => {
                    VehicleKind::Rover
                }
                _ => VehicleKind::Copter,
            };
            state.system_id = header.system_id;
            state.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
            state.flight_mode = decode_mode(state.kind, hb.custom_mode);
            state.system_status = system_status(hb.system_status);
            state.last_heartbeat = Some(SystemTime::now());
        }
        MavMessage::GPS_RAW_INT(gps) => {
            state.gps_fix = gps.fix_type as u8;
        }
        MavMessage::GLOBAL_POSITION_INT(pos) => {
            let altitude = pos.relative_alt as f64 / 1000.0;
            match Coordinate::new(pos.lat as f64 / 1e7, pos.lon as f64 / 1e7, altitude) {
                Ok(location) => {
                    state.location = Some(location);
                    state.altitude = altitude;
                }
                Err(e) => state.errors.push(e.to_string()),
            }
        }
        MavMessage::COMMAND_ACK(ack) => {
            return Some(CommandAck {
                command: ack.command,
                result: ack.result,
            });
        }
        MavMessage::STATUSTEXT(text) => {
            let line: String = text
                .text
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as char)
                .collect();
            if !line.is_empty() {
                info!("[autopilot] {}", line);
            }
        }
        _ => {}
    }
    None
}

/// MAVLink connection to an ArduPilot copter or rover.
pub struct MavlinkLink {
    connection: Connection,
    state: Arc<RwLock<VehicleState>>,
    acks: broadcast::Sender<CommandAck>,
    running: Arc<AtomicBool>,
    sequence: AtomicU8,
    ack_timeout: Duration,
}

impl MavlinkLink {
    pub async fn open(
        endpoint: &str,
        ack_timeout: Duration,
        heartbeat_timeout: Duration,
    ) -> MissionResult<Self> {
        info!("Connecting to vehicle on: {}", endpoint);
        let address = endpoint.to_string();
        let connection =
            tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&address))
                .await
                .map_err(|e| MissionError::LinkUnavailable(format!("connect task failed: {}", e)))?
                .map_err(|e| MissionError::LinkUnavailable(format!("{}: {}", endpoint, e)))?;

        let (acks, _) = broadcast::channel(16);
        let link = Self {
            connection: Arc::from(connection),
            state: Arc::new(RwLock::new(VehicleState::default())),
            acks,
            running: Arc::new(AtomicBool::new(true)),
            sequence: AtomicU8::new(0),
            ack_timeout,
        };
        link.spawn_reader()?;
        link.spawn_heartbeat();
        link.wait_for_heartbeat(heartbeat_timeout).await?;
        link.request_streams().await?;
        Ok(link)
    }

    pub fn snapshot(&self) -> MissionResult<VehicleState> {
        let state = self
            .state
            .read()
            .map_err(|e| MissionError::Link(format!("Lock error: {}", e)))?;
        Ok(state.clone())
    }

    fn spawn_reader(&self) -> MissionResult<()> {
        let connection = Arc::clone(&self.connection);
        let state = Arc::clone(&self.state);
        let acks = self.acks.clone();
        let running = Arc::clone(&self.running);

        std::thread::Builder::new()
            .name("mavlink-rx".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match connection.recv() {
                        Ok((header, message)) => {
                            let ack = match state.write() {
                                Ok(mut state) => apply_message(&mut state, &header, &message),
                                Err(e) => {
                                    error!("Lock error: {}", e);
                                    break;
                                }
                            };
                            if let Some(ack) = ack {
                                debug!("Received {:?}", ack);
                                let _ = acks.send(ack);
                            }
                        }
                        Err(e) => {
                            debug!("MAVLink receive error: {}", e);
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
                debug!("MAVLink reader stopped");
            })
            .map_err(|e| MissionError::LinkUnavailable(format!("reader thread: {}", e)))?;
        Ok(())
    }

    fn spawn_heartbeat(&self) {
        let connection = Arc::clone(&self.connection);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let header = MavHeader {
                system_id: GCS_SYSTEM_ID,
                component_id: GCS_COMPONENT_ID,
                sequence: 0,
            };
            let heartbeat = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
                custom_mode: 0,
                mavtype: MavType::MAV_TYPE_GCS,
                autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
                base_mode: MavModeFlag::empty(),
                system_status: MavState::MAV_STATE_ACTIVE,
                mavlink_version: 3,
            });
            while running.load(Ordering::SeqCst) {
                if let Err(e) = connection.send(&header, &heartbeat) {
                    warn!("Failed to send GCS heartbeat: {}", e);
                }
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            }
        });
    }

    async fn wait_for_heartbeat(&self, timeout: Duration) -> MissionResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.snapshot()?.last_heartbeat.is_some() {
                let state = self.snapshot()?;
                info!(
                    "Heartbeat from system {} ({:?}, mode {:?})",
                    state.system_id, state.kind, state.flight_mode
                );
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                self.running.store(false, Ordering::SeqCst);
                return Err(MissionError::LinkUnavailable(format!(
                    "no heartbeat within {:?}",
                    timeout
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn header(&self) -> MavHeader {
        MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        }
    }

    fn target(&self) -> MissionResult<(u8, VehicleKind)> {
        let state = self.snapshot()?;
        Ok((state.system_id, state.kind))
    }

    async fn send(&self, message: MavMessage) -> MissionResult<()> {
        let header = self.header();
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || connection.send(&header, &message))
            .await
            .map_err(|e| MissionError::Link(format!("send task failed: {}", e)))?
            .map_err(|e| MissionError::Link(format!("send failed: {}", e)))?;
        Ok(())
    }

    async fn request_streams(&self) -> MissionResult<()> {
        let (target_system, _) = self.target()?;
        self.send(MavMessage::REQUEST_DATA_STREAM(REQUEST_DATA_STREAM_DATA {
            req_message_rate: STREAM_RATE_HZ,
            target_system,
            target_component: AUTOPILOT_COMPONENT_ID,
            req_stream_id: 0,
            start_stop: 1,
        }))
        .await
    }

    /// Sends COMMAND_LONG and waits for its acknowledgement.
    async fn command(&self, command: MavCmd, params: [f32; 7]) -> MissionResult<()> {
        let (target_system, _) = self.target()?;
        let mut acks = self.acks.subscribe();

        self.send(MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system,
            target_component: AUTOPILOT_COMPONENT_ID,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        }))
        .await?;

        let wait_ack = async {
            loop {
                match acks.recv().await {
                    Ok(ack) if ack.command == command => return Ok(ack.result),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(MissionError::Link("ack channel closed".to_string()))
                    }
                }
            }
        };
        let result = tokio::time::timeout(self.ack_timeout, wait_ack)
            .await
            .map_err(|_| MissionError::Timeout {
                what: format!("{:?} acknowledgement", command),
                after: self.ack_timeout,
            })??;

        match result {
            MavResult::MAV_RESULT_ACCEPTED => Ok(()),
            other => Err(MissionError::CommandRejected(format!(
                "{:?}: {:?}",
                command, other
            ))),
        }
    }
}

#[async_trait]
impl VehicleLink for MavlinkLink {
    async fn connect(endpoint: &str) -> MissionResult<Self> {
        Self::open(endpoint, DEFAULT_ACK_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT).await
    }

    fn kind(&self) -> VehicleKind {
        self.snapshot().map(|state| state.kind).unwrap_or_default()
    }

    async fn set_mode(&self, mode: FlightMode) -> MissionResult<()> {
        let (_, kind) = self.target()?;
        let custom = custom_mode(kind, mode);
        debug!("Setting mode {} (custom {})", mode, custom);
        self.command(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                custom as f32,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            ],
        )
        .await
    }

    async fn arm(&self, armed: bool) -> MissionResult<()> {
        let param = if armed { 1.0 } else { 0.0 };
        self.command(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [param, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn is_armed(&self) -> MissionResult<bool> {
        Ok(self.snapshot()?.armed)
    }

    async fn is_ready(&self) -> MissionResult<bool> {
        let state = self.snapshot()?;
        let initialised = !matches!(
            state.system_status,
            SystemStatus::Uninit
                | SystemStatus::Boot
                | SystemStatus::Calibrating
                | SystemStatus::Unknown
        );
        // 2 = GPS_FIX_TYPE_2D_FIX
        Ok(initialised && state.gps_fix > 1 && state.location.is_some())
    }

    async fn takeoff(&self, altitude: f64) -> MissionResult<()> {
        let (_, kind) = self.target()?;
        if kind != VehicleKind::Copter {
            return Err(MissionError::CommandRejected(
                "takeoff is not supported by a rover".to_string(),
            ));
        }
        self.command(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, altitude as f32],
        )
        .await
    }

    async fn navigate_to(&self, target: &Coordinate) -> MissionResult<()> {
        let (target_system, _) = self.target()?;
        let type_mask = PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_VZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AX_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AY_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_AZ_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_IGNORE
            | PositionTargetTypemask::POSITION_TARGET_TYPEMASK_YAW_RATE_IGNORE;

        self.send(MavMessage::SET_POSITION_TARGET_GLOBAL_INT(
            SET_POSITION_TARGET_GLOBAL_INT_DATA {
                time_boot_ms: 0,
                target_system,
                target_component: AUTOPILOT_COMPONENT_ID,
                coordinate_frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
                type_mask,
                lat_int: (target.latitude() * 1e7).round() as i32,
                lon_int: (target.longitude() * 1e7).round() as i32,
                alt: target.altitude() as f32,
                vx: 0.0,
                vy: 0.0,
                vz: 0.0,
                afx: 0.0,
                afy: 0.0,
                afz: 0.0,
                yaw: 0.0,
                yaw_rate: 0.0,
            },
        ))
        .await
    }

    async fn current_location(&self) -> MissionResult<Coordinate> {
        self.snapshot()?
            .location
            .ok_or_else(|| MissionError::Link("no position received yet".to_string()))
    }

    async fn current_altitude(&self) -> MissionResult<f64> {
        Ok(self.snapshot()?.altitude)
    }

    async fn status(&self) -> MissionResult<SystemStatus> {
        Ok(self.snapshot()?.system_status)
    }

    async fn close(&self) -> MissionResult<()> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Close vehicle link");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::GLOBAL_POSITION_INT_DATA;

    fn header() -> MavHeader {
        MavHeader {
            system_id: 7,
            component_id: 1,
            sequence: 0,
        }
    }

    fn heartbeat(mavtype: MavType, base_mode: MavModeFlag, custom_mode: u32) -> MavMessage {
        MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode,
            mavtype,
            autopilot: MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA,
            base_mode,
            system_status: MavState::MAV_STATE_STANDBY,
            mavlink_version: 3,
        })
    }

    #[test]
    fn test_mode_numbers_round_trip() {
        for kind in [VehicleKind::Copter, VehicleKind::Rover] {
            for mode in [
                FlightMode::Guided,
                FlightMode::Hold,
                FlightMode::Rtl,
                FlightMode::Manual,
            ] {
                assert_eq!(decode_mode(kind, custom_mode(kind, mode)), Some(mode));
            }
        }
        assert_eq!(custom_mode(VehicleKind::Copter, FlightMode::Land), 9);
        assert_eq!(custom_mode(VehicleKind::Rover, FlightMode::Guided), 15);
    }

    #[test]
    fn test_heartbeat_updates_armed_and_mode() {
        let mut state = VehicleState::default();
        let armed = MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED
            | MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED;
        let ack = apply_message(
            &mut state,
            &header(),
            &heartbeat(MavType::MAV_TYPE_GROUND_ROVER, armed, 15),
        );
        assert!(ack.is_none());
        assert!(state.armed);
        assert_eq!(state.kind, VehicleKind::Rover);
        assert_eq!(state.flight_mode, Some(FlightMode::Guided));
        assert_eq!(state.system_status, SystemStatus::Standby);
        assert_eq!(state.system_id, 7);
        assert!(state.last_heartbeat.is_some());
    }

    #[test]
    fn test_gcs_heartbeat_is_ignored() {
        let mut state = VehicleState::default();
        apply_message(
            &mut state,
            &header(),
            &heartbeat(MavType::MAV_TYPE_GCS, MavModeFlag::empty(), 0),
        );
        assert!(state.last_heartbeat.is_none());
    }

    #[test]
    fn test_global_position_sets_relative_altitude() {
        let mut state = VehicleState::default();
        let message = MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            time_boot_ms: 0,
            lat: 297_604_000,
            lon: -953_698_000,
            alt: 15_000,
            relative_alt: 1_950,
            vx: 0,
            vy: 0,
            vz: 0,
            hdg: 0,
        });
        apply_message(&mut state, &header(), &message);

        let location = state.location.unwrap();
        assert!((location.latitude() - 29.7604).abs() < 1e-9);
        assert!((location.longitude() + 95.3698).abs() < 1e-9);
        assert!((state.altitude - 1.95).abs() < 1e-9);
    }
}
