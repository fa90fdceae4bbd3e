use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::poll::{poll_until, CancelToken, PollOptions, Ready};
use super::{ArrivalPolicy, MissionContext, MissionReport, MissionSettings, MissionState, Route};
use crate::coverage;
use crate::error::MissionResult;
use crate::geo::{offset_in, Coordinate, Direction};
use crate::progress::{format_eta, ProgressMonitor};
use crate::vehicle::{FlightMode, SystemStatus, VehicleKind, VehicleLink};

/// Fraction of the takeoff altitude that counts as airborne.
const ASCENT_THRESHOLD: f64 = 0.95;

/// Targets resolved from the start position before anything is commanded.
#[derive(Debug)]
struct Plan {
    targets: Vec<Coordinate>,
    path_length: f64,
    monitor: Option<ProgressMonitor>,
}

pub struct MissionExecutor<L: VehicleLink> {
    context: MissionContext<L>,
    route: Route,
    settings: MissionSettings,
    state: MissionState,
    transitions: Vec<MissionState>,
    waypoints_issued: usize,
    path_length: f64,
    arm_commanded: bool,
}

impl<L: VehicleLink> MissionExecutor<L> {
    pub fn new(context: MissionContext<L>, route: Route, settings: MissionSettings) -> Self {
        Self {
            context,
            route,
            settings,
            state: MissionState::Idle,
            transitions: vec![MissionState::Idle],
            waypoints_issued: 0,
            path_length: 0.0,
            arm_commanded: false,
        }
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    /// Flies the route to completion or failure and closes the link.
    pub async fn run(mut self, cancel: &CancelToken) -> MissionReport {
        let started = Instant::now();
        let kind = self.context.link.kind();
        info!(
            mission_id = %self.context.mission_id,
            vehicle = ?kind,
            route = self.route.name(),
            "Mission starting"
        );

        let error = match self.execute(cancel).await {
            Ok(()) => None,
            Err(e) => {
                if e.is_planning() {
                    error!("Mission planning failed: {}", e);
                } else {
                    error!("Mission failed in {}: {}", self.state, e);
                }
                self.transition(MissionState::Failed);
                self.safe_out().await;
                Some(e.to_string())
            }
        };

        if let Err(e) = self.context.link.close().await {
            warn!("Failed to close vehicle link: {}", e);
        }

        let report = MissionReport {
            mission_id: self.context.mission_id,
            vehicle: kind,
            route: self.route.name().to_string(),
            final_state: self.state,
            transitions: self.transitions,
            waypoints_issued: self.waypoints_issued,
            path_length_m: self.path_length,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            error,
        };
        match serde_json::to_string(&report) {
            Ok(json) => info!("Mission report: {}", json),
            Err(e) => warn!("Failed to serialize mission report: {}", e),
        }
        report
    }

    async fn execute(&mut self, cancel: &CancelToken) -> MissionResult<()> {
        self.transition(MissionState::Precheck);
        let ready = self.wait_ready(cancel).await?;
        info!("Vehicle ready after {:?}", ready.waited);
        let home = self.context.link.current_location().await?;
        info!("Start position: {}", home);
        let plan = self.plan(&home)?;
        self.path_length = plan.path_length;
        self.context.link.set_mode(FlightMode::Guided).await?;

        self.arm_commanded = true;
        self.context.link.arm(true).await?;
        self.wait_armed(cancel).await?;
        self.transition(MissionState::Armed);

        if self.context.link.kind() == VehicleKind::Copter {
            info!("Taking off to {} m", self.settings.target_altitude);
            self.context
                .link
                .takeoff(self.settings.target_altitude)
                .await?;
            self.wait_ascent(cancel).await?;
        }
        self.transition(MissionState::EnRoute);

        let departed = Instant::now();
        self.traverse(&plan, departed, cancel).await?;
        self.wait_arrival(&plan, departed, cancel).await?;
        self.transition(MissionState::Arrived);

        if !self.settings.hover.is_zero() {
            info!("Holding position for {:?}", self.settings.hover);
            cancel.sleep(self.settings.hover).await?;
        }
        self.record_soak().await;

        self.transition(MissionState::Landing);
        match self.context.link.kind() {
            VehicleKind::Copter => {
                self.context.link.set_mode(FlightMode::Land).await?;
                if self.settings.wait_for_standby {
                    self.wait_standby(cancel).await?;
                }
            }
            VehicleKind::Rover => {
                self.context.link.arm(false).await?;
                self.wait_disarmed(cancel).await?;
            }
        }
        self.transition(MissionState::Done);
        Ok(())
    }

    fn transition(&mut self, next: MissionState) {
        info!(from = %self.state, to = %next, "Mission state transition");
        self.state = next;
        self.transitions.push(next);
    }

    fn plan(&self, home: &Coordinate) -> MissionResult<Plan> {
        // copters fly the route at takeoff height, rovers on the ground
        let altitude = match self.context.link.kind() {
            VehicleKind::Copter => self.settings.target_altitude,
            VehicleKind::Rover => home.altitude(),
        };

        let plan = match &self.route {
            Route::Hold => Plan {
                targets: Vec::new(),
                path_length: 0.0,
                monitor: None,
            },
            Route::StraightLine {
                distance,
                unit,
                bearing,
            } => {
                let target = offset_in(home, *distance, *unit, Direction::Bearing(*bearing))?
                    .with_altitude(altitude)?;
                let meters = unit.to_meters(*distance);
                let monitor = ProgressMonitor::new(self.settings.nominal_speed, meters)?;
                info!(
                    "Straight line of {:.2} m to {}, expected traversal {} at {:.4} m/s",
                    monitor.total_distance(),
                    target,
                    format_eta(monitor.time_to_traverse()),
                    monitor.speed()
                );
                Plan {
                    targets: vec![target],
                    path_length: meters,
                    monitor: Some(monitor),
                }
            }
            Route::Coverage(field) => {
                let waypoints = coverage::plan(field, home)?;
                let path_length = coverage::path_length(&waypoints);
                let targets = waypoints
                    .iter()
                    .map(|waypoint| waypoint.coordinate.with_altitude(altitude))
                    .collect::<MissionResult<Vec<_>>>()?;
                let monitor = ProgressMonitor::new(self.settings.nominal_speed, path_length)?;
                info!(
                    "Coverage of {} waypoints, {:.2} m, expected traversal {}",
                    targets.len(),
                    path_length,
                    format_eta(monitor.time_to_traverse())
                );
                Plan {
                    targets,
                    path_length,
                    monitor: Some(monitor),
                }
            }
        };
        Ok(plan)
    }

    async fn traverse(
        &mut self,
        plan: &Plan,
        departed: Instant,
        cancel: &CancelToken,
    ) -> MissionResult<()> {
        let total = plan.targets.len();
        for (index, target) in plan.targets.iter().enumerate() {
            cancel.check()?;
            debug!("Waypoint {}/{}: {}", index + 1, total, target);
            self.context.link.navigate_to(target).await?;
            self.waypoints_issued += 1;
            cancel.sleep(self.settings.dwell).await?;
            if let Some(monitor) = &plan.monitor {
                info!("{}", monitor.sample(departed.elapsed()));
            }
        }
        Ok(())
    }

    async fn wait_arrival(
        &self,
        plan: &Plan,
        departed: Instant,
        cancel: &CancelToken,
    ) -> MissionResult<()> {
        let Some(last) = plan.targets.last().copied() else {
            return Ok(());
        };
        let link = &self.context.link;

        match self.settings.arrival {
            ArrivalPolicy::TimeBased => {
                let Route::StraightLine { .. } = self.route else {
                    return Ok(());
                };
                let Some(monitor) = plan.monitor else {
                    return Ok(());
                };
                warn!("Arrival is assumed from elapsed time only; position is not checked");
                // the ETA alone decides arrival, so arrival_timeout does not apply
                let options = self.options(None);
                poll_until("time-based arrival", options, cancel, move || async move {
                    let elapsed = departed.elapsed();
                    info!("{}", monitor.sample(elapsed));
                    Ok(monitor.is_complete(elapsed))
                })
                .await?;
            }
            ArrivalPolicy::PositionConfirmed => {
                let radius = self.settings.arrival_radius;
                let options = self.options(self.settings.arrival_timeout);
                let ready = poll_until("arrival", options, cancel, move || async move {
                    link.current_location().await.map(|here| {
                        let remaining = here.distance_to(&last);
                        debug!("{:.2} m from final target", remaining);
                        remaining <= radius
                    })
                })
                .await?;
                info!("Arrival confirmed after {:?}", ready.waited);
            }
        }
        Ok(())
    }

    async fn record_soak(&self) {
        let (Some(soak), Some(marker)) = (&self.context.soak, &self.settings.soak_marker) else {
            return;
        };
        let location = match self.context.link.current_location().await {
            Ok(location) => location,
            Err(e) => {
                warn!("Skipping soak record, no position: {}", e);
                return;
            }
        };
        if let Err(e) = soak.record(&self.settings.soak_action, marker, &location) {
            error!("Failed to write soak record: {:#}", e);
        }
    }

    /// Best effort: bring the vehicle down or to a stop once anything failed.
    async fn safe_out(&self) {
        if !self.arm_commanded {
            return;
        }
        let result = match self.context.link.kind() {
            VehicleKind::Copter => self.context.link.set_mode(FlightMode::Land).await,
            VehicleKind::Rover => self.context.link.arm(false).await,
        };
        match result {
            Ok(()) => info!("Safe-out command sent"),
            Err(e) => warn!("Safe-out command failed: {}", e),
        }
    }

    fn options(&self, timeout: Option<Duration>) -> PollOptions {
        PollOptions::new(self.settings.poll_interval, timeout)
    }

    async fn wait_ready(&self, cancel: &CancelToken) -> MissionResult<Ready> {
        let link = &self.context.link;
        let options = self.options(self.settings.ready_timeout);
        poll_until("vehicle readiness", options, cancel, move || link.is_ready()).await
    }

    async fn wait_armed(&self, cancel: &CancelToken) -> MissionResult<Ready> {
        let link = &self.context.link;
        let options = self.options(self.settings.arm_timeout);
        poll_until("arming", options, cancel, move || link.is_armed()).await
    }

    async fn wait_ascent(&self, cancel: &CancelToken) -> MissionResult<Ready> {
        let link = &self.context.link;
        let options = self.options(self.settings.ascent_timeout);
        let threshold = self.settings.target_altitude * ASCENT_THRESHOLD;
        poll_until("takeoff altitude", options, cancel, move || async move {
            link.current_altitude().await.map(|altitude| {
                debug!("Altitude: {:.2} m", altitude);
                altitude >= threshold
            })
        })
        .await
    }

    async fn wait_standby(&self, cancel: &CancelToken) -> MissionResult<Ready> {
        let link = &self.context.link;
        let options = self.options(self.settings.landing_timeout);
        poll_until("landing", options, cancel, move || async move {
            link.status()
                .await
                .map(|status| status == SystemStatus::Standby)
        })
        .await
    }

    async fn wait_disarmed(&self, cancel: &CancelToken) -> MissionResult<Ready> {
        let link = &self.context.link;
        let options = self.options(self.settings.landing_timeout);
        poll_until("disarm", options, cancel, move || async move {
            link.is_armed().await.map(|armed| !armed)
        })
        .await
    }
}
