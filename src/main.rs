use std::process::ExitCode;

use anyhow::{bail, Result};
use tokio::signal;
use tracing::{error, info};

use field_mission::config::Config;
use field_mission::mission::{
    CancelToken, MissionContext, MissionExecutor, MissionReport, MissionSettings, Route,
};
use field_mission::soak::SoakLogger;
use field_mission::util::setup_logging;
use field_mission::vehicle::{MavlinkLink, SimulatedLink, VehicleLink};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(report) if report.succeeded() => ExitCode::SUCCESS,
        Ok(report) => {
            eprintln!(
                "field-mission: mission {} ended in {}: {}",
                report.mission_id,
                report.final_state,
                report.error.as_deref().unwrap_or("unknown error")
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("field-mission: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<MissionReport> {
    let endpoint = connect_arg(std::env::args().skip(1))?;
    let mut config = Config::load()?;
    if endpoint.is_some() {
        config.link.connection_string = endpoint;
    }
    setup_logging(&config.general.log_level)?;
    info!("Application starting...");

    let settings = config.to_settings()?;
    let soak = if config.soak.enabled {
        Some(SoakLogger::to_file(&config.soak.path, &config.soak.prefix)?)
    } else {
        None
    };

    let (cancel_handle, cancel) = CancelToken::pair();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, cancelling mission...");
                cancel_handle.cancel();
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    });

    let route = config.route.clone();
    let report = match config.link.connection_string.as_deref() {
        Some(endpoint) if endpoint.starts_with("sim") => {
            let link = SimulatedLink::connect(endpoint).await?;
            fly(link, route, settings, soak, &cancel).await
        }
        Some(endpoint) => {
            let link = MavlinkLink::open(
                endpoint,
                config.link.ack_timeout(),
                config.link.heartbeat_timeout(),
            )
            .await?;
            fly(link, route, settings, soak, &cancel).await
        }
        None => {
            info!("No connection string, using the simulated vehicle");
            let link = SimulatedLink::start(config.sim.clone())?;
            fly(link, route, settings, soak, &cancel).await
        }
    };

    info!("Mission finished: {}", report.final_state);
    Ok(report)
}

async fn fly<L: VehicleLink>(
    link: L,
    route: Route,
    settings: MissionSettings,
    soak: Option<SoakLogger>,
    cancel: &CancelToken,
) -> MissionReport {
    let mut context = MissionContext::new(link);
    if let Some(soak) = soak {
        context = context.with_soak(soak);
    }
    MissionExecutor::new(context, route, settings)
        .run(cancel)
        .await
}

/// Reads `--connect <endpoint>` or `--connect=<endpoint>`.
fn connect_arg(mut args: impl Iterator<Item = String>) -> Result<Option<String>> {
    let mut endpoint = None;
    while let Some(arg) = args.next() {
        if arg == "--connect" {
            match args.next() {
                Some(value) => endpoint = Some(value),
                None => bail!("--connect requires an endpoint"),
            }
        } else if let Some(value) = arg.strip_prefix("--connect=") {
            endpoint = Some(value.to_string());
        } else {
            bail!("Unknown argument: {}\nUsage: field-mission [--connect <endpoint>]", arg);
        }
    }
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_connect_arg() {
        assert_eq!(connect_arg(args(&[])).unwrap(), None);
        assert_eq!(
            connect_arg(args(&["--connect", "udpin:0.0.0.0:14550"])).unwrap(),
            Some("udpin:0.0.0.0:14550".to_string())
        );
        assert_eq!(
            connect_arg(args(&["--connect=sim:rover"])).unwrap(),
            Some("sim:rover".to_string())
        );
        assert!(connect_arg(args(&["--connect"])).is_err());
        assert!(connect_arg(args(&["--verbose"])).is_err());
    }
}
