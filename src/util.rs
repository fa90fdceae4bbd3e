use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(
            log_level
                .parse()
                .with_context(|| format!("Invalid log level: {}", log_level))?,
        )
        .add_directive("mavlink=info".parse()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")
}
