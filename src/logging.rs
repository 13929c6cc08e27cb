//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize the logging subsystem.
///
/// The preview owns the terminal, so logs go to a daily file under
/// `<data_local_dir>/dynaform/logs/`. The level comes from `DYNAFORM_LOG`.
///
/// ```bash
/// DYNAFORM_LOG=debug cargo run
/// DYNAFORM_LOG=dynaform::form_core=trace cargo run
/// ```
pub fn init() -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "dynaform.log");

    let env_filter = EnvFilter::try_from_env("DYNAFORM_LOG")
        .unwrap_or_else(|_| EnvFilter::new("dynaform=info,warn"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init();

    tracing::info!("dynaform starting, logs in {}", log_dir.display());
    Ok(())
}

pub fn log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("dynaform").join("logs")
}
