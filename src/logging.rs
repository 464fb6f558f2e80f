//! Tracing subscriber setup

use std::sync::OnceLock;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::SyncError;

/// Environment variable that overrides the configured filter
pub const LOG_ENV: &str = "FLUX_SYNC_LOG";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber. Later calls are no-ops.
///
/// `level_override` is the value of [`LOG_ENV`] as read by the caller.
pub fn init_logging(
    settings: &LoggingSettings,
    level_override: Option<&str>,
) -> Result<(), SyncError> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    let level = level_override
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(settings.level.as_str())
        .to_string();
    let env_filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    let init_result = if settings.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    init_result.map_err(|err| SyncError::Config(format!("failed to initialize logging: {err}")))?;
    LOGGING_INIT.set(()).ok();

    info!(
        target: "synheart_sync::logging",
        level = level.as_str(),
        json = settings.json,
        "logging initialized"
    );
    Ok(())
}
