//! Logging configuration using tracing.
//!
//! The subscriber is installed once at startup with a provisional level; the
//! level from the validated configuration is applied afterwards through a
//! reload handle.

use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::LogLevel;

/// Handle used to change the active log level after initialisation.
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogHandle {
    /// Switch to a new level unless `RUST_LOG` was set at startup.
    pub fn set_level(&self, level: LogLevel) -> anyhow::Result<()> {
        if self.from_env {
            tracing::debug!(level = %level, "RUST_LOG is set, ignoring configured log level");
            return Ok(());
        }
        let filter = EnvFilter::try_new(level.as_str())?;
        self.handle.reload(filter)?;
        Ok(())
    }
}

/// Initialize logging with the specified level
pub fn init(level: &str) -> anyhow::Result<LogHandle> {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
            false,
        ),
    };
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(LogHandle { handle, from_env })
}
