use std::str::FromStr;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogSettings;


/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logger(settings: &LogSettings) -> anyhow::Result<()> {
    let level_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    tracing_subscriber::registry()
        .with(level_filter)
        .with(console_layer)
        .try_init()?;

    tracing::debug!("Logging initialized");
    Ok(())
}
