//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` wins over `default_filter` when set. Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_installed() {
        let _ = init_tracing("debug", LogFormat::Pretty);
        assert!(!init_tracing("debug", LogFormat::Json));
    }
}
