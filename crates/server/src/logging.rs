//! `tracing-subscriber` initialization, selected by
//! `INFRACTL_LOG`/`INFRACTL_LOG_FORMAT`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log rendering format, selected by `INFRACTL_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text, the default.
    Text,
    /// Structured JSON, one object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?}, expected text or json")),
        }
    }
}

/// Initializes the global `tracing` subscriber. `INFRACTL_LOG` (default
/// `info`) supplies the `EnvFilter` directive string; `format` selects
/// between the text and JSON renderers.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_env("INFRACTL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}
